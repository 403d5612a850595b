use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::batch_dispatcher::BatchDispatcher;

/// 进程内周期触发器
///
/// 按固定间隔顺序调用 `dispatch_batch`；慢的调用只会推迟下一次，不会与之重叠。
pub struct PeriodicTrigger {
    dispatcher: Arc<BatchDispatcher>,
    interval: Duration,
}

impl PeriodicTrigger {
    pub fn new(dispatcher: Arc<BatchDispatcher>, interval: Duration) -> Self {
        Self { dispatcher, interval }
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("启动投递调度循环，间隔 {:?}", self.interval);

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.dispatcher.dispatch_batch().await {
                        error!("投递批次执行失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("投递调度循环收到关闭信号");
                    break;
                }
            }
        }
    }
}
