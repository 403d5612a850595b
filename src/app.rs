use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info};
use webhook_api::{create_app, AppState};
use webhook_application::{EndpointRegistry, EventEmitter};
use webhook_config::AppConfig;
use webhook_dispatcher::{BatchDispatcher, DispatchSettings, DispatchSummary, PeriodicTrigger};
use webhook_domain::{ports::SystemClock, DeliveryRecordRepository};
use webhook_infrastructure::{database::manager::mask_database_url, DatabaseManager, HttpWebhookSender};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行API服务器
    Api,
    /// 仅运行周期投递循环
    Dispatcher,
    /// 运行所有启用的组件
    All,
    /// 执行一次批次后退出，供外部调度器调用
    Once,
}

impl FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "api" => Ok(AppMode::Api),
            "dispatcher" => Ok(AppMode::Dispatcher),
            "all" => Ok(AppMode::All),
            "once" => Ok(AppMode::Once),
            _ => Err(anyhow!("不支持的运行模式: {s}")),
        }
    }
}

impl AppMode {
    /// 解析运行模式，并检查对应组件在配置中是否启用
    pub fn resolve(mode_str: &str, config: &AppConfig) -> Result<Self> {
        let mode = mode_str.parse::<AppMode>()?;
        match mode {
            AppMode::Dispatcher if !config.dispatcher.enabled => {
                Err(anyhow!("Dispatcher模式被禁用，请检查配置"))
            }
            AppMode::Api if !config.api.enabled => Err(anyhow!("API模式被禁用，请检查配置")),
            AppMode::All if !config.dispatcher.enabled && !config.api.enabled => {
                Err(anyhow!("Dispatcher和API都被禁用，没有可运行的组件"))
            }
            _ => Ok(mode),
        }
    }
}

/// 主应用程序
#[derive(Clone)]
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    database: Arc<DatabaseManager>,
    registry: Arc<EndpointRegistry>,
    emitter: Arc<EventEmitter>,
    dispatcher: Arc<BatchDispatcher>,
    delivery_repo: Arc<dyn DeliveryRecordRepository>,
    metrics_handle: Option<PrometheusHandle>,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);
        info!("连接数据库: {}", mask_database_url(&config.database.url));

        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        database.migrate().await.context("运行数据库迁移失败")?;
        info!("数据库连接成功");

        let endpoint_repo = database.endpoint_repository();
        let delivery_repo = database.delivery_repository();

        let sender = HttpWebhookSender::from_config(&config.dispatcher)
            .context("创建Webhook HTTP客户端失败")?;

        let dispatcher = Arc::new(BatchDispatcher::new(
            endpoint_repo.clone(),
            delivery_repo.clone(),
            Arc::new(sender),
            Arc::new(SystemClock),
            DispatchSettings::from(&config.dispatcher),
        ));

        let metrics_handle = if config.observability.metrics_enabled && mode != AppMode::Once {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .context("安装Prometheus指标记录器失败")?;
            Some(handle)
        } else {
            None
        };

        Ok(Self {
            registry: Arc::new(EndpointRegistry::new(endpoint_repo.clone())),
            emitter: Arc::new(EventEmitter::new(endpoint_repo, delivery_repo.clone())),
            dispatcher,
            delivery_repo,
            metrics_handle,
            database: Arc::new(database),
            config,
            mode,
        })
    }

    pub fn mode(&self) -> AppMode {
        self.mode
    }

    /// 运行应用程序，直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        let result = match self.mode {
            AppMode::Dispatcher => {
                self.run_dispatcher(shutdown_rx).await;
                Ok(())
            }
            AppMode::Api => self.run_api(shutdown_rx).await,
            AppMode::All => self.run_all_components(shutdown_rx).await,
            AppMode::Once => self.run_once().await.map(|_| ()),
        };

        self.database.close().await;
        result
    }

    /// 执行一次批次投递
    pub async fn run_once(&self) -> Result<DispatchSummary> {
        let summary = self
            .dispatcher
            .dispatch_batch()
            .await
            .context("执行投递批次失败")?;
        Ok(summary)
    }

    /// 关闭数据库连接
    pub async fn close(&self) {
        self.database.close().await;
    }

    async fn run_dispatcher(&self, shutdown_rx: broadcast::Receiver<()>) {
        info!("启动投递服务");

        let trigger = PeriodicTrigger::new(
            Arc::clone(&self.dispatcher),
            Duration::from_secs(self.config.dispatcher.schedule_interval_seconds),
        );
        trigger.run(shutdown_rx).await;

        info!("投递服务已停止");
    }

    fn api_state(&self) -> AppState {
        AppState {
            registry: Arc::clone(&self.registry),
            emitter: Arc::clone(&self.emitter),
            dispatcher: Arc::clone(&self.dispatcher),
            delivery_repo: Arc::clone(&self.delivery_repo),
            metrics_handle: self.metrics_handle.clone(),
        }
    }

    async fn run_api(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动API服务器: {}", self.config.api.bind_address);

        let app = create_app(self.api_state(), &self.config.api);

        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;

        info!("API服务器启动在 http://{}", self.config.api.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API服务器收到关闭信号");
            })
            .await
            .context("API服务器运行失败")?;

        info!("API服务器已停止");
        Ok(())
    }

    async fn run_all_components(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动所有组件");

        let mut handles = Vec::new();

        if self.config.dispatcher.enabled {
            let app = self.clone();
            let shutdown_rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                app.run_dispatcher(shutdown_rx).await;
            }));
        }

        if self.config.api.enabled {
            let app = self.clone();
            let shutdown_rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = app.run_api(shutdown_rx).await {
                    error!("API服务器运行失败: {:#}", e);
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("组件任务异常退出: {}", e);
            }
        }

        info!("所有组件已停止");
        Ok(())
    }
}
