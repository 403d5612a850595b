//! Webhook批次分发器
//!
//! 每次调用认领一批到期的投递记录，并发投递，按固定重试表写回结果。
//! 进程内的周期触发器只是按间隔顺序地调用同一个入口。

pub mod batch_dispatcher;
pub mod retry_policy;
pub mod trigger;

pub use batch_dispatcher::*;
pub use retry_policy::*;
pub use trigger::*;
