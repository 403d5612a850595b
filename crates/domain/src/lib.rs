//! Webhook投递子系统的领域模型
//!
//! 实体、事件负载、仓储抽象以及投递端口。

pub mod entities;
pub mod events;
pub mod ports;
pub mod repositories;
#[cfg(feature = "sqlx-support")]
pub mod sqlx_impls;

pub use entities::*;
pub use events::*;
pub use ports::*;
pub use repositories::*;
pub use webhook_errors::{DeliveryError, WebhookError, WebhookResult};
