pub mod deliveries;
pub mod dispatch;
pub mod endpoints;
pub mod events;
pub mod health;
pub mod metrics;
