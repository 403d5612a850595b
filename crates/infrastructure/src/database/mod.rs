pub mod manager;
pub mod migrations;
pub mod postgres;
pub mod sqlite;

pub use manager::{DatabaseManager, DatabasePool, DatabaseType};
pub use postgres::{PostgresDeliveryRecordRepository, PostgresEndpointRepository};
pub use sqlite::{SqliteDeliveryRecordRepository, SqliteEndpointRepository};
