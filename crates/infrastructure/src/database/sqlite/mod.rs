pub mod sqlite_delivery_repository;
pub mod sqlite_endpoint_repository;

pub use sqlite_delivery_repository::SqliteDeliveryRecordRepository;
pub use sqlite_endpoint_repository::SqliteEndpointRepository;
