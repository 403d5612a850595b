pub mod postgres_delivery_repository;
pub mod postgres_endpoint_repository;

pub use postgres_delivery_repository::PostgresDeliveryRecordRepository;
pub use postgres_endpoint_repository::PostgresEndpointRepository;
