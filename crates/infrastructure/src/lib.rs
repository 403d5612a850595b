pub mod database;
pub mod http;

pub use database::*;
pub use http::*;
