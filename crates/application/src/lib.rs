//! 应用层用例: Endpoint注册表和事件发射器

pub mod use_cases;

pub use use_cases::*;
