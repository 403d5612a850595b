//! # Webhook Testing Utils
//!
//! Shared testing utilities for the webhook relay workspace.
//! This crate provides in-memory repository implementations, a scripted
//! webhook sender, a controllable clock, and entity builders.
//!
//! ## Usage
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! webhook-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! Then use the mocks in your tests:
//!
//! ```rust
//! use webhook_testing_utils::mocks::*;
//! use webhook_testing_utils::builders::EndpointBuilder;
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

// Re-export commonly used items
pub use builders::*;
pub use helpers::*;
pub use mocks::*;
