pub mod endpoint_registry;
pub mod event_emitter;

pub use endpoint_registry::*;
pub use event_emitter::*;
