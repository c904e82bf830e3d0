//! Domain module
//!
//! Types shared with event producers.

pub mod context;
pub mod events;

pub use context::OperationContext;
pub use events::{DomainEvent, NewEvent};
