//! Readiness multiplexing and the event loop that owns all connections.

pub mod listener;
pub mod selector;

pub use listener::{Server, Shared};
pub use selector::{Direction, Selector};
