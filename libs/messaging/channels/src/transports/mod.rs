//! Built-in transport backends

pub mod memory;

pub use memory::{MemoryActivator, MemoryBroker};
