// # Flag Client Implementations
//
// Built-in implementations of the FlagClient trait. Remote SDK bindings are
// supplied by embedders through their own ClientFactory.

pub mod localhost;
pub mod memory;

pub use localhost::{LocalhostClient, LocalhostClientFactory};
pub use memory::{InMemoryClient, InMemoryClientFactory};
