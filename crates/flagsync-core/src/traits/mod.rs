//! Core traits for the flagsync system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`FlagClient`]: The wrapped remote flag client
//! - [`ClientFactory`]: Construct a flag client from configuration
//! - [`EventHandler`]: React to provider lifecycle events

pub mod event_handler;
pub mod flag_client;

pub use event_handler::EventHandler;
pub use flag_client::{Attributes, ClientFactory, FlagClient, FlagSnapshot, TreatmentResult};
