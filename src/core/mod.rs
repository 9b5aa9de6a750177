//! Core configuration and error types for the simulator.

#![warn(missing_docs)]

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder, ConfigWatcher, FaultProfile};
pub use error::{Result, SimError};
