//! Taskloop Core - Types, events, configuration, and error handling

pub mod background;
pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod types;

pub use background::*;
pub use config::*;
pub use error::{Error, Result};
pub use events::*;
pub use execution::*;
pub use types::*;
