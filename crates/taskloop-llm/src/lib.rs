//! Taskloop LLM - Provider seam with streaming support
//!
//! No wire protocol lives here. Concrete providers implement [`LlmProvider`]
//! elsewhere; [`RetryingProvider`] adds adapter-boundary retries and
//! [`ScriptedProvider`] replays deterministic turns.

pub mod provider;
pub mod retry;
pub mod scripted;
pub mod types;

pub use provider::{LlmError, LlmProvider, LlmResult, LlmStream};
pub use retry::RetryingProvider;
pub use scripted::{ScriptedCall, ScriptedProvider, ScriptedTurn};
pub use tokio_util::sync::CancellationToken;
pub use types::*;
