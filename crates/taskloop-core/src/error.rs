//! Error types for Taskloop

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("llm error: {provider} - {message}")]
    LlmError { provider: String, message: String },

    #[error("tool error: {name} - {message}")]
    ToolError { name: String, message: String },

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("no checkpoint for run {0}")]
    CheckpointNotFound(String),

    #[error("background task not found: {0}")]
    TaskNotFound(String),

    #[error("background task already exists: {0}")]
    DuplicateTask(String),

    #[error("background task {0} has not finished")]
    TaskNotFinished(String),

    #[error("background task {0} was already collected")]
    AlreadyCollected(String),

    #[error("no pending input request {request_id} for task {task_id}")]
    UnknownInputRequest { task_id: String, request_id: String },

    #[error("background error: {0}")]
    Background(String),

    #[error("cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn llm_error(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmError {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn tool_error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolError {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn unknown_input(task_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self::UnknownInputRequest {
            task_id: task_id.into(),
            request_id: request_id.into(),
        }
    }
}
