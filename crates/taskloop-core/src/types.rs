//! Core types for Taskloop

use crate::background::InputRequest;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Session identifier - cheaply cloneable
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(Arc<str>);

impl SessionKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique within one batch.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// False when the model called a tool that was not advertised to it.
    #[serde(default = "default_declared")]
    pub declared: bool,
}

fn default_declared() -> bool {
    true
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            declared: true,
        }
    }

    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// Binary or referenced artifact produced by a tool.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    InvalidArguments,
    NotFound,
    ApprovalDenied,
    ApprovalCancelled,
    Transient,
    CircuitOpen,
    Timeout,
    Cancelled,
    Execution,
    Fatal,
    WorkerFault,
}

/// Why a tool call did not succeed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolFailure {
    pub kind: ToolFailureKind,
    pub message: String,
}

impl ToolFailure {
    pub fn new(kind: ToolFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn approval_denied() -> Self {
        Self::new(ToolFailureKind::ApprovalDenied, "approval denied")
    }

    pub fn approval_cancelled() -> Self {
        Self::new(ToolFailureKind::ApprovalCancelled, "approval cancelled")
    }

    pub fn cancelled() -> Self {
        Self::new(ToolFailureKind::Cancelled, "cancelled")
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == ToolFailureKind::Fatal
    }
}

impl std::fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// The terminal outcome of exactly one [`ToolCall`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ToolResult {
    pub fn success(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            content: content.into(),
            attachments: Vec::new(),
            error: None,
            duration_ms: 0,
            metadata: Map::new(),
        }
    }

    pub fn failure(call: &ToolCall, failure: ToolFailure) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            content: String::new(),
            attachments: Vec::new(),
            error: Some(failure),
            duration_ms: 0,
            metadata: Map::new(),
        }
    }

    pub fn cancelled(call: &ToolCall) -> Self {
        Self::failure(call, ToolFailure::cancelled())
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_fatal(&self) -> bool {
        self.error.as_ref().is_some_and(ToolFailure::is_fatal)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.error.as_ref().map(|e| e.kind),
            Some(ToolFailureKind::Cancelled) | Some(ToolFailureKind::ApprovalCancelled)
        )
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Text fed back to the model as the observation for this call.
    pub fn to_content_string(&self) -> String {
        match &self.error {
            Some(err) if self.content.is_empty() => format!("Error: {}", err),
            Some(err) => format!("Error: {}\n{}", err, self.content),
            None => self.content.clone(),
        }
    }
}

/// Token usage
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }

    pub fn total(&self) -> u64 {
        self.input_tokens as u64 + self.output_tokens as u64
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxIterations,
    Cancelled,
    AwaitUserInput,
    Error,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::MaxIterations => "max_iterations",
            Self::Cancelled => "cancelled",
            Self::AwaitUserInput => "await_user_input",
            Self::Error => "error",
        }
    }

    /// Every stop reason except a pause ends the task for good.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::AwaitUserInput)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one task execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskResult {
    pub run_id: String,
    pub answer: String,
    pub stop_reason: StopReason,
    pub usage: Usage,
    pub iterations: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the task paused on a user-input gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_input: Option<InputRequest>,
    /// Every tool result committed during the run, in commit order.
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    #[serde(default)]
    pub duration_ms: u64,
}
