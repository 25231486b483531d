//! Value types shared between the background-task manager and the tools that drive it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Agent type used when a dispatch does not name one.
pub const INTERNAL_AGENT_TYPE: &str = "internal";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundTaskStatus {
    Pending,
    Running,
    AwaitingInput,
    Done,
    Failed,
}

impl BackgroundTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::AwaitingInput => "awaiting_input",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for BackgroundTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to run a delegated subtask.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub task_id: String,
    pub description: String,
    pub prompt: String,
    #[serde(default = "default_agent_type")]
    pub agent_type: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Id of the task that dispatched this one. Lookup only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    /// Tool call that caused the dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
}

fn default_agent_type() -> String {
    INTERNAL_AGENT_TYPE.to_string()
}

impl DispatchRequest {
    pub fn new(
        task_id: impl Into<String>,
        description: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            description: description.into(),
            prompt: prompt.into(),
            agent_type: default_agent_type(),
            config: Map::new(),
            parent_task_id: None,
            causation_id: None,
        }
    }

    pub fn with_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = agent_type.into();
        self
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    /// A delegated unit wants permission to run something.
    Permission,
    /// A question for the user.
    Question,
}

/// A pending request for outside input. At most one is outstanding per task.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InputRequest {
    pub request_id: String,
    pub task_id: String,
    pub kind: InputKind,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InputRequest {
    pub fn new(
        task_id: impl Into<String>,
        request_id: impl Into<String>,
        kind: InputKind,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            task_id: task_id.into(),
            kind,
            summary: summary.into(),
            tool_name: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InputResponse {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl InputResponse {
    pub fn approve() -> Self {
        Self {
            approved: true,
            message: None,
        }
    }

    pub fn reject(message: impl Into<String>) -> Self {
        Self {
            approved: false,
            message: Some(message.into()),
        }
    }
}

/// Point-in-time view of a background task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackgroundTaskSummary {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    pub description: String,
    pub agent_type: String,
    pub status: BackgroundTaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_input: Option<InputRequest>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Final result of a background task, handed out once by `collect`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackgroundOutcome {
    pub task_id: String,
    pub status: BackgroundTaskStatus,
    #[serde(default)]
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub iterations: usize,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Something the parent loop should learn about at its next iteration boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackgroundNotification {
    Completed {
        task_id: String,
        status: BackgroundTaskStatus,
        summary: String,
    },
    InputRequested(InputRequest),
}
