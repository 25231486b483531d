//! TaskState: everything a run needs to resume where it left off.

use crate::orchestrator::OrchestratorState;
use serde::{Deserialize, Serialize};
use taskloop_core::{InputRequest, RunIds, ToolCall, ToolResult, Usage};
use taskloop_llm::LlmMessage;

/// Mutable state of one task. Owned by the runtime's control flow and
/// serialized whole into checkpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskState {
    pub ids: RunIds,
    pub task: String,
    pub messages: Vec<LlmMessage>,
    /// Position of the task message in `messages`; compaction never drops it.
    pub task_index: usize,
    /// Iterations started so far.
    pub iteration: usize,
    /// Calls of the current turn that have not been committed yet.
    #[serde(default)]
    pub pending_tool_calls: Vec<ToolCall>,
    /// Every committed tool result, in commit order.
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    #[serde(default)]
    pub orchestrator: OrchestratorState,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub pending_input: Option<InputRequest>,
    /// Ids of background tasks dispatched by this run.
    #[serde(default)]
    pub background_tasks: Vec<String>,
    #[serde(default)]
    pub usage: Usage,
    /// Last event sequence number delivered for this run.
    #[serde(default)]
    pub last_seq: u64,
}

impl TaskState {
    pub fn new(ids: RunIds, task: impl Into<String>, history: Vec<LlmMessage>) -> Self {
        let task = task.into();
        let mut messages = history;
        let task_index = messages.len();
        messages.push(LlmMessage::user(task.clone()));
        Self {
            ids,
            task,
            messages,
            task_index,
            iteration: 0,
            pending_tool_calls: Vec::new(),
            tool_results: Vec::new(),
            orchestrator: OrchestratorState::default(),
            paused: false,
            pending_input: None,
            background_tasks: Vec::new(),
            usage: Usage::default(),
            last_seq: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.ids.run_id
    }

    /// Clear the pause and feed the user's reply back as the next message.
    /// Returns the request that was outstanding.
    pub fn resolve_input(&mut self, reply: &str) -> Option<InputRequest> {
        self.paused = false;
        let request = self.pending_input.take();
        self.messages.push(LlmMessage::user(reply));
        request
    }

    /// Short rendering of committed results, used when a run ends without an answer.
    pub fn partial_summary(&self) -> Option<String> {
        if self.tool_results.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .tool_results
            .iter()
            .map(|r| {
                let text = r.to_content_string();
                let first = text.lines().next().unwrap_or_default();
                let first: String = first.chars().take(160).collect();
                format!("- {}: {}", r.tool_name, first)
            })
            .collect();
        Some(format!("Partial results so far:\n{}", lines.join("\n")))
    }
}
