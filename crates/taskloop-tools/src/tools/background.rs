//! Background task tools: dispatch, inspect, collect and answer delegated work.
//!
//! The tools only see [`BackgroundControl`]; the manager that implements it
//! lives in the agent crate and is handed over per run through the tool
//! context. This keeps the tool layer free of agent-layer types.

use crate::registry::{Tool, ToolContext, ToolError, ToolOutput};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use taskloop_core::{
    BackgroundOutcome, BackgroundTaskSummary, DispatchRequest, Error, ExecutionContext,
    InputResponse, INTERNAL_AGENT_TYPE,
};

/// Control surface of a background-task manager.
pub trait BackgroundControl: Send + Sync {
    /// Start a task. `Ok(false)` means the manager declined it (e.g. at capacity).
    fn dispatch(&self, ctx: &ExecutionContext, request: DispatchRequest) -> taskloop_core::Result<bool>;
    /// One task, or all of them when `task_id` is `None`.
    fn status(&self, task_id: Option<&str>) -> Vec<BackgroundTaskSummary>;
    /// Hand out a finished task's outcome. Succeeds once per task.
    fn collect(&self, task_id: &str) -> taskloop_core::Result<BackgroundOutcome>;
    fn reply(&self, task_id: &str, request_id: &str, response: InputResponse) -> taskloop_core::Result<()>;
}

fn control(ctx: &ToolContext) -> Result<&Arc<dyn BackgroundControl>, ToolError> {
    ctx.background()
        .ok_or_else(|| ToolError::failed("background tasks are not available in this run"))
}

fn map_error(e: Error) -> ToolError {
    match e {
        Error::InvalidRequest(_)
        | Error::DuplicateTask(_)
        | Error::TaskNotFound(_)
        | Error::UnknownInputRequest { .. } => ToolError::InvalidArguments(e.to_string()),
        other => ToolError::Failed(other.to_string()),
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::invalid(format!("`{}` must not be empty", key)))
}

// ---------------------------------------------------------------------------
// bg_dispatch
// ---------------------------------------------------------------------------

pub struct BackgroundDispatchTool;

#[async_trait::async_trait]
impl Tool for BackgroundDispatchTool {
    fn name(&self) -> &str {
        super::BG_DISPATCH_TOOL
    }

    fn description(&self) -> &str {
        "Start a delegated subtask in the background. Returns immediately; use bg_status and bg_collect later."
    }

    fn prompt(&self) -> &str {
        "Background tasks run while you keep working. You are told when they finish or need input; \
         answer input requests with bg_reply and fetch results with bg_collect."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["task_id", "description", "prompt"],
            "properties": {
                "task_id": { "type": "string" },
                "description": { "type": "string" },
                "prompt": { "type": "string" },
                "agent_type": { "type": "string", "description": "\"internal\" or a registered external agent" },
                "config": { "type": "object" }
            }
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        let control = control(ctx)?;
        let mut request = DispatchRequest::new(
            required_str(&args, "task_id")?,
            required_str(&args, "description")?,
            required_str(&args, "prompt")?,
        );
        if let Some(agent_type) = args.get("agent_type").and_then(Value::as_str) {
            if !agent_type.trim().is_empty() {
                request.agent_type = agent_type.trim().to_string();
            }
        }
        if let Some(Value::Object(config)) = args.get("config") {
            request.config = config.clone();
        }
        request.parent_task_id = Some(ctx.ids().run_id.clone());
        request.causation_id = Some(ctx.call_id.clone());

        let task_id = request.task_id.clone();
        let agent_type = request.agent_type.clone();
        if control.dispatch(ctx.execution(), request).map_err(map_error)? {
            Ok(ToolOutput::text(format!(
                "Background task `{}` dispatched ({}).",
                task_id,
                if agent_type == INTERNAL_AGENT_TYPE { "internal subagent" } else { agent_type.as_str() }
            ))
            .with_metadata("task_id", json!(task_id)))
        } else {
            Err(ToolError::failed(format!("background task `{}` was not accepted", task_id)))
        }
    }
}

// ---------------------------------------------------------------------------
// bg_status
// ---------------------------------------------------------------------------

pub struct BackgroundStatusTool;

#[async_trait::async_trait]
impl Tool for BackgroundStatusTool {
    fn name(&self) -> &str {
        "bg_status"
    }

    fn description(&self) -> &str {
        "Show the status of one background task, or all of them."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "task_id": { "type": "string" } }
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        let control = control(ctx)?;
        let task_id = args.get("task_id").and_then(Value::as_str);
        let summaries = control.status(task_id);
        if let (Some(id), true) = (task_id, summaries.is_empty()) {
            return Err(ToolError::invalid(format!("background task not found: {}", id)));
        }
        if summaries.is_empty() {
            return Ok(ToolOutput::text("No background tasks."));
        }
        let value = serde_json::to_value(&summaries).unwrap_or_default();
        Ok(ToolOutput::json(&value))
    }
}

// ---------------------------------------------------------------------------
// bg_collect
// ---------------------------------------------------------------------------

pub struct BackgroundCollectTool;

#[async_trait::async_trait]
impl Tool for BackgroundCollectTool {
    fn name(&self) -> &str {
        "bg_collect"
    }

    fn description(&self) -> &str {
        "Fetch the result of a finished background task. Each result can be collected once."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["task_id"],
            "properties": { "task_id": { "type": "string" } }
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        let control = control(ctx)?;
        let outcome = control
            .collect(required_str(&args, "task_id")?)
            .map_err(map_error)?;
        let mut metadata = Map::new();
        metadata.insert("task_id".into(), json!(outcome.task_id));
        metadata.insert("status".into(), json!(outcome.status));
        let content = match &outcome.error {
            Some(err) => format!("Task `{}` {}: {}", outcome.task_id, outcome.status, err),
            None => format!("Task `{}` {}:\n{}", outcome.task_id, outcome.status, outcome.answer),
        };
        Ok(ToolOutput {
            content,
            attachments: Vec::new(),
            metadata,
        })
    }
}

// ---------------------------------------------------------------------------
// bg_reply
// ---------------------------------------------------------------------------

pub struct BackgroundReplyTool;

#[async_trait::async_trait]
impl Tool for BackgroundReplyTool {
    fn name(&self) -> &str {
        "bg_reply"
    }

    fn description(&self) -> &str {
        "Answer a pending input request from a background task."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["task_id", "request_id", "approved"],
            "properties": {
                "task_id": { "type": "string" },
                "request_id": { "type": "string" },
                "approved": { "type": "boolean" },
                "message": { "type": "string" }
            }
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        let control = control(ctx)?;
        let task_id = required_str(&args, "task_id")?;
        let request_id = required_str(&args, "request_id")?;
        let approved = args.get("approved").and_then(Value::as_bool).unwrap_or(false);
        let message = args.get("message").and_then(Value::as_str).map(String::from);
        let response = InputResponse { approved, message };
        control
            .reply(task_id, request_id, response)
            .map_err(map_error)?;
        Ok(ToolOutput::text(format!(
            "Replied to {} on task `{}`: {}",
            request_id,
            task_id,
            if approved { "approved" } else { "rejected" }
        )))
    }
}
