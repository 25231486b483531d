//! Tool registry and trait definitions
//!
//! Each tool is a self-contained unit implementing the Tool trait. The
//! registry maps names to capabilities; the invocation pipeline resolves
//! calls through it and owns validation, approval, retry and timeouts.

use crate::schema::ArgumentSchema;
use crate::tools::BackgroundControl;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use taskloop_core::{
    AgentEvent, Attachment, EventKind, EventSink, ExecutionContext, PipelineStage, RunIds,
};
use taskloop_llm::LlmTool;
use tokio_util::sync::CancellationToken;

/// Successful tool output.
#[derive(Clone, Debug, Default)]
pub struct ToolOutput {
    pub content: String,
    pub attachments: Vec<Attachment>,
    /// Structured side information read by the runtime (never shown to the model).
    pub metadata: Map<String, Value>,
}

impl ToolOutput {
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            content: s.into(),
            ..Default::default()
        }
    }

    pub fn json(v: &Value) -> Self {
        Self::text(serde_json::to_string_pretty(v).unwrap_or_default())
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// Capability-level failure. The pipeline decides what each kind means for
/// retrying and circuit breaking.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    /// Arguments are wrong. Never retried, never counted by the breaker.
    #[error("{0}")]
    InvalidArguments(String),

    /// Worth retrying.
    #[error("{0}")]
    Transient(String),

    /// The tool ran and failed.
    #[error("{0}")]
    Failed(String),

    /// Ends the task.
    #[error("{0}")]
    Fatal(String),
}

impl ToolError {
    pub fn invalid(s: impl Into<String>) -> Self {
        Self::InvalidArguments(s.into())
    }

    pub fn failed(s: impl Into<String>) -> Self {
        Self::Failed(s.into())
    }
}

/// What a tool sees while it runs: correlated ids, cancellation, and a way
/// to report progress.
#[derive(Clone)]
pub struct ToolContext {
    pub call_id: String,
    pub tool_name: String,
    exec: ExecutionContext,
    background: Option<Arc<dyn BackgroundControl>>,
    events: Option<Arc<dyn EventSink>>,
}

impl ToolContext {
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>, exec: ExecutionContext) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            exec,
            background: None,
            events: None,
        }
    }

    pub fn with_background(mut self, background: Option<Arc<dyn BackgroundControl>>) -> Self {
        self.background = background;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn ids(&self) -> &RunIds {
        self.exec.ids()
    }

    pub fn execution(&self) -> &ExecutionContext {
        &self.exec
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        self.exec.cancel_token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.exec.is_cancelled()
    }

    pub fn background(&self) -> Option<&Arc<dyn BackgroundControl>> {
        self.background.as_ref()
    }

    /// Report intermediate progress for this call.
    pub fn progress(&self, message: impl Into<String>) {
        if let Some(events) = &self.events {
            events.emit(AgentEvent::new(
                self.exec.ids(),
                EventKind::ToolProgress {
                    call_id: self.call_id.clone(),
                    tool_name: self.tool_name.clone(),
                    stage: PipelineStage::Execute,
                    message: message.into(),
                },
            ));
        }
    }
}

/// The Tool trait: implement this to add a new capability.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (e.g. "plan", "bg_dispatch").
    fn name(&self) -> &str;

    /// Human-readable description sent to the LLM.
    fn description(&self) -> &str;

    /// System prompt fragment for this tool (injected into LLM context).
    fn prompt(&self) -> &str {
        ""
    }

    /// JSON Schema for input parameters. Arguments are validated against it
    /// before the tool runs.
    fn input_schema(&self) -> Value;

    /// Whether this tool only reads state (no side effects).
    fn is_read_only(&self) -> bool {
        false
    }

    /// Dangerous or irreversible tools need an approval decision first.
    fn is_dangerous(&self) -> bool {
        false
    }

    /// Whether this tool is currently enabled.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Overrides the pipeline's default execution timeout.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolOutput, ToolError>;

    /// Convert to the LLM tool definition format.
    fn to_llm_tool(&self) -> LlmTool {
        LlmTool {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Argument schemas, compiled at registration.
    schemas: HashMap<String, Arc<ArgumentSchema>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            schemas: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let schema = ArgumentSchema::compile(&tool.input_schema());
        if !schema.is_valid_schema() {
            tracing::warn!(tool = %name, "tool schema does not compile, calls will be rejected");
        }
        self.schemas.insert(name.clone(), Arc::new(schema));
        self.tools.insert(name, tool);
    }

    /// Remove a tool by name.
    pub fn remove(&mut self, name: &str) -> bool {
        self.schemas.remove(name);
        self.tools.remove(name).is_some()
    }

    /// Check `args` against the registered tool's compiled schema.
    pub fn validate_arguments(&self, name: &str, args: &Value) -> Result<(), String> {
        match self.schemas.get(name) {
            Some(schema) => schema.validate(args),
            None => Err(format!("tool not found: {}", name)),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// LLM tool definitions for all enabled tools, sorted by name.
    pub fn get_definitions(&self) -> Vec<LlmTool> {
        let mut defs: Vec<LlmTool> = self
            .tools
            .values()
            .filter(|t| t.is_enabled())
            .map(|t| t.to_llm_tool())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Get system prompt fragments from all enabled tools.
    pub fn combined_prompts(&self) -> String {
        let mut tools: Vec<&Arc<dyn Tool>> =
            self.tools.values().filter(|t| t.is_enabled()).collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
            .into_iter()
            .map(|t| t.prompt())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// List only read-only tools.
    pub fn list_read_only(&self) -> Vec<&str> {
        self.tools
            .iter()
            .filter(|(_, t)| t.is_read_only())
            .map(|(k, _)| k.as_str())
            .collect()
    }
}
