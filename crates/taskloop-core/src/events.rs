//! Raw domain events and the versioned envelopes delivered to listeners.
//!
//! Producers emit [`AgentEvent`]s through an [`EventSink`]. The agent crate
//! translates them into [`WorkflowEnvelope`]s, assigns sequence numbers and
//! hands them to [`EventListener`]s one at a time.

use crate::background::{BackgroundTaskStatus, InputRequest};
use crate::execution::{new_id, AgentLevel, RunIds};
use crate::types::{StopReason, Usage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

pub const ENVELOPE_VERSION: u32 = 1;

/// Fields carried by every event.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BaseEvent {
    pub event_id: String,
    /// Assigned at delivery time; zero until then.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    pub agent_level: AgentLevel,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    pub log_id: String,
}

impl BaseEvent {
    pub fn from_ids(ids: &RunIds) -> Self {
        Self {
            event_id: new_id("evt"),
            seq: 0,
            timestamp: Utc::now(),
            session_id: ids.session_id.clone(),
            run_id: ids.run_id.clone(),
            parent_run_id: ids.parent_run_id.clone(),
            agent_level: ids.level,
            correlation_id: ids.correlation_id.clone(),
            causation_id: ids.causation_id.clone(),
            log_id: ids.log_id.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Stage,
    Iteration,
    Generation,
    Tool,
    Subflow,
    Node,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Prepare,
    Execute,
    Summarize,
    Persist,
}

impl WorkflowStage {
    pub const ALL: [WorkflowStage; 4] = [
        WorkflowStage::Prepare,
        WorkflowStage::Execute,
        WorkflowStage::Summarize,
        WorkflowStage::Persist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Execute => "execute",
            Self::Summarize => "summarize",
            Self::Persist => "persist",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Stage of the per-call tool pipeline a progress event refers to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Validate,
    Approve,
    Retry,
    Correlate,
    Execute,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    LifecycleUpdated {
        stage: WorkflowStage,
        status: StageStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    NodeStarted {
        node_id: String,
        node_kind: NodeKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        iteration: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_iterations: Option<usize>,
    },
    NodeOutputDelta {
        node_id: String,
        iteration: usize,
        delta: String,
    },
    NodeOutputSummary {
        node_id: String,
        iteration: usize,
        content: String,
        tool_call_count: usize,
    },
    NodeCompleted {
        node_id: String,
        node_kind: NodeKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        iteration: Option<usize>,
        tokens_used: u64,
        tool_calls: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },
    NodeFailed {
        node_id: String,
        node_kind: NodeKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        iteration: Option<usize>,
        phase: String,
        error: String,
        recoverable: bool,
    },
    ToolStarted {
        call_id: String,
        tool_name: String,
        arguments: Map<String, Value>,
    },
    ToolProgress {
        call_id: String,
        tool_name: String,
        stage: PipelineStage,
        message: String,
    },
    ToolCompleted {
        call_id: String,
        tool_name: String,
        content_preview: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        duration_ms: u64,
        attachments: usize,
    },
    OrchestratorCorrection {
        reason: String,
        rejected_tools: Vec<String>,
    },
    ReplanRequested {
        call_id: String,
        tool_name: String,
        error: String,
    },
    InputRequested {
        request: InputRequest,
    },
    InputResolved {
        task_id: String,
        request_id: String,
        approved: bool,
        reason: String,
    },
    BackgroundDispatched {
        task_id: String,
        description: String,
        agent_type: String,
    },
    BackgroundCompleted {
        task_id: String,
        status: BackgroundTaskStatus,
        summary: String,
        tokens: u64,
        iterations: usize,
        #[serde(default)]
        tool_calls: usize,
    },
    /// An event from a delegated subagent run, forwarded to the parent stream.
    Subtask {
        task_id: String,
        index: usize,
        total: usize,
        preview: String,
        event: Box<AgentEvent>,
    },
    CheckpointSaved {
        iteration: usize,
        pending_calls: usize,
    },
    Diagnostic {
        name: String,
        payload: Value,
    },
    ResultFinal {
        answer: String,
        stop_reason: StopReason,
        iterations: usize,
        usage: Usage,
        /// True for partial chunks of a streamed answer.
        streaming: bool,
        stream_finished: bool,
    },
    ResultCancelled {
        reason: String,
    },
}

impl EventKind {
    /// Node the event belongs to, when it belongs to one.
    pub fn node(&self) -> Option<(&str, NodeKind)> {
        match self {
            Self::NodeStarted {
                node_id, node_kind, ..
            }
            | Self::NodeCompleted {
                node_id, node_kind, ..
            }
            | Self::NodeFailed {
                node_id, node_kind, ..
            } => Some((node_id, *node_kind)),
            Self::NodeOutputDelta { node_id, .. } | Self::NodeOutputSummary { node_id, .. } => {
                Some((node_id, NodeKind::Generation))
            }
            Self::ToolStarted { call_id, .. }
            | Self::ToolProgress { call_id, .. }
            | Self::ToolCompleted { call_id, .. } => Some((call_id, NodeKind::Tool)),
            Self::LifecycleUpdated { stage, .. } => Some((stage.as_str(), NodeKind::Stage)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentEvent {
    pub base: BaseEvent,
    pub kind: EventKind,
}

impl AgentEvent {
    pub fn new(ids: &RunIds, kind: EventKind) -> Self {
        Self {
            base: BaseEvent::from_ids(ids),
            kind,
        }
    }
}

/// Versioned wrapper for cross-boundary delivery.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowEnvelope {
    pub version: u32,
    pub event_type: String,
    #[serde(flatten)]
    pub base: BaseEvent,
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_kind: Option<NodeKind>,
    #[serde(default)]
    pub is_subtask: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_subtasks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_preview: Option<String>,
    pub payload: Value,
}

impl WorkflowEnvelope {
    pub fn seq(&self) -> u64 {
        self.base.seq
    }
}

/// Delivery surface. Must return quickly; it runs on the single delivery task.
pub trait EventListener: Send + Sync {
    fn on_event(&self, envelope: &WorkflowEnvelope) -> crate::Result<()>;
}

/// Entry point for producers of raw events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AgentEvent);
}

/// Sink that drops everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: AgentEvent) {}
}

/// Forwards envelopes into an unbounded channel.
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<WorkflowEnvelope>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WorkflowEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventListener for ChannelListener {
    fn on_event(&self, envelope: &WorkflowEnvelope) -> crate::Result<()> {
        self.tx
            .send(envelope.clone())
            .map_err(|_| crate::Error::Internal("event channel closed".into()))
    }
}

/// Forwards raw events into an unbounded channel. Handy for tests and bridges.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: AgentEvent) {
        let _ = self.tx.send(event);
    }
}
