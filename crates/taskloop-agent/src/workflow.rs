//! WorkflowTracker: the four lifecycle stages of one task.
//!
//! prepare → execute → summarize → persist
//!
//! Each stage is started, then succeeds or fails, independently. Every
//! transition emits a node event plus a `LifecycleUpdated`.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use taskloop_core::{
    AgentEvent, EventKind, EventSink, NodeKind, RunIds, StageStatus, WorkflowStage,
};
use tracing::{debug, warn};

pub struct WorkflowTracker {
    ids: RunIds,
    events: Arc<dyn EventSink>,
    stages: HashMap<WorkflowStage, StageStatus>,
}

impl WorkflowTracker {
    pub fn new(ids: RunIds, events: Arc<dyn EventSink>) -> Self {
        Self {
            ids,
            events,
            stages: WorkflowStage::ALL
                .iter()
                .map(|s| (*s, StageStatus::Pending))
                .collect(),
        }
    }

    pub fn status(&self, stage: WorkflowStage) -> StageStatus {
        self.stages
            .get(&stage)
            .copied()
            .unwrap_or(StageStatus::Pending)
    }

    /// Failing this stage ends the task.
    pub fn is_fatal(stage: WorkflowStage) -> bool {
        stage == WorkflowStage::Prepare
    }

    pub fn start(&mut self, stage: WorkflowStage) {
        if self.status(stage) != StageStatus::Pending {
            warn!(stage = stage.as_str(), "stage started twice");
        }
        self.set(stage, StageStatus::Running, None);
        self.emit(EventKind::NodeStarted {
            node_id: node_id(stage),
            node_kind: NodeKind::Stage,
            iteration: None,
            max_iterations: None,
        });
    }

    pub fn succeed(&mut self, stage: WorkflowStage, output: Option<Value>) {
        if self.status(stage) != StageStatus::Running {
            warn!(stage = stage.as_str(), "stage completed without starting");
        }
        self.set(stage, StageStatus::Succeeded, None);
        self.emit(EventKind::NodeCompleted {
            node_id: node_id(stage),
            node_kind: NodeKind::Stage,
            iteration: None,
            tokens_used: 0,
            tool_calls: 0,
            output,
        });
    }

    pub fn fail(&mut self, stage: WorkflowStage, error: impl Into<String>) {
        let error = error.into();
        self.set(stage, StageStatus::Failed, Some(error.clone()));
        self.emit(EventKind::NodeFailed {
            node_id: node_id(stage),
            node_kind: NodeKind::Stage,
            iteration: None,
            phase: stage.as_str().to_string(),
            error,
            recoverable: !Self::is_fatal(stage),
        });
    }

    fn set(&mut self, stage: WorkflowStage, status: StageStatus, error: Option<String>) {
        debug!(stage = stage.as_str(), ?status, "workflow stage");
        self.stages.insert(stage, status);
        self.emit(EventKind::LifecycleUpdated {
            stage,
            status,
            error,
        });
    }

    fn emit(&self, kind: EventKind) {
        self.events.emit(AgentEvent::new(&self.ids, kind));
    }
}

fn node_id(stage: WorkflowStage) -> String {
    format!("stage:{}", stage.as_str())
}
