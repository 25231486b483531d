//! Event delivery: raw events in, ordered versioned envelopes out.
//!
//! producers → [`EventEmitter`] (translate + seq) → [`SerializingListener`] → listener

pub mod emitter;
pub mod serializing;
pub mod translator;

pub use emitter::EventEmitter;
pub use serializing::{ListenerChain, SerializingListener};
pub use translator::{event_type, is_terminal, SubflowStats, WorkflowEventTranslator};

use std::sync::Arc;
use taskloop_core::{AgentEvent, EventKind, EventSink, RunIds};

/// Wraps a subagent's events as [`EventKind::Subtask`] and forwards them
/// to the delegating run's sink.
pub struct SubtaskSink {
    parent: Arc<dyn EventSink>,
    parent_ids: RunIds,
    task_id: String,
    index: usize,
    total: usize,
    preview: String,
}

impl SubtaskSink {
    pub fn new(
        parent: Arc<dyn EventSink>,
        parent_ids: RunIds,
        task_id: impl Into<String>,
        index: usize,
        total: usize,
        preview: impl Into<String>,
    ) -> Self {
        Self {
            parent,
            parent_ids,
            task_id: task_id.into(),
            index,
            total,
            preview: preview.into(),
        }
    }
}

impl EventSink for SubtaskSink {
    fn emit(&self, event: AgentEvent) {
        self.parent.emit(AgentEvent::new(
            &self.parent_ids,
            EventKind::Subtask {
                task_id: self.task_id.clone(),
                index: self.index,
                total: self.total,
                preview: self.preview.clone(),
                event: Box::new(event),
            },
        ));
    }
}
