//! EventEmitter: the single ordered entry point for a run's events.

use super::translator::WorkflowEventTranslator;
use std::sync::{Arc, Mutex};
use taskloop_core::{AgentEvent, EventListener, EventSink};
use tracing::{debug, warn};

struct EmitterState {
    translator: WorkflowEventTranslator,
    last_seq: u64,
    sealed: bool,
}

/// Translates, numbers and forwards events.
///
/// Translation, sequence assignment and hand-off to the listener happen
/// under one lock, so sequence numbers are gapless and the listener receives
/// them in increasing order no matter how many producers emit at once.
/// Pair it with a [`super::SerializingListener`] so the lock is never held
/// across a slow listener.
pub struct EventEmitter {
    state: Mutex<EmitterState>,
    listener: Arc<dyn EventListener>,
}

impl EventEmitter {
    pub fn new(listener: Arc<dyn EventListener>) -> Self {
        Self::starting_after(listener, 0)
    }

    /// Continue numbering after `last_seq`, e.g. when a paused run resumes.
    pub fn starting_after(listener: Arc<dyn EventListener>, last_seq: u64) -> Self {
        Self {
            state: Mutex::new(EmitterState {
                translator: WorkflowEventTranslator::new(),
                last_seq,
                sealed: false,
            }),
            listener,
        }
    }

    pub fn last_seq(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).last_seq
    }

    /// Stop numbering and return the last sequence number handed out.
    /// Anything emitted afterwards is dropped, so a run resumed from the
    /// returned value never reuses a number.
    pub fn seal(&self) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.sealed = true;
        state.last_seq
    }
}

impl EventSink for EventEmitter {
    fn emit(&self, event: AgentEvent) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.sealed {
            debug!(run_id = %event.base.run_id, "emitter sealed, dropping event");
            return;
        }
        let Some(mut envelope) = state.translator.translate(event) else {
            return;
        };
        state.last_seq += 1;
        envelope.base.seq = state.last_seq;
        if let Err(e) = self.listener.on_event(&envelope) {
            warn!(seq = envelope.base.seq, "dropping event: {}", e);
        }
    }
}
