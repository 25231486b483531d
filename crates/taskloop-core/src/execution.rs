//! Correlation ids and the cancellable execution context threaded through a run.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Generate a prefixed unique id, e.g. `run-3f2a...`.
pub fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentLevel {
    #[default]
    Core,
    Subagent,
}

/// Ids that tie every event and tool call back to the run that produced it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RunIds {
    pub session_id: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    /// Run id of the root of the delegation tree.
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    pub log_id: String,
    #[serde(default)]
    pub level: AgentLevel,
}

impl RunIds {
    /// Ids for a top-level run. Its correlation id is its own run id.
    pub fn root(session_id: impl Into<String>) -> Self {
        let run_id = new_id("run");
        Self {
            session_id: session_id.into(),
            correlation_id: run_id.clone(),
            log_id: new_id("log"),
            run_id,
            parent_run_id: None,
            causation_id: None,
            level: AgentLevel::Core,
        }
    }

    /// Ids for a subagent run dispatched from this one.
    pub fn child(&self, causation_id: Option<String>) -> Self {
        let run_id = new_id("run");
        Self {
            session_id: self.session_id.clone(),
            log_id: format!("{}/{}", self.log_id, &run_id[4..run_id.len().min(12)]),
            run_id,
            parent_run_id: Some(self.run_id.clone()),
            correlation_id: self.correlation_id.clone(),
            causation_id,
            level: AgentLevel::Subagent,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        if self.parent_run_id.is_none() {
            self.correlation_id = self.run_id.clone();
        }
        self
    }

    pub fn with_causation(&self, causation_id: impl Into<String>) -> Self {
        Self {
            causation_id: Some(causation_id.into()),
            ..self.clone()
        }
    }
}

/// Cancellation plus an optional deadline. Reaching the deadline counts as cancellation.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    ids: RunIds,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl ExecutionContext {
    pub fn new(ids: RunIds) -> Self {
        Self {
            ids,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn ids(&self) -> &RunIds {
        &self.ids
    }

    pub fn run_id(&self) -> &str {
        &self.ids.run_id
    }

    pub fn session_id(&self) -> &str {
        &self.ids.session_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Context for a subagent run: new run id, inherited correlation, child cancellation.
    pub fn child(&self, causation_id: Option<String>) -> Self {
        Self {
            ids: self.ids.child(causation_id),
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    /// Same run, different causation. Shares cancellation with the parent.
    pub fn caused_by(&self, causation_id: impl Into<String>) -> Self {
        Self {
            ids: self.ids.with_causation(causation_id),
            cancel: self.cancel.clone(),
            deadline: self.deadline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_ids_keep_root_correlation() {
        let root = RunIds::root("s1");
        assert_eq!(root.correlation_id, root.run_id);

        let child = root.child(Some("call-1".into()));
        assert_ne!(child.run_id, root.run_id);
        assert_eq!(child.parent_run_id.as_deref(), Some(root.run_id.as_str()));
        assert_eq!(child.correlation_id, root.correlation_id);
        assert_eq!(child.causation_id.as_deref(), Some("call-1"));
        assert_eq!(child.level, AgentLevel::Subagent);

        let grandchild = child.child(None);
        assert_eq!(grandchild.correlation_id, root.run_id);
    }

    #[test]
    fn cancelling_parent_cancels_child() {
        let ctx = ExecutionContext::new(RunIds::root("s1"));
        let child = ctx.child(None);
        ctx.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_counts_as_cancellation() {
        let ctx = ExecutionContext::new(RunIds::root("s1")).with_timeout(Duration::from_secs(5));
        assert!(!ctx.is_cancelled());
        ctx.done().await;
        assert!(ctx.is_cancelled());
        assert!(!ctx.cancel_token().is_cancelled());
    }
}
