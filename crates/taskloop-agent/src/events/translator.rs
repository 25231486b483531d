//! WorkflowEventTranslator: raw [`AgentEvent`]s to [`WorkflowEnvelope`]s.
//!
//! Assigns each event its semantic type, drops internally scoped nodes
//! (ids starting with `__`), unwraps subagent events into subtask envelopes
//! and keeps running statistics per delegating run.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use taskloop_core::{
    AgentEvent, BackgroundTaskStatus, EventKind, NodeKind, WorkflowEnvelope, ENVELOPE_VERSION,
};

const INTERNAL_NODE_PREFIX: &str = "__";

/// Aggregate progress of the subtasks delegated by one run.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct SubflowStats {
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub tokens: u64,
    pub tool_calls: usize,
}

impl SubflowStats {
    fn finished(&self) -> bool {
        self.total > 0 && self.completed >= self.total
    }
}

/// Usage attributed to one subtask.
#[derive(Clone, Copy, Default)]
struct TaskTally {
    tokens: u64,
    tool_calls: usize,
}

/// Stats of one delegating run plus the per-subtask tallies they sum.
#[derive(Default)]
struct Subflow {
    stats: SubflowStats,
    tasks: HashMap<String, TaskTally>,
}

impl Subflow {
    fn tally(&mut self, task_id: &str) -> &mut TaskTally {
        self.tasks.entry(task_id.to_string()).or_default()
    }

    fn resum(&mut self) {
        self.stats.tokens = self.tasks.values().map(|t| t.tokens).sum();
        self.stats.tool_calls = self.tasks.values().map(|t| t.tool_calls).sum();
    }
}

#[derive(Default)]
pub struct WorkflowEventTranslator {
    subflows: HashMap<String, Subflow>,
}

impl WorkflowEventTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live statistics for a delegating run, if it has unfinished subtasks.
    pub fn subflow(&self, run_id: &str) -> Option<&SubflowStats> {
        self.subflows.get(run_id).map(|s| &s.stats)
    }

    /// Translate one event. `None` means the event is not for external eyes.
    pub fn translate(&mut self, event: AgentEvent) -> Option<WorkflowEnvelope> {
        let AgentEvent { base, kind } = event;
        let parent_run = base.run_id.clone();

        match kind {
            EventKind::Subtask {
                task_id,
                index,
                total,
                preview,
                event,
            } => {
                let inner = innermost(*event);
                if is_internal(&inner.kind) {
                    return None;
                }
                let finished = matches!(
                    inner.kind,
                    EventKind::ResultFinal { stream_finished: true, .. } | EventKind::ResultCancelled { .. }
                );
                let subflow = self.subflows.entry(parent_run.clone()).or_default();
                subflow.stats.total = subflow.stats.total.max(total);
                match &inner.kind {
                    EventKind::ToolCompleted { .. } => subflow.tally(&task_id).tool_calls += 1,
                    EventKind::NodeCompleted {
                        node_kind: NodeKind::Generation,
                        tokens_used,
                        ..
                    } => subflow.tally(&task_id).tokens += tokens_used,
                    _ => {}
                }
                subflow.resum();
                let snapshot = subflow.stats.clone();

                let inner_type = event_type(&inner.kind);
                let (node_id, node_kind) = node_of(&inner.kind);
                let mut payload = payload_of(&inner.kind);
                payload.insert("task_id".into(), json!(task_id));
                payload.insert("inner_event_type".into(), json!(inner_type));
                payload.insert("subflow".into(), json!(snapshot));

                Some(WorkflowEnvelope {
                    version: ENVELOPE_VERSION,
                    event_type: if finished {
                        "workflow.subflow.completed".into()
                    } else {
                        "workflow.subflow.progress".into()
                    },
                    workflow_id: inner.base.correlation_id.clone(),
                    base: inner.base,
                    node_id,
                    node_kind,
                    is_subtask: true,
                    subtask_index: Some(index),
                    total_subtasks: Some(total),
                    subtask_preview: Some(preview),
                    payload: Value::Object(payload),
                })
            }

            kind => {
                if is_internal(&kind) {
                    return None;
                }
                let mut payload = payload_of(&kind);
                match &kind {
                    EventKind::BackgroundDispatched { .. } => {
                        let subflow = self.subflows.entry(parent_run.clone()).or_default();
                        subflow.stats.total += 1;
                        payload.insert("subflow".into(), json!(subflow.stats));
                    }
                    EventKind::BackgroundCompleted {
                        task_id,
                        status,
                        tokens,
                        tool_calls,
                        ..
                    } => {
                        let subflow = self.subflows.entry(parent_run.clone()).or_default();
                        subflow.stats.completed += 1;
                        if *status == BackgroundTaskStatus::Done {
                            subflow.stats.succeeded += 1;
                        } else {
                            subflow.stats.failed += 1;
                        }
                        // The final report covers whatever was streamed live for this task.
                        let tally = subflow.tally(task_id);
                        tally.tokens = tally.tokens.max(*tokens);
                        tally.tool_calls = tally.tool_calls.max(*tool_calls);
                        subflow.resum();
                        payload.insert("subflow".into(), json!(subflow.stats));
                        if subflow.stats.finished() {
                            self.subflows.remove(&parent_run);
                        }
                    }
                    _ => {}
                }

                let (node_id, node_kind) = node_of(&kind);
                Some(WorkflowEnvelope {
                    version: ENVELOPE_VERSION,
                    event_type: event_type(&kind).into(),
                    workflow_id: base.correlation_id.clone(),
                    base,
                    node_id,
                    node_kind,
                    is_subtask: false,
                    subtask_index: None,
                    total_subtasks: None,
                    subtask_preview: None,
                    payload: Value::Object(payload),
                })
            }
        }
    }
}

/// Semantic type string of an event.
pub fn event_type(kind: &EventKind) -> &'static str {
    match kind {
        EventKind::LifecycleUpdated { .. } => "workflow.lifecycle.updated",
        EventKind::NodeStarted { .. } => "workflow.node.started",
        EventKind::NodeOutputDelta { .. } => "workflow.node.output.delta",
        EventKind::NodeOutputSummary { .. } => "workflow.node.output.summary",
        EventKind::NodeCompleted { .. } => "workflow.node.completed",
        EventKind::NodeFailed { .. } => "workflow.node.failed",
        EventKind::ToolStarted { .. } => "workflow.tool.started",
        EventKind::ToolProgress { .. } => "workflow.tool.progress",
        EventKind::ToolCompleted { .. } => "workflow.tool.completed",
        EventKind::OrchestratorCorrection { .. } => "workflow.orchestrator.correction",
        EventKind::ReplanRequested { .. } => "workflow.replan.requested",
        EventKind::InputRequested { .. } => "workflow.input.requested",
        EventKind::InputResolved { .. } => "workflow.input.resolved",
        EventKind::BackgroundDispatched { .. } => "workflow.background.dispatched",
        EventKind::BackgroundCompleted { .. } => "workflow.background.completed",
        EventKind::Subtask { .. } => "workflow.subflow.progress",
        EventKind::CheckpointSaved { .. } => "workflow.checkpoint.saved",
        EventKind::Diagnostic { .. } => "workflow.diagnostic",
        EventKind::ResultFinal { .. } => "workflow.result.final",
        EventKind::ResultCancelled { .. } => "workflow.result.cancelled",
    }
}

fn innermost(event: AgentEvent) -> AgentEvent {
    match event.kind {
        EventKind::Subtask { event: inner, .. } => innermost(*inner),
        kind => AgentEvent {
            base: event.base,
            kind,
        },
    }
}

fn is_internal(kind: &EventKind) -> bool {
    kind.node()
        .is_some_and(|(id, _)| id.starts_with(INTERNAL_NODE_PREFIX))
}

fn node_of(kind: &EventKind) -> (Option<String>, Option<NodeKind>) {
    match kind.node() {
        Some((id, node_kind)) => (Some(id.to_string()), Some(node_kind)),
        None => (None, None),
    }
}

fn payload_of(kind: &EventKind) -> Map<String, Value> {
    match serde_json::to_value(kind) {
        Ok(Value::Object(mut map)) => {
            map.remove("kind");
            map
        }
        _ => Map::new(),
    }
}

/// Whether an envelope ends the run it belongs to.
pub fn is_terminal(envelope: &WorkflowEnvelope) -> bool {
    if envelope.is_subtask {
        return false;
    }
    match envelope.event_type.as_str() {
        "workflow.result.cancelled" => true,
        "workflow.result.final" => {
            envelope.payload.get("stream_finished").and_then(Value::as_bool) == Some(true)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskloop_core::{RunIds, StopReason, Usage};

    fn node_started(ids: &RunIds, node_id: &str) -> AgentEvent {
        AgentEvent::new(
            ids,
            EventKind::NodeStarted {
                node_id: node_id.into(),
                node_kind: NodeKind::Node,
                iteration: None,
                max_iterations: None,
            },
        )
    }

    #[test]
    fn internal_nodes_are_filtered() {
        let ids = RunIds::root("s");
        let mut translator = WorkflowEventTranslator::new();
        assert!(translator.translate(node_started(&ids, "__gate")).is_none());
        let env = translator.translate(node_started(&ids, "iteration-1")).unwrap();
        assert_eq!(env.event_type, "workflow.node.started");
        assert_eq!(env.node_id.as_deref(), Some("iteration-1"));
        assert_eq!(env.workflow_id, ids.run_id);
        assert!(env.payload.get("kind").is_none());
    }

    #[test]
    fn subtask_events_aggregate_then_reset() {
        let parent = RunIds::root("s");
        let child = parent.child(Some("call-1".into()));
        let mut translator = WorkflowEventTranslator::new();

        translator.translate(AgentEvent::new(
            &parent,
            EventKind::BackgroundDispatched {
                task_id: "t1".into(),
                description: "d".into(),
                agent_type: "internal".into(),
            },
        ));

        let wrap = |kind: EventKind| {
            AgentEvent::new(
                &parent,
                EventKind::Subtask {
                    task_id: "t1".into(),
                    index: 0,
                    total: 1,
                    preview: "d".into(),
                    event: Box::new(AgentEvent::new(&child, kind)),
                },
            )
        };

        let env = translator
            .translate(wrap(EventKind::ToolCompleted {
                call_id: "c1".into(),
                tool_name: "read".into(),
                content_preview: String::new(),
                error: None,
                duration_ms: 1,
                attachments: 0,
            }))
            .unwrap();
        assert!(env.is_subtask);
        assert_eq!(env.base.run_id, child.run_id);
        assert_eq!(env.event_type, "workflow.subflow.progress");
        assert_eq!(env.payload["subflow"]["tool_calls"], 1);

        let env = translator
            .translate(wrap(EventKind::ResultFinal {
                answer: "done".into(),
                stop_reason: StopReason::EndTurn,
                iterations: 1,
                usage: Usage::default(),
                streaming: false,
                stream_finished: true,
            }))
            .unwrap();
        assert_eq!(env.event_type, "workflow.subflow.completed");

        translator.translate(AgentEvent::new(
            &parent,
            EventKind::BackgroundCompleted {
                task_id: "t1".into(),
                status: BackgroundTaskStatus::Done,
                summary: "done".into(),
                tokens: 10,
                iterations: 1,
                tool_calls: 1,
            },
        ));
        assert!(translator.subflow(&parent.run_id).is_none());
    }

    #[test]
    fn parallel_subtasks_sum_their_usage() {
        let parent = RunIds::root("s");
        let mut translator = WorkflowEventTranslator::new();
        for id in ["t1", "t2"] {
            translator.translate(AgentEvent::new(
                &parent,
                EventKind::BackgroundDispatched {
                    task_id: id.into(),
                    description: "d".into(),
                    agent_type: "external".into(),
                },
            ));
        }

        let completed = |id: &str, tool_calls: usize| {
            AgentEvent::new(
                &parent,
                EventKind::BackgroundCompleted {
                    task_id: id.into(),
                    status: BackgroundTaskStatus::Done,
                    summary: "ok".into(),
                    tokens: 10,
                    iterations: 1,
                    tool_calls,
                },
            )
        };

        let env = translator.translate(completed("t1", 2)).unwrap();
        assert_eq!(env.payload["subflow"]["tokens"], 10);
        assert_eq!(translator.subflow(&parent.run_id).map(|s| s.tool_calls), Some(2));

        let env = translator.translate(completed("t2", 3)).unwrap();
        assert_eq!(env.payload["subflow"]["tokens"], 20);
        assert_eq!(env.payload["subflow"]["tool_calls"], 5);
        assert_eq!(env.payload["subflow"]["completed"], 2);
        assert!(translator.subflow(&parent.run_id).is_none());
    }

    #[test]
    fn streamed_usage_is_not_counted_twice() {
        let parent = RunIds::root("s");
        let child = parent.child(Some("call-1".into()));
        let mut translator = WorkflowEventTranslator::new();
        for id in ["t1", "t2"] {
            translator.translate(AgentEvent::new(
                &parent,
                EventKind::BackgroundDispatched {
                    task_id: id.into(),
                    description: "d".into(),
                    agent_type: "internal".into(),
                },
            ));
        }

        let env = translator
            .translate(AgentEvent::new(
                &parent,
                EventKind::Subtask {
                    task_id: "t1".into(),
                    index: 0,
                    total: 2,
                    preview: "d".into(),
                    event: Box::new(AgentEvent::new(
                        &child,
                        EventKind::NodeCompleted {
                            node_id: "iteration-1".into(),
                            node_kind: NodeKind::Generation,
                            iteration: Some(1),
                            tokens_used: 6,
                            tool_calls: 0,
                            output: None,
                        },
                    )),
                },
            ))
            .unwrap();
        assert_eq!(env.payload["subflow"]["tokens"], 6);

        let env = translator
            .translate(AgentEvent::new(
                &parent,
                EventKind::BackgroundCompleted {
                    task_id: "t1".into(),
                    status: BackgroundTaskStatus::Done,
                    summary: "ok".into(),
                    tokens: 8,
                    iterations: 1,
                    tool_calls: 0,
                },
            ))
            .unwrap();
        assert_eq!(env.payload["subflow"]["tokens"], 8);
        assert_eq!(translator.subflow(&parent.run_id).map(|s| s.tokens), Some(8));
    }
}
