//! Orchestrator gates: which tool calls the loop lets through, and when.
//!
//! Rules, checked per batch before anything runs:
//! - `plan`, `clarify` and `request_user` are the only call in their batch.
//! - No action tool runs before a `plan` result has been committed.
//! - A plan marked complex needs a committed `clarify` before the first action.
//!
//! A rejected batch is never executed; the loop injects the correction and
//! thinks again.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskloop_core::{ToolCall, ToolResult};
use taskloop_tools::{is_orchestration_tool, CLARIFY_TOOL, PLAN_TOOL, REQUEST_USER_TOOL};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorState {
    /// Number of committed plans. Above one means the task was replanned.
    pub plan_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<String>,
    pub clarified: bool,
    pub action_taken: bool,
    /// A replan prompt was injected for the current plan version.
    pub replan_injected: bool,
}

impl OrchestratorState {
    pub fn planned(&self) -> bool {
        self.plan_version > 0
    }

    pub fn is_complex(&self) -> bool {
        self.complexity.as_deref() == Some("complex")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateViolation {
    pub reason: String,
    pub rejected: Vec<String>,
}

impl GateViolation {
    fn new(reason: impl Into<String>, calls: &[ToolCall]) -> Self {
        Self {
            reason: reason.into(),
            rejected: calls.iter().map(|c| c.name.clone()).collect(),
        }
    }

    /// Message injected into the conversation after a rejected batch.
    pub fn correction(&self) -> String {
        format!(
            "Your tool calls ({}) were not executed: {}",
            self.rejected.join(", "),
            self.reason
        )
    }
}

/// Check a batch against the gates.
pub fn check_batch(
    state: &OrchestratorState,
    calls: &[ToolCall],
    clarify_complex: bool,
) -> Result<(), GateViolation> {
    if calls.len() > 1 && calls.iter().any(|c| is_orchestration_tool(&c.name)) {
        return Err(GateViolation::new(
            format!(
                "`{}`, `{}` and `{}` must be called alone.",
                PLAN_TOOL, CLARIFY_TOOL, REQUEST_USER_TOOL
            ),
            calls,
        ));
    }

    let acts = calls.iter().any(|c| !is_orchestration_tool(&c.name));
    let clarifies = calls.iter().any(|c| c.name == CLARIFY_TOOL);
    if (acts || clarifies) && !state.planned() {
        return Err(GateViolation::new(
            "call plan() with the goal and complexity before any other tool.",
            calls,
        ));
    }
    if acts && clarify_complex && state.is_complex() && !state.clarified {
        return Err(GateViolation::new(
            "this task is complex; call clarify() before acting.",
            calls,
        ));
    }
    Ok(())
}

/// What the loop should do after a committed result.
#[derive(Debug, Clone, PartialEq)]
pub enum Followup {
    None,
    /// The call failed after a plan; ask for a revised plan.
    Replan { message: String },
    /// The call asked for user input.
    Pause { question: String },
}

/// Fold one committed result into the gate state.
pub fn observe(state: &mut OrchestratorState, call: &ToolCall, result: &ToolResult) -> Followup {
    if let Some(err) = &result.error {
        if !is_orchestration_tool(&call.name) && state.planned() && !state.replan_injected {
            state.replan_injected = true;
            return Followup::Replan {
                message: format!(
                    "Tool `{}` failed: {}. Revise your plan with plan() before continuing.",
                    call.name, err
                ),
            };
        }
        return Followup::None;
    }

    match call.name.as_str() {
        PLAN_TOOL => {
            state.plan_version += 1;
            state.complexity = result
                .metadata
                .get("complexity")
                .and_then(Value::as_str)
                .map(String::from);
            state.replan_injected = false;
        }
        CLARIFY_TOOL => state.clarified = true,
        REQUEST_USER_TOOL => {}
        _ => state.action_taken = true,
    }

    let wants_input = result
        .metadata
        .get("needs_user_input")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if wants_input {
        let question = result
            .metadata
            .get("question_to_user")
            .and_then(Value::as_str)
            .filter(|q| !q.trim().is_empty())
            .unwrap_or(&result.content)
            .to_string();
        return Followup::Pause { question };
    }
    Followup::None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskloop_core::ToolFailure;

    fn call(name: &str) -> ToolCall {
        ToolCall::new(format!("id-{}", name), name, json!({}))
    }

    fn planned(complexity: &str) -> OrchestratorState {
        OrchestratorState {
            plan_version: 1,
            complexity: Some(complexity.into()),
            ..Default::default()
        }
    }

    #[test]
    fn action_before_plan_is_rejected() {
        let err = check_batch(&OrchestratorState::default(), &[call("read")], true).unwrap_err();
        assert_eq!(err.rejected, vec!["read".to_string()]);
        assert!(check_batch(&OrchestratorState::default(), &[call("plan")], true).is_ok());
        assert!(check_batch(&OrchestratorState::default(), &[call("request_user")], true).is_ok());
    }

    #[test]
    fn orchestration_calls_must_be_alone() {
        let err = check_batch(&planned("simple"), &[call("plan"), call("read")], true).unwrap_err();
        assert!(err.reason.contains("alone"));
    }

    #[test]
    fn complex_plans_need_clarify() {
        assert!(check_batch(&planned("complex"), &[call("read")], true).is_err());
        assert!(check_batch(&planned("complex"), &[call("read")], false).is_ok());
        let mut state = planned("complex");
        state.clarified = true;
        assert!(check_batch(&state, &[call("read"), call("write")], true).is_ok());
    }

    #[test]
    fn first_failure_after_plan_requests_one_replan() {
        let mut state = planned("simple");
        let read = call("read");
        let failed = ToolResult::failure(&read, ToolFailure::new(taskloop_core::ToolFailureKind::Execution, "gone"));
        assert!(matches!(observe(&mut state, &read, &failed), Followup::Replan { .. }));
        assert_eq!(observe(&mut state, &read, &failed), Followup::None);

        let plan = call("plan");
        let mut replanned = ToolResult::success(&plan, "Plan recorded");
        replanned.metadata.insert("complexity".into(), json!("simple"));
        observe(&mut state, &plan, &replanned);
        assert_eq!(state.plan_version, 2);
        assert!(!state.replan_injected);
    }

    #[test]
    fn request_user_pauses_with_question() {
        let mut state = OrchestratorState::default();
        let ask = call("request_user");
        let mut result = ToolResult::success(&ask, "Waiting");
        result.metadata.insert("needs_user_input".into(), json!(true));
        result.metadata.insert("question_to_user".into(), json!("Which branch?"));
        assert_eq!(
            observe(&mut state, &ask, &result),
            Followup::Pause { question: "Which branch?".into() }
        );
    }
}
