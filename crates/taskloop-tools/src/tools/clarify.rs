//! Clarify tool: pins down one task's goal and success criteria, optionally
//! pausing for the user.

use crate::registry::{Tool, ToolContext, ToolError, ToolOutput};
use serde_json::{json, Value};

pub struct ClarifyTool;

#[async_trait::async_trait]
impl Tool for ClarifyTool {
    fn name(&self) -> &str {
        super::CLARIFY_TOOL
    }

    fn description(&self) -> &str {
        "State the goal and success criteria of the next task. Set needs_user_input to ask the user first."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["task_id", "task_goal_ui"],
            "properties": {
                "task_id": { "type": "string" },
                "task_goal_ui": { "type": "string" },
                "success_criteria": { "type": "array", "items": { "type": "string" } },
                "needs_user_input": { "type": "boolean" },
                "question_to_user": { "type": "string" }
            }
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        let task_id = args.get("task_id").and_then(Value::as_str).unwrap_or_default();
        let goal = args.get("task_goal_ui").and_then(Value::as_str).unwrap_or_default();
        let needs_user_input = args
            .get("needs_user_input")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let question = args
            .get("question_to_user")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty());

        if needs_user_input && question.is_none() {
            return Err(ToolError::invalid(
                "question_to_user is required when needs_user_input is true",
            ));
        }

        let content = match question {
            Some(q) if needs_user_input => format!("Waiting for user: {}", q),
            _ => format!("Task {} clarified: {}", task_id, goal),
        };
        Ok(ToolOutput::text(content)
            .with_metadata("task_id", json!(task_id))
            .with_metadata("needs_user_input", json!(needs_user_input))
            .with_metadata("question_to_user", json!(question)))
    }
}
