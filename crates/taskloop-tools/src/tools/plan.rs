//! Plan tool: records the task goal and its complexity before any action.

use crate::registry::{Tool, ToolContext, ToolError, ToolOutput};
use serde_json::{json, Value};

pub struct PlanTool;

#[async_trait::async_trait]
impl Tool for PlanTool {
    fn name(&self) -> &str {
        super::PLAN_TOOL
    }

    fn description(&self) -> &str {
        "Record the plan for the current task. Must be called alone, before any action tool."
    }

    fn prompt(&self) -> &str {
        "Call plan() first with the user-facing goal and whether the task is simple or complex. \
         Complex tasks must then call clarify() before acting. Call plan() again to replan."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["overall_goal_ui", "complexity"],
            "properties": {
                "overall_goal_ui": { "type": "string", "description": "Goal as shown to the user" },
                "complexity": { "type": "string", "enum": ["simple", "complex"] },
                "steps": { "type": "array", "items": { "type": "string" } },
                "internal_plan": { "type": "object" }
            }
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        let goal = args
            .get("overall_goal_ui")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .ok_or_else(|| ToolError::invalid("overall_goal_ui must not be empty"))?;
        let complexity = args
            .get("complexity")
            .and_then(Value::as_str)
            .unwrap_or("simple");
        let steps = args.get("steps").cloned().unwrap_or_else(|| json!([]));

        Ok(ToolOutput::text(format!("Plan recorded ({}): {}", complexity, goal))
            .with_metadata("overall_goal_ui", json!(goal))
            .with_metadata("complexity", json!(complexity))
            .with_metadata("steps", steps))
    }
}
