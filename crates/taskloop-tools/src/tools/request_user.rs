//! Request-user tool: pauses the task until the user answers.

use crate::registry::{Tool, ToolContext, ToolError, ToolOutput};
use serde_json::{json, Value};

pub struct RequestUserTool;

#[async_trait::async_trait]
impl Tool for RequestUserTool {
    fn name(&self) -> &str {
        super::REQUEST_USER_TOOL
    }

    fn description(&self) -> &str {
        "Ask the user a question and pause until they reply."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["question"],
            "properties": {
                "question": { "type": "string" },
                "options": { "type": "array", "items": { "type": "string" } }
            }
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        let question = args
            .get("question")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::invalid("question must not be empty"))?;
        let options = args.get("options").cloned().unwrap_or_else(|| json!([]));

        Ok(ToolOutput::text(format!("Waiting for user: {}", question))
            .with_metadata("needs_user_input", json!(true))
            .with_metadata("question_to_user", json!(question))
            .with_metadata("options", options))
    }
}
