//! ScriptedProvider: deterministic LLM responses
//!
//! Each call to `complete_stream` pops the next scripted turn and streams it
//! back as deltas, the way a real provider would. Used by tests and by the
//! CLI harness to drive the runtime without network access.

use crate::provider::{LlmError, LlmProvider, LlmResult, LlmStream};
use crate::types::{LlmRequest, StreamDelta, Usage};
use async_stream::stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A tool call the script asks for.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScriptedCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ScriptedCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            args,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// One model turn.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptedTurn {
    /// Text-only answer.
    Text { text: String },
    /// Optional text followed by tool calls.
    ToolCalls {
        #[serde(default)]
        text: Option<String>,
        calls: Vec<ScriptedCall>,
    },
    /// Fail before any delta is produced.
    Fail { message: String, recoverable: bool },
    /// Stream some text, then fail mid-stream.
    BreakMidStream { text: String, message: String },
    /// Stream some text, then hang until cancelled.
    Stall { text: String },
}

impl ScriptedTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn call(name: impl Into<String>, args: Value) -> Self {
        Self::ToolCalls {
            text: None,
            calls: vec![ScriptedCall::new(name, args)],
        }
    }

    pub fn calls(calls: Vec<ScriptedCall>) -> Self {
        Self::ToolCalls { text: None, calls }
    }
}

pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    fallback: ScriptedTurn,
    requests: Mutex<Vec<LlmRequest>>,
    chunk_chars: usize,
}

impl ScriptedProvider {
    /// Turns are consumed in order; once exhausted every call returns `fallback`.
    pub fn sequence(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            fallback: ScriptedTurn::text("(script exhausted)"),
            requests: Mutex::new(Vec::new()),
            chunk_chars: 20,
        }
    }

    /// Always answer with the same turn.
    pub fn constant(turn: ScriptedTurn) -> Self {
        Self {
            fallback: turn,
            ..Self::sequence(Vec::new())
        }
    }

    /// Parse a JSON array of turns.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let turns: Vec<ScriptedTurn> = serde_json::from_str(json)?;
        Ok(Self::sequence(turns))
    }

    pub fn with_fallback(mut self, turn: ScriptedTurn) -> Self {
        self.fallback = turn;
        self
    }

    /// Number of `complete_stream` calls so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next_turn(&self, request: &LlmRequest) -> (usize, ScriptedTurn) {
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        requests.push(request.clone());
        let index = requests.len();
        drop(requests);

        let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        let turn = turns.pop_front().unwrap_or_else(|| self.fallback.clone());
        (index, turn)
    }
}

fn estimate_input(request: &LlmRequest) -> u32 {
    let chars: usize = request.messages.iter().map(|m| m.text().len()).sum();
    (chars / 4) as u32
}

fn chunks(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn models(&self) -> &[&str] {
        &["scripted"]
    }

    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream> {
        let (index, turn) = self.next_turn(&request);
        let input_tokens = estimate_input(&request);
        let chunk_chars = self.chunk_chars;
        let cancel = cancel.unwrap_or_else(CancellationToken::new);

        if let ScriptedTurn::Fail {
            message,
            recoverable,
        } = &turn
        {
            return Err(if *recoverable {
                LlmError::RequestFailed(message.clone())
            } else {
                LlmError::InvalidResponse(message.clone())
            });
        }

        Ok(Box::pin(stream! {
            match turn {
                ScriptedTurn::Text { text } => {
                    for chunk in chunks(&text, chunk_chars) {
                        if cancel.is_cancelled() {
                            yield Err(LlmError::Cancelled);
                            return;
                        }
                        yield Ok(StreamDelta::Text(chunk));
                    }
                    let usage = Usage { input_tokens, output_tokens: (text.len() / 4) as u32 };
                    yield Ok(StreamDelta::Done { stop_reason: Some("end_turn".into()), usage: Some(usage) });
                }

                ScriptedTurn::ToolCalls { text, calls } => {
                    let mut output_chars = 0;
                    if let Some(text) = text {
                        output_chars += text.len();
                        yield Ok(StreamDelta::Text(text));
                    }
                    for (i, call) in calls.into_iter().enumerate() {
                        let id = call.id.unwrap_or_else(|| format!("call_{}_{}", index, i + 1));
                        let arguments = serde_json::to_string(&call.args).unwrap_or_default();
                        output_chars += arguments.len();
                        yield Ok(StreamDelta::ToolCallStart { id: id.clone(), name: call.name });
                        yield Ok(StreamDelta::ToolCallDelta { id: id.clone(), arguments });
                        yield Ok(StreamDelta::ToolCallEnd { id });
                    }
                    let usage = Usage { input_tokens, output_tokens: (output_chars / 4) as u32 };
                    yield Ok(StreamDelta::Done { stop_reason: Some("tool_use".into()), usage: Some(usage) });
                }

                ScriptedTurn::BreakMidStream { text, message } => {
                    yield Ok(StreamDelta::Text(text));
                    yield Err(LlmError::StreamError(message));
                }

                ScriptedTurn::Stall { text } => {
                    yield Ok(StreamDelta::Text(text));
                    cancel.cancelled().await;
                    yield Err(LlmError::Cancelled);
                }

                ScriptedTurn::Fail { .. } => {}
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_respect_char_boundaries() {
        let parts = chunks("héllo wörld", 4);
        assert_eq!(parts.concat(), "héllo wörld");
        assert_eq!(parts[0].chars().count(), 4);
    }

    #[test]
    fn script_parses_from_json() {
        let provider = ScriptedProvider::from_json(
            r#"[{"type":"tool_calls","calls":[{"name":"plan","args":{"overall_goal_ui":"x"}}]},
                {"type":"text","text":"done"}]"#,
        )
        .unwrap();
        assert_eq!(provider.call_count(), 0);
    }
}
