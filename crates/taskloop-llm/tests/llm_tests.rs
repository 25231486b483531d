//! Tests for taskloop-llm: types, error classification, scripted provider, retry decorator

use futures::StreamExt;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use taskloop_core::LlmRetryConfig;
use taskloop_llm::*;

async fn drain(stream: LlmStream) -> (String, Vec<AccumulatedToolCall>, Option<String>) {
    let mut text = String::new();
    let mut calls = Vec::new();
    let mut current: Option<AccumulatedToolCall> = None;
    let mut error = None;
    tokio::pin!(stream);
    while let Some(delta) = stream.next().await {
        match delta {
            Ok(StreamDelta::Text(t)) => text.push_str(&t),
            Ok(StreamDelta::ToolCallStart { id, name }) => {
                current = Some(AccumulatedToolCall { id, name, arguments: String::new() })
            }
            Ok(StreamDelta::ToolCallDelta { arguments, .. }) => {
                if let Some(c) = current.as_mut() {
                    c.arguments.push_str(&arguments);
                }
            }
            Ok(StreamDelta::ToolCallEnd { .. }) => calls.extend(current.take()),
            Ok(_) => {}
            Err(e) => error = Some(e.to_string()),
        }
    }
    (text, calls, error)
}

// ===========================================================================
// Types
// ===========================================================================

#[test]
fn llm_request_default() {
    let req = LlmRequest::default();
    assert!(req.messages.is_empty());
    assert!(!req.has_tools());
    assert_eq!(req.max_tokens, Some(8192));
}

#[test]
fn message_text_skips_tool_blocks() {
    let msg = LlmMessage::blocks(
        "assistant",
        vec![
            ContentBlock::Text { text: "thinking ".into() },
            ContentBlock::ToolUse { id: "t1".into(), name: "plan".into(), input: json!({}) },
            ContentBlock::Text { text: "aloud".into() },
        ],
    );
    assert_eq!(msg.text(), "thinking aloud");
    assert!(msg.has_tool_use());
    assert!(!msg.has_tool_results());
}

#[test]
fn content_blocks_roundtrip_through_json() {
    let msg = LlmMessage::blocks(
        "user",
        vec![ContentBlock::ToolResult {
            tool_use_id: "t1".into(),
            content: "ok".into(),
            is_error: Some(true),
        }],
    );
    let json = serde_json::to_string(&msg).unwrap();
    assert!(json.contains(r#""type":"tool_result""#));
    let back: LlmMessage = serde_json::from_str(&json).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn empty_arguments_parse_as_object() {
    let call = AccumulatedToolCall { id: "1".into(), name: "plan".into(), arguments: " ".into() };
    assert_eq!(call.parse_arguments().unwrap(), json!({}));
    let bad = AccumulatedToolCall { arguments: "{nope".into(), ..call };
    assert!(bad.parse_arguments().is_err());
}

// ===========================================================================
// LlmError
// ===========================================================================

#[test]
fn error_classification() {
    assert!(LlmError::RateLimited { retry_after_ms: 10 }.is_recoverable());
    assert!(LlmError::NetworkError("reset".into()).is_recoverable());
    assert!(!LlmError::AuthFailed("bad key".into()).is_recoverable());
    assert!(!LlmError::ContextOverflow("too long".into()).is_recoverable());
    assert!(!LlmError::Cancelled.is_recoverable());
}

// ===========================================================================
// ScriptedProvider
// ===========================================================================

#[tokio::test]
async fn scripted_text_streams_in_chunks() {
    let provider = ScriptedProvider::sequence(vec![ScriptedTurn::text("a".repeat(45))]);
    let stream = provider.complete_stream(LlmRequest::default(), None).await.unwrap();
    let (text, calls, error) = drain(stream).await;
    assert_eq!(text.len(), 45);
    assert!(calls.is_empty());
    assert!(error.is_none());
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn scripted_tool_calls_get_stable_ids() {
    let provider = ScriptedProvider::sequence(vec![ScriptedTurn::calls(vec![
        ScriptedCall::new("read", json!({"path": "a"})),
        ScriptedCall::new("read", json!({"path": "b"})).with_id("custom"),
    ])]);
    let stream = provider.complete_stream(LlmRequest::default(), None).await.unwrap();
    let (_, calls, _) = drain(stream).await;
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].id, "call_1_1");
    assert_eq!(calls[1].id, "custom");
    assert_eq!(calls[1].parse_arguments().unwrap(), json!({"path": "b"}));
}

#[tokio::test]
async fn scripted_exhaustion_uses_fallback() {
    let provider = ScriptedProvider::sequence(vec![]).with_fallback(ScriptedTurn::text("fallback"));
    let stream = provider.complete_stream(LlmRequest::default(), None).await.unwrap();
    assert_eq!(drain(stream).await.0, "fallback");
}

#[tokio::test]
async fn scripted_stall_ends_on_cancel() {
    let provider = ScriptedProvider::constant(ScriptedTurn::Stall { text: "partial".into() });
    let cancel = CancellationToken::new();
    let stream = provider
        .complete_stream(LlmRequest::default(), Some(cancel.clone()))
        .await
        .unwrap();
    let handle = tokio::spawn(drain(stream));
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    cancel.cancel();
    let (text, _, error) = handle.await.unwrap();
    assert_eq!(text, "partial");
    assert_eq!(error.as_deref(), Some("cancelled"));
}

#[tokio::test]
async fn scripted_records_requests() {
    let provider = ScriptedProvider::constant(ScriptedTurn::text("ok"));
    let request = LlmRequest {
        tools: Some(vec![LlmTool {
            name: "plan".into(),
            description: "plan".into(),
            input_schema: json!({"type": "object"}),
        }]),
        ..Default::default()
    };
    let _ = provider.complete_stream(request, None).await.unwrap();
    let _ = provider.complete_stream(LlmRequest::default(), None).await.unwrap();
    let requests = provider.requests();
    assert!(requests[0].has_tools());
    assert!(!requests[1].has_tools());
}

// ===========================================================================
// RetryingProvider
// ===========================================================================

struct Flaky {
    failures: AtomicUsize,
    error: LlmError,
}

#[async_trait::async_trait]
impl LlmProvider for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }
    fn models(&self) -> &[&str] {
        &["flaky"]
    }
    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream> {
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(self.error.clone());
        }
        ScriptedProvider::constant(ScriptedTurn::text("recovered"))
            .complete_stream(request, cancel)
            .await
    }
}

fn fast_retry(max_attempts: u32) -> LlmRetryConfig {
    LlmRetryConfig { max_attempts, initial_backoff_ms: 1, max_backoff_ms: 5 }
}

#[tokio::test]
async fn retry_recovers_from_transient_failures() {
    let inner = Arc::new(Flaky {
        failures: AtomicUsize::new(2),
        error: LlmError::NetworkError("reset".into()),
    });
    let provider = RetryingProvider::new(inner, fast_retry(3));
    let stream = provider.complete_stream(LlmRequest::default(), None).await.unwrap();
    assert_eq!(drain(stream).await.0, "recovered");
}

#[tokio::test]
async fn retry_gives_up_after_max_attempts() {
    let inner = Arc::new(Flaky {
        failures: AtomicUsize::new(5),
        error: LlmError::RequestFailed("503".into()),
    });
    let provider = RetryingProvider::new(inner.clone(), fast_retry(3));
    let err = provider.complete_stream(LlmRequest::default(), None).await.err().unwrap();
    assert!(matches!(err, LlmError::RequestFailed(_)));
    assert_eq!(inner.failures.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn retry_skips_non_recoverable() {
    let inner = Arc::new(Flaky {
        failures: AtomicUsize::new(1),
        error: LlmError::AuthFailed("bad key".into()),
    });
    let provider = RetryingProvider::new(inner.clone(), fast_retry(3));
    assert!(provider.complete_stream(LlmRequest::default(), None).await.is_err());
    assert_eq!(inner.failures.load(Ordering::SeqCst), 0);
}
