//! Tests for taskloop-tools: registry, invocation pipeline, batch executor, builtin tools

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskloop_core::{
    ApprovalConfig, Attachment, BackgroundOutcome, BackgroundTaskSummary, BreakerConfig,
    ChannelSink, DispatchRequest, Error, EventKind, ExecutionContext, InputResponse, RetryConfig,
    RunIds, ToolCall, ToolFailureKind, INTERNAL_AGENT_TYPE,
};
use taskloop_tools::tools::{ClarifyTool, PlanTool, RequestUserTool};
use taskloop_tools::*;

// ===========================================================================
// Test tools
// ===========================================================================

struct Echo;

#[async_trait::async_trait]
impl Tool for Echo {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echo text back"
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["text"],
            "properties": { "text": { "type": "string" } }
        })
    }
    fn is_read_only(&self) -> bool {
        true
    }
    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        ctx.progress("echoing");
        let text = args["text"].as_str().unwrap_or_default().to_string();
        Ok(ToolOutput::text(text.clone()).with_attachment(Attachment {
            name: format!("{}.txt", text),
            media_type: "text/plain".into(),
            uri: None,
            data: Some(text),
        }))
    }
}

/// Sleeps for `ms` and tracks how many instances run at once.
#[derive(Clone, Default)]
struct Sleepy {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    finished: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl Tool for Sleepy {
    fn name(&self) -> &str {
        "sleepy"
    }
    fn description(&self) -> &str {
        "Sleep"
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["ms", "label"],
            "properties": { "ms": { "type": "integer" }, "label": { "type": "string" } }
        })
    }
    fn is_read_only(&self) -> bool {
        true
    }
    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<ToolOutput, ToolError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(args["ms"].as_u64().unwrap_or(0))).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        let label = args["label"].as_str().unwrap_or_default().to_string();
        self.finished.lock().unwrap().push(label.clone());
        Ok(ToolOutput::text(label))
    }
}

/// Fails with `error` for the first `fail_first` calls.
struct Flaky {
    calls: Arc<AtomicUsize>,
    fail_first: usize,
    error: ToolError,
}

#[async_trait::async_trait]
impl Tool for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }
    fn description(&self) -> &str {
        "Fails sometimes"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _ctx: &ToolContext, _args: Value) -> Result<ToolOutput, ToolError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            Err(self.error.clone())
        } else {
            Ok(ToolOutput::text("ok"))
        }
    }
}

struct Destroy {
    runs: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Tool for Destroy {
    fn name(&self) -> &str {
        "destroy"
    }
    fn description(&self) -> &str {
        "Irreversible"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {"target": {"type": "string"}}})
    }
    fn is_dangerous(&self) -> bool {
        true
    }
    async fn execute(&self, _ctx: &ToolContext, _args: Value) -> Result<ToolOutput, ToolError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(ToolOutput::text("destroyed"))
    }
}

struct Hang;

#[async_trait::async_trait]
impl Tool for Hang {
    fn name(&self) -> &str {
        "hang"
    }
    fn description(&self) -> &str {
        "Never returns"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }
    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_millis(50))
    }
    async fn execute(&self, _ctx: &ToolContext, _args: Value) -> Result<ToolOutput, ToolError> {
        std::future::pending::<()>().await;
        Ok(ToolOutput::default())
    }
}

struct Panicky;

#[async_trait::async_trait]
impl Tool for Panicky {
    fn name(&self) -> &str {
        "panicky"
    }
    fn description(&self) -> &str {
        "Panics"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _ctx: &ToolContext, _args: Value) -> Result<ToolOutput, ToolError> {
        panic!("boom");
    }
}

// ===========================================================================
// Helpers
// ===========================================================================

fn fast_config(max_retries: u32) -> PipelineConfig {
    PipelineConfig {
        retry: RetryPolicy::new(RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            backoff_factor: 2.0,
        }),
        approval: ApprovalConfig { auto_approve: false, timeout_secs: 0 },
        default_timeout: Duration::from_secs(5),
    }
}

fn breaker_config(threshold: u32) -> BreakerConfig {
    BreakerConfig {
        enabled: true,
        failure_threshold: threshold,
        window_secs: 60,
        cooldown_secs: 30,
        success_threshold: 1,
    }
}

fn pipeline(registry: ToolRegistry, config: PipelineConfig) -> ToolInvocationPipeline {
    ToolInvocationPipeline::new(
        Arc::new(registry),
        Arc::new(BreakerRegistry::new(breaker_config(5))),
        config,
    )
}

fn ctx() -> InvocationContext {
    InvocationContext::new(ExecutionContext::new(RunIds::root("test-session")))
}

fn registry_with(tools: Vec<Arc<dyn Tool>>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register_arc(tool);
    }
    registry
}

fn sleepy_call(id: &str, ms: u64) -> ToolCall {
    ToolCall::new(id, "sleepy", json!({"ms": ms, "label": id}))
}

// ===========================================================================
// Registry
// ===========================================================================

#[test]
fn default_registry_has_builtin_tools() {
    let registry = create_default_registry();
    let names: Vec<String> = registry.get_definitions().into_iter().map(|d| d.name).collect();
    assert_eq!(
        names,
        vec!["bg_collect", "bg_dispatch", "bg_reply", "bg_status", "clarify", "plan", "request_user"]
    );
    assert!(registry.list_read_only().contains(&"plan"));
    assert!(registry.combined_prompts().contains("plan()"));
}

#[test]
fn orchestration_tool_names() {
    assert!(is_orchestration_tool(PLAN_TOOL));
    assert!(is_orchestration_tool(REQUEST_USER_TOOL));
    assert!(!is_orchestration_tool("bg_dispatch"));
}

// ===========================================================================
// Pipeline: validate / lookup
// ===========================================================================

#[tokio::test]
async fn unknown_tool_is_not_found() {
    let p = pipeline(ToolRegistry::new(), fast_config(0));
    let result = p.invoke(&ctx(), &ToolCall::new("c1", "nope", json!({}))).await;
    let err = result.error.unwrap();
    assert_eq!(err.kind, ToolFailureKind::NotFound);
    assert_eq!(err.message, "tool not found: nope");
}

#[tokio::test]
async fn invalid_arguments_fail_closed_without_running() {
    let flaky = Arc::new(Flaky {
        calls: Arc::new(AtomicUsize::new(0)),
        fail_first: 0,
        error: ToolError::failed("x"),
    });
    let mut registry = registry_with(vec![flaky.clone()]);
    registry.register(Echo);
    let p = pipeline(registry, fast_config(0));

    let result = p.invoke(&ctx(), &ToolCall::new("c1", "echo", json!({"text": 5}))).await;
    let err = result.error.unwrap();
    assert_eq!(err.kind, ToolFailureKind::InvalidArguments);
    assert!(err.message.contains("/text"), "{}", err.message);
}

struct Bounded {
    runs: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Tool for Bounded {
    fn name(&self) -> &str {
        "bounded"
    }
    fn description(&self) -> &str {
        "Strict argument shape"
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "count": {"type": "integer", "minimum": 1},
                "name": {"type": "string", "pattern": "^[a-z]+$"},
                "target": {"oneOf": [{"type": "string"}, {"type": "integer"}]}
            },
            "required": ["count"]
        })
    }
    async fn execute(&self, _ctx: &ToolContext, _args: Value) -> Result<ToolOutput, ToolError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(ToolOutput::text("ran"))
    }
}

struct BrokenSchema {
    runs: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Tool for BrokenSchema {
    fn name(&self) -> &str {
        "broken"
    }
    fn description(&self) -> &str {
        "Declares an uncompilable schema"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {"n": {"minimum": "one"}}})
    }
    async fn execute(&self, _ctx: &ToolContext, _args: Value) -> Result<ToolOutput, ToolError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(ToolOutput::text("ran"))
    }
}

#[tokio::test]
async fn schema_keywords_beyond_types_are_enforced() {
    let runs = Arc::new(AtomicUsize::new(0));
    let p = pipeline(
        registry_with(vec![Arc::new(Bounded { runs: runs.clone() })]),
        fast_config(0),
    );

    let bad = json!({"count": -5, "name": "X!", "target": [1, 2]});
    let result = p.invoke(&ctx(), &ToolCall::new("c1", "bounded", bad)).await;
    let err = result.error.unwrap();
    assert_eq!(err.kind, ToolFailureKind::InvalidArguments);
    assert!(err.message.contains("/count"), "{}", err.message);
    assert!(err.message.contains("/name"), "{}", err.message);
    assert!(err.message.contains("/target"), "{}", err.message);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    let good = json!({"count": 2, "name": "abc", "target": "x"});
    let result = p.invoke(&ctx(), &ToolCall::new("c2", "bounded", good)).await;
    assert!(result.error.is_none());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn uncompilable_schema_rejects_calls() {
    let runs = Arc::new(AtomicUsize::new(0));
    let p = pipeline(
        registry_with(vec![Arc::new(BrokenSchema { runs: runs.clone() })]),
        fast_config(0),
    );
    let result = p.invoke(&ctx(), &ToolCall::new("c1", "broken", json!({"n": 3}))).await;
    let err = result.error.unwrap();
    assert_eq!(err.kind, ToolFailureKind::InvalidArguments);
    assert!(err.message.contains("does not compile"), "{}", err.message);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn successful_call_carries_output_and_attachments() {
    let p = pipeline(registry_with(vec![Arc::new(Echo)]), fast_config(0));
    let result = p.invoke(&ctx(), &ToolCall::new("c1", "echo", json!({"text": "hi"}))).await;
    assert!(result.error.is_none());
    assert_eq!(result.content, "hi");
    assert_eq!(result.call_id, "c1");
    assert_eq!(result.attachments.len(), 1);
}

// ===========================================================================
// Pipeline: approval
// ===========================================================================

#[tokio::test]
async fn approval_denied_aborts_call() {
    let runs = Arc::new(AtomicUsize::new(0));
    let p = pipeline(
        registry_with(vec![Arc::new(Destroy { runs: runs.clone() })]),
        fast_config(0),
    )
    .with_approver(Arc::new(StaticApprover(ApprovalDecision::RejectOnce)));

    let result = p.invoke(&ctx(), &ToolCall::new("c1", "destroy", json!({"target": "/"}))).await;
    assert_eq!(result.error.as_ref().map(|e| e.to_string()).as_deref(), Some("approval denied"));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn approval_allowed_runs_once() {
    let runs = Arc::new(AtomicUsize::new(0));
    let p = pipeline(
        registry_with(vec![Arc::new(Destroy { runs: runs.clone() })]),
        fast_config(0),
    )
    .with_approver(Arc::new(AutoApprover));
    let result = p.invoke(&ctx(), &ToolCall::new("c1", "destroy", json!({}))).await;
    assert!(result.error.is_none());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dangerous_tool_without_approver_is_denied() {
    let runs = Arc::new(AtomicUsize::new(0));
    let p = pipeline(
        registry_with(vec![Arc::new(Destroy { runs: runs.clone() })]),
        fast_config(0),
    );
    let result = p.invoke(&ctx(), &ToolCall::new("c1", "destroy", json!({}))).await;
    assert_eq!(result.error.unwrap().kind, ToolFailureKind::ApprovalDenied);
}

#[tokio::test]
async fn auto_approve_config_skips_approver() {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut config = fast_config(0);
    config.approval.auto_approve = true;
    let p = pipeline(registry_with(vec![Arc::new(Destroy { runs: runs.clone() })]), config);
    assert!(p.invoke(&ctx(), &ToolCall::new("c1", "destroy", json!({}))).await.error.is_none());
}

#[tokio::test]
async fn cancellation_during_pending_approval_resolves_cancelled() {
    let runs = Arc::new(AtomicUsize::new(0));
    let (approver, mut pending) = ChannelApprover::new(4, None);
    let p = pipeline(
        registry_with(vec![Arc::new(Destroy { runs: runs.clone() })]),
        fast_config(0),
    )
    .with_approver(Arc::new(approver));
    let ctx = ctx();
    let cancel = ctx.exec.clone();

    let waiter = tokio::spawn(async move {
        // Receive the request but never answer it.
        let request = pending.recv().await.unwrap();
        assert_eq!(request.request.tool_name, "destroy");
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(request);
    });

    let result = p.invoke(&ctx, &ToolCall::new("c1", "destroy", json!({}))).await;
    assert_eq!(result.error.unwrap().kind, ToolFailureKind::ApprovalCancelled);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    waiter.await.unwrap();
}

#[tokio::test]
async fn channel_approver_round_trip() {
    let (approver, mut pending) = ChannelApprover::new(1, None);
    let exec = ExecutionContext::new(RunIds::root("s"));
    let call = ToolCall::new("c1", "destroy", json!({"target": "tmp"}));
    let request = ApprovalRequest::for_call(&exec, &call);
    assert_eq!(request.summary, "destroy target=tmp");

    let responder = tokio::spawn(async move {
        pending.recv().await.unwrap().respond(ApprovalDecision::AllowOnce);
    });
    assert_eq!(approver.request_approval(&exec, &request).await, ApprovalDecision::AllowOnce);
    responder.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn channel_approver_times_out_as_rejected() {
    let (approver, _pending) = ChannelApprover::new(1, Some(Duration::from_secs(5)));
    let exec = ExecutionContext::new(RunIds::root("s"));
    let request = ApprovalRequest::for_call(&exec, &ToolCall::new("c1", "destroy", json!({})));
    assert_eq!(approver.request_approval(&exec, &request).await, ApprovalDecision::RejectOnce);
}

// ===========================================================================
// Pipeline: retry and circuit breaking
// ===========================================================================

#[tokio::test]
async fn transient_failures_are_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let p = pipeline(
        registry_with(vec![Arc::new(Flaky {
            calls: calls.clone(),
            fail_first: 2,
            error: ToolError::Transient("503".into()),
        })]),
        fast_config(2),
    );
    let result = p.invoke(&ctx(), &ToolCall::new("c1", "flaky", json!({}))).await;
    assert!(result.error.is_none(), "{:?}", result.error);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn execution_failures_are_not_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let p = pipeline(
        registry_with(vec![Arc::new(Flaky {
            calls: calls.clone(),
            fail_first: 10,
            error: ToolError::failed("exit status 1"),
        })]),
        fast_config(3),
    );
    let result = p.invoke(&ctx(), &ToolCall::new("c1", "flaky", json!({}))).await;
    let err = result.error.unwrap();
    assert_eq!(err.kind, ToolFailureKind::Execution);
    assert_eq!(err.message, "exit status 1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn breaker_short_circuits_after_k_failures_until_cooldown() {
    let calls = Arc::new(AtomicUsize::new(0));
    let p = ToolInvocationPipeline::new(
        Arc::new(registry_with(vec![Arc::new(Flaky {
            calls: calls.clone(),
            fail_first: 3,
            error: ToolError::Transient("connection reset".into()),
        })])),
        Arc::new(BreakerRegistry::new(breaker_config(3))),
        fast_config(0),
    );

    for i in 0..3 {
        let result = p.invoke(&ctx(), &ToolCall::new(format!("c{}", i), "flaky", json!({}))).await;
        assert_eq!(result.error.unwrap().kind, ToolFailureKind::Transient);
    }
    assert_eq!(p.breakers().state("flaky"), CircuitState::Open);

    let blocked = p.invoke(&ctx(), &ToolCall::new("c3", "flaky", json!({}))).await;
    let err = blocked.error.unwrap();
    assert_eq!(err.kind, ToolFailureKind::CircuitOpen);
    assert!(err.message.contains("temporarily unavailable"));
    assert_eq!(calls.load(Ordering::SeqCst), 3, "open circuit must not reach the tool");

    tokio::time::advance(Duration::from_secs(31)).await;
    let trial = p.invoke(&ctx(), &ToolCall::new("c4", "flaky", json!({}))).await;
    assert!(trial.error.is_none());
    assert_eq!(p.breakers().state("flaky"), CircuitState::Closed);
}

#[tokio::test]
async fn invalid_arguments_do_not_trip_breaker() {
    let p = ToolInvocationPipeline::new(
        Arc::new(registry_with(vec![Arc::new(Echo)])),
        Arc::new(BreakerRegistry::new(breaker_config(1))),
        fast_config(0),
    );
    for i in 0..3 {
        p.invoke(&ctx(), &ToolCall::new(format!("c{}", i), "echo", json!({}))).await;
    }
    assert_eq!(p.breakers().state("echo"), CircuitState::Closed);
}

// ===========================================================================
// Pipeline: execution guards and events
// ===========================================================================

#[tokio::test]
async fn tool_timeout_is_reported() {
    let p = pipeline(registry_with(vec![Arc::new(Hang)]), fast_config(0));
    let result = p.invoke(&ctx(), &ToolCall::new("c1", "hang", json!({}))).await;
    let err = result.error.unwrap();
    assert_eq!(err.kind, ToolFailureKind::Timeout);
    assert!(err.message.starts_with("timed out after 50ms"));
}

#[tokio::test]
async fn cancellation_stops_running_tool() {
    let p = Arc::new(pipeline(registry_with(vec![Arc::new(Sleepy::default())]), fast_config(0)));
    let ctx = ctx();
    let exec = ctx.exec.clone();
    let handle = {
        let p = p.clone();
        tokio::spawn(async move { p.invoke(&ctx, &sleepy_call("c1", 10_000)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    exec.cancel();
    let result = tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    assert!(result.is_cancelled());
}

#[tokio::test]
async fn panicking_tool_becomes_worker_fault() {
    let p = pipeline(registry_with(vec![Arc::new(Panicky)]), fast_config(0));
    let result = p.invoke(&ctx(), &ToolCall::new("c1", "panicky", json!({}))).await;
    let err = result.error.unwrap();
    assert_eq!(err.kind, ToolFailureKind::WorkerFault);
    assert!(err.message.contains("boom"));
}

#[tokio::test]
async fn pipeline_emits_correlated_stage_events() {
    let (sink, mut rx) = ChannelSink::new();
    let p = pipeline(registry_with(vec![Arc::new(Echo)]), fast_config(0)).with_events(Arc::new(sink));
    let ctx = ctx();
    p.invoke(&ctx, &ToolCall::new("c1", "echo", json!({"text": "x"}))).await;

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.base.run_id, ctx.exec.run_id());
        assert_eq!(event.base.causation_id.as_deref(), Some("c1"));
        kinds.push(match event.kind {
            EventKind::ToolStarted { .. } => "started".to_string(),
            EventKind::ToolProgress { stage, .. } => format!("{:?}", stage),
            EventKind::ToolCompleted { .. } => "completed".to_string(),
            other => panic!("unexpected event {:?}", other),
        });
    }
    assert_eq!(kinds.first().map(String::as_str), Some("started"));
    assert_eq!(kinds.last().map(String::as_str), Some("completed"));
    for stage in ["Validate", "Correlate", "Execute"] {
        assert!(kinds.iter().any(|k| k == stage), "missing {} in {:?}", stage, kinds);
    }
}

// ===========================================================================
// Batch executor
// ===========================================================================

#[tokio::test]
async fn empty_batch_returns_immediately() {
    let p = Arc::new(pipeline(ToolRegistry::new(), fast_config(0)));
    let out = ToolBatchExecutor::new(p, 4).execute(&ctx(), &[]).await;
    assert!(out.results.is_empty());
}

#[tokio::test]
async fn batch_bound_two_with_three_calls_preserves_order() {
    let sleepy = Sleepy::default();
    let p = Arc::new(pipeline(registry_with(vec![Arc::new(sleepy.clone())]), fast_config(0)));
    let executor = ToolBatchExecutor::new(p, 2);
    let calls = vec![sleepy_call("a", 120), sleepy_call("b", 30), sleepy_call("c", 30)];

    let out = executor.execute(&ctx(), &calls).await;
    let ids: Vec<&str> = out.results.iter().map(|r| r.call_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(out.results.iter().all(|r| r.error.is_none()));
    assert_eq!(sleepy.peak.load(Ordering::SeqCst), 2, "two run concurrently, one queues");
    assert_eq!(sleepy.finished.lock().unwrap().first().map(String::as_str), Some("b"));
}

#[tokio::test]
async fn batch_concurrency_never_exceeds_bound() {
    let sleepy = Sleepy::default();
    let p = Arc::new(pipeline(registry_with(vec![Arc::new(sleepy.clone())]), fast_config(0)));
    let calls: Vec<ToolCall> = (0..12).map(|i| sleepy_call(&format!("c{}", i), 10 + (i % 3) * 5)).collect();
    let out = ToolBatchExecutor::new(p, 3).execute(&ctx(), &calls).await;
    assert_eq!(out.results.len(), 12);
    assert!(sleepy.peak.load(Ordering::SeqCst) <= 3);
    for (call, result) in calls.iter().zip(&out.results) {
        assert_eq!(call.id, result.call_id);
    }
}

#[tokio::test]
async fn sequential_when_bound_is_one() {
    let sleepy = Sleepy::default();
    let p = Arc::new(pipeline(registry_with(vec![Arc::new(sleepy.clone())]), fast_config(0)));
    let calls = vec![sleepy_call("a", 20), sleepy_call("b", 5)];
    ToolBatchExecutor::new(p, 1).execute(&ctx(), &calls).await;
    assert_eq!(sleepy.peak.load(Ordering::SeqCst), 1);
    assert_eq!(*sleepy.finished.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn duplicate_call_ids_are_rejected_before_dispatch() {
    let sleepy = Sleepy::default();
    let p = Arc::new(pipeline(registry_with(vec![Arc::new(sleepy.clone())]), fast_config(0)));
    let calls = vec![sleepy_call("a", 1), sleepy_call("b", 1), sleepy_call("a", 1)];
    let out = ToolBatchExecutor::new(p, 4).execute(&ctx(), &calls).await;
    assert_eq!(out.results.len(), 3);
    assert!(out
        .results
        .iter()
        .all(|r| r.error.as_ref().is_some_and(|e| e.kind == ToolFailureKind::InvalidArguments)));
    assert!(sleepy.finished.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancel_mid_batch_yields_n_results() {
    let sleepy = Sleepy::default();
    let p = Arc::new(pipeline(registry_with(vec![Arc::new(sleepy.clone())]), fast_config(0)));
    let executor = ToolBatchExecutor::new(p, 2);
    let calls = vec![
        sleepy_call("fast", 1),
        sleepy_call("slow1", 10_000),
        sleepy_call("slow2", 10_000),
        sleepy_call("queued", 10_000),
    ];
    let ctx = ctx();
    let exec = ctx.exec.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        exec.cancel();
    });

    let out = tokio::time::timeout(Duration::from_secs(2), executor.execute(&ctx, &calls))
        .await
        .expect("batch must return promptly after cancellation");
    assert_eq!(out.results.len(), calls.len());
    assert!(out.results[0].error.is_none());
    for result in &out.results[1..] {
        assert!(result.is_cancelled(), "{:?}", result);
    }
}

#[tokio::test]
async fn worker_fault_does_not_abort_siblings() {
    let mut registry = registry_with(vec![Arc::new(Panicky)]);
    registry.register(Echo);
    let p = Arc::new(pipeline(registry, fast_config(0)));
    let calls = vec![
        ToolCall::new("a", "echo", json!({"text": "one"})),
        ToolCall::new("b", "panicky", json!({})),
        ToolCall::new("c", "echo", json!({"text": "two"})),
    ];
    let out = ToolBatchExecutor::new(p, 3).execute(&ctx(), &calls).await;
    assert_eq!(out.results[0].content, "one");
    assert_eq!(out.results[1].error.as_ref().unwrap().kind, ToolFailureKind::WorkerFault);
    assert_eq!(out.results[2].content, "two");
    let names: Vec<&str> = out.attachments.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"one.txt") && names.contains(&"two.txt"));
}

// ===========================================================================
// Builtin tools
// ===========================================================================

fn tool_ctx() -> ToolContext {
    ToolContext::new("c1", "t", ExecutionContext::new(RunIds::root("s")))
}

#[tokio::test]
async fn plan_records_complexity() {
    let out = PlanTool
        .execute(&tool_ctx(), json!({"overall_goal_ui": "Ship it", "complexity": "complex"}))
        .await
        .unwrap();
    assert_eq!(out.metadata["complexity"], "complex");
    assert!(out.content.contains("Ship it"));
    assert!(PlanTool.execute(&tool_ctx(), json!({"overall_goal_ui": " "})).await.is_err());
}

#[tokio::test]
async fn clarify_requires_question_when_pausing() {
    let err = ClarifyTool
        .execute(&tool_ctx(), json!({"task_id": "t1", "task_goal_ui": "g", "needs_user_input": true}))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::InvalidArguments(_)));

    let out = ClarifyTool
        .execute(
            &tool_ctx(),
            json!({"task_id": "t1", "task_goal_ui": "g", "needs_user_input": true, "question_to_user": "Which env?"}),
        )
        .await
        .unwrap();
    assert_eq!(out.metadata["needs_user_input"], true);
    assert_eq!(out.metadata["question_to_user"], "Which env?");
}

#[tokio::test]
async fn request_user_always_pauses() {
    let out = RequestUserTool
        .execute(&tool_ctx(), json!({"question": "Proceed?"}))
        .await
        .unwrap();
    assert_eq!(out.metadata["needs_user_input"], true);
}

#[tokio::test]
async fn background_tools_need_a_manager() {
    let registry = create_default_registry();
    let p = pipeline(registry, fast_config(0));
    let result = p
        .invoke(&ctx(), &ToolCall::new("c1", "bg_status", json!({})))
        .await;
    assert!(result.error.unwrap().message.contains("not available"));
}

struct FakeControl {
    dispatched: Mutex<Vec<DispatchRequest>>,
}

impl BackgroundControl for FakeControl {
    fn dispatch(&self, _ctx: &ExecutionContext, request: DispatchRequest) -> taskloop_core::Result<bool> {
        let mut dispatched = self.dispatched.lock().unwrap();
        if dispatched.iter().any(|r| r.task_id == request.task_id) {
            return Err(Error::DuplicateTask(request.task_id));
        }
        dispatched.push(request);
        Ok(true)
    }
    fn status(&self, _task_id: Option<&str>) -> Vec<BackgroundTaskSummary> {
        Vec::new()
    }
    fn collect(&self, task_id: &str) -> taskloop_core::Result<BackgroundOutcome> {
        Err(Error::TaskNotFinished(task_id.to_string()))
    }
    fn reply(&self, task_id: &str, request_id: &str, _r: InputResponse) -> taskloop_core::Result<()> {
        Err(Error::unknown_input(task_id, request_id))
    }
}

#[tokio::test]
async fn bg_dispatch_fills_lineage_and_defaults() {
    let control = Arc::new(FakeControl { dispatched: Mutex::new(Vec::new()) });
    let p = pipeline(create_default_registry(), fast_config(0));
    let ctx = ctx().with_background(control.clone());
    let args = json!({"task_id": "t1", "description": "d", "prompt": "p"});

    let first = p.invoke(&ctx, &ToolCall::new("call-1", "bg_dispatch", args.clone())).await;
    assert!(first.error.is_none(), "{:?}", first.error);
    {
        let dispatched = control.dispatched.lock().unwrap();
        assert_eq!(dispatched[0].agent_type, INTERNAL_AGENT_TYPE);
        assert_eq!(dispatched[0].causation_id.as_deref(), Some("call-1"));
        assert_eq!(dispatched[0].parent_task_id.as_deref(), Some(ctx.exec.run_id()));
    }

    let dup = p.invoke(&ctx, &ToolCall::new("call-2", "bg_dispatch", args)).await;
    assert_eq!(dup.error.unwrap().kind, ToolFailureKind::InvalidArguments);

    let unfinished = p.invoke(&ctx, &ToolCall::new("call-3", "bg_collect", json!({"task_id": "t1"}))).await;
    assert_eq!(unfinished.error.unwrap().kind, ToolFailureKind::Execution);
}
