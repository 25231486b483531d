//! ToolInvocationPipeline: the staged path every tool call takes.
//!
//! validate → approve → retry/circuit-break → correlate → execute
//!
//! Every call ends in exactly one [`ToolResult`]. Failures at any stage are
//! values, never panics or early returns to the caller.

use crate::approval::{ApprovalDecision, ApprovalRequest, Approver};
use crate::breaker::BreakerRegistry;
use crate::registry::{Tool, ToolContext, ToolOutput, ToolRegistry};
use crate::retry::{AttemptFailure, RetryPolicy};
use crate::tools::BackgroundControl;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use taskloop_core::{
    AgentEvent, ApprovalConfig, EventKind, EventSink, ExecutionContext, NoopSink, PipelineStage,
    RuntimeConfig, ToolCall, ToolFailure, ToolFailureKind, ToolResult,
};
use tokio::time::Instant;
use tracing::{debug, warn};

const PREVIEW_CHARS: usize = 200;

/// Explicit policy for one pipeline. No process-wide state.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub retry: RetryPolicy,
    pub approval: ApprovalConfig,
    pub default_timeout: Duration,
}

impl From<&RuntimeConfig> for PipelineConfig {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            retry: RetryPolicy::new(config.retry.clone()),
            approval: config.approval.clone(),
            default_timeout: config.tool_timeout(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

/// Per-batch context shared by every call in it.
#[derive(Clone)]
pub struct InvocationContext {
    pub exec: ExecutionContext,
    pub background: Option<Arc<dyn BackgroundControl>>,
}

impl InvocationContext {
    pub fn new(exec: ExecutionContext) -> Self {
        Self {
            exec,
            background: None,
        }
    }

    pub fn with_background(mut self, background: Arc<dyn BackgroundControl>) -> Self {
        self.background = Some(background);
        self
    }
}

pub struct ToolInvocationPipeline {
    registry: Arc<ToolRegistry>,
    approver: Option<Arc<dyn Approver>>,
    breakers: Arc<BreakerRegistry>,
    events: Arc<dyn EventSink>,
    config: PipelineConfig,
}

impl ToolInvocationPipeline {
    pub fn new(
        registry: Arc<ToolRegistry>,
        breakers: Arc<BreakerRegistry>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            approver: None,
            breakers,
            events: Arc::new(NoopSink),
            config,
        }
    }

    pub fn with_approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.approver = Some(approver);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Run one call through every stage.
    pub async fn invoke(&self, ctx: &InvocationContext, call: &ToolCall) -> ToolResult {
        let started = Instant::now();
        let exec = ctx.exec.caused_by(call.id.clone());
        self.emit(
            &exec,
            EventKind::ToolStarted {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        );

        let result = self
            .run_stages(ctx, &exec, call)
            .await
            .with_duration(started.elapsed());

        self.emit(
            &exec,
            EventKind::ToolCompleted {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                content_preview: preview(&result.content),
                error: result.error.as_ref().map(|e| e.to_string()),
                duration_ms: result.duration_ms,
                attachments: result.attachments.len(),
            },
        );
        debug!(
            call_id = %call.id,
            tool = %call.name,
            error = result.error.is_some(),
            duration_ms = result.duration_ms,
            "tool call finished"
        );
        result
    }

    async fn run_stages(
        &self,
        ctx: &InvocationContext,
        exec: &ExecutionContext,
        call: &ToolCall,
    ) -> ToolResult {
        if exec.is_cancelled() {
            return ToolResult::cancelled(call);
        }

        let tool = match self.registry.get(&call.name) {
            Some(tool) if tool.is_enabled() => tool,
            Some(_) => {
                return ToolResult::failure(
                    call,
                    ToolFailure::new(
                        ToolFailureKind::NotFound,
                        format!("tool `{}` is disabled", call.name),
                    ),
                )
            }
            None => {
                return ToolResult::failure(
                    call,
                    ToolFailure::new(
                        ToolFailureKind::NotFound,
                        format!("tool not found: {}", call.name),
                    ),
                )
            }
        };

        // validate
        self.progress(exec, call, PipelineStage::Validate, "validating arguments");
        if let Err(reason) = self
            .registry
            .validate_arguments(&call.name, &call.arguments_value())
        {
            return ToolResult::failure(
                call,
                ToolFailure::new(
                    ToolFailureKind::InvalidArguments,
                    format!("invalid arguments for `{}`: {}", call.name, reason),
                ),
            );
        }

        // approve
        if tool.is_dangerous() && !self.config.approval.auto_approve {
            if let Some(failure) = self.approve(exec, call).await {
                return ToolResult::failure(call, failure);
            }
        }

        // retry / circuit-break, then correlate + execute per attempt
        self.execute_with_retry(ctx, exec, call, tool).await
    }

    async fn approve(&self, exec: &ExecutionContext, call: &ToolCall) -> Option<ToolFailure> {
        let Some(approver) = &self.approver else {
            warn!(tool = %call.name, "dangerous tool called with no approver configured");
            return Some(ToolFailure::approval_denied());
        };
        self.progress(exec, call, PipelineStage::Approve, "awaiting approval");
        let request = ApprovalRequest::for_call(exec, call);
        let decision = tokio::select! {
            biased;
            _ = exec.done() => ApprovalDecision::Cancelled,
            decision = approver.request_approval(exec, &request) => decision,
        };
        match decision {
            ApprovalDecision::AllowOnce => {
                self.progress(exec, call, PipelineStage::Approve, "approved");
                None
            }
            ApprovalDecision::RejectOnce => Some(ToolFailure::approval_denied()),
            ApprovalDecision::Cancelled => Some(ToolFailure::approval_cancelled()),
        }
    }

    async fn execute_with_retry(
        &self,
        ctx: &InvocationContext,
        exec: &ExecutionContext,
        call: &ToolCall,
        tool: Arc<dyn Tool>,
    ) -> ToolResult {
        let breaker = self.breakers.get(&call.name);
        let policy = &self.config.retry;
        let mut attempt = 1;
        loop {
            if let Err(wait) = breaker.allow() {
                return ToolResult::failure(
                    call,
                    ToolFailure::new(
                        ToolFailureKind::CircuitOpen,
                        format!(
                            "tool `{}` is temporarily unavailable: circuit open, retry in {}s",
                            call.name,
                            wait.as_secs().max(1)
                        ),
                    ),
                );
            }

            // correlate
            self.progress(
                exec,
                call,
                PipelineStage::Correlate,
                format!("run {} causation {}", exec.run_id(), call.id),
            );
            let tool_ctx = ToolContext::new(&call.id, &call.name, exec.clone())
                .with_background(ctx.background.clone())
                .with_events(self.events.clone());

            // execute
            let outcome = self.execute_once(exec, &tool_ctx, call, tool.as_ref()).await;
            match outcome {
                Ok(output) => {
                    breaker.record_success();
                    let mut result = ToolResult::success(call, output.content);
                    result.attachments = output.attachments;
                    result.metadata = output.metadata;
                    return result;
                }
                Err(failure) => {
                    if failure.counts_toward_breaker() {
                        breaker.record_failure();
                    } else {
                        breaker.release_trial();
                    }
                    if matches!(failure, AttemptFailure::Cancelled)
                        || !policy.should_retry(&failure, attempt)
                        || exec.is_cancelled()
                    {
                        return ToolResult::failure(call, failure.into_failure(attempt));
                    }
                    let delay = policy.delay(attempt);
                    self.progress(
                        exec,
                        call,
                        PipelineStage::Retry,
                        format!(
                            "attempt {} failed ({}), retrying in {}ms",
                            attempt,
                            failure.clone().into_failure(attempt),
                            delay.as_millis()
                        ),
                    );
                    tokio::select! {
                        biased;
                        _ = exec.done() => return ToolResult::cancelled(call),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn execute_once(
        &self,
        exec: &ExecutionContext,
        tool_ctx: &ToolContext,
        call: &ToolCall,
        tool: &dyn Tool,
    ) -> Result<ToolOutput, AttemptFailure> {
        let timeout = tool.timeout().unwrap_or(self.config.default_timeout);
        self.progress(exec, call, PipelineStage::Execute, "executing");
        let run = AssertUnwindSafe(tool.execute(tool_ctx, call.arguments_value())).catch_unwind();
        tokio::select! {
            biased;
            _ = exec.done() => Err(AttemptFailure::Cancelled),
            outcome = tokio::time::timeout(timeout, run) => match outcome {
                Ok(Ok(Ok(output))) => Ok(output),
                Ok(Ok(Err(e))) => Err(AttemptFailure::Tool(e)),
                Ok(Err(panic)) => Err(AttemptFailure::Panicked(panic_message(panic))),
                Err(_) => Err(AttemptFailure::Timeout(timeout)),
            },
        }
    }

    fn progress(
        &self,
        exec: &ExecutionContext,
        call: &ToolCall,
        stage: PipelineStage,
        message: impl Into<String>,
    ) {
        self.emit(
            exec,
            EventKind::ToolProgress {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                stage,
                message: message.into(),
            },
        );
    }

    fn emit(&self, exec: &ExecutionContext, kind: EventKind) {
        self.events.emit(AgentEvent::new(exec.ids(), kind));
    }
}

pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("tool worker fault: {}", detail)
}

fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        content.to_string()
    } else {
        let cut: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{}…", cut)
    }
}
