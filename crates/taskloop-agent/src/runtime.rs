//! TaskRuntime: the think / act / observe loop for one task.
//!
//! Each iteration asks the model for a turn, lets the orchestrator gates
//! vet the requested calls, runs the batch and folds the results back into
//! the conversation. The state is checkpointed after every turn that
//! produces calls and after every committed batch, so a paused or crashed
//! run resumes without re-running committed work.

use crate::background::BackgroundTaskManager;
use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use crate::context::{truncate_result, ContextManager};
use crate::orchestrator::{self, Followup};
use crate::state::TaskState;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use taskloop_core::{
    new_id, AgentEvent, BackgroundNotification, EventKind, EventSink, ExecutionContext, InputKind,
    InputRequest, NodeKind, NoopSink, RuntimeConfig, StopReason, TaskResult, ToolCall, Usage,
};
use taskloop_llm::{
    AccumulatedToolCall, ContentBlock, LlmError, LlmMessage, LlmProvider, LlmRequest, StreamDelta,
};
use taskloop_tools::{
    InvocationContext, ToolBatchExecutor, ToolRegistry, BG_DISPATCH_TOOL, PLAN_TOOL,
};
use tracing::{debug, info, warn};

/// Sent as a user message when the iteration budget runs out.
pub const FINAL_ANSWER_PROMPT: &str = "Please provide your final answer to the user's question now.";

const EMPTY_TURN_CORRECTION: &str =
    "Your last reply was empty. Answer the user or call one of the available tools.";

pub struct RuntimeOptions {
    pub model: String,
    pub max_iterations: usize,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
    pub context_max_tokens: usize,
    pub final_answer_chunk_chars: usize,
    pub clarify_complex_tasks: bool,
    /// Enforce plan-before-action. Only takes effect when `plan` is registered.
    pub enforce_gates: bool,
}

impl From<&RuntimeConfig> for RuntimeOptions {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_iterations: config.max_iterations,
            max_tokens: config.max_tokens,
            system_prompt: config.system_prompt.clone(),
            context_max_tokens: config.context_max_tokens,
            final_answer_chunk_chars: config.final_answer_chunk_chars,
            clarify_complex_tasks: config.clarify_complex_tasks,
            enforce_gates: true,
        }
    }
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

/// One model turn.
#[derive(Debug, Default)]
struct Turn {
    text: String,
    calls: Vec<ToolCall>,
    usage: Usage,
}

enum ThinkError {
    Cancelled,
    Llm(LlmError),
}

impl From<LlmError> for ThinkError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Cancelled => Self::Cancelled,
            other => Self::Llm(other),
        }
    }
}

/// Why the loop stopped, with what it stopped holding.
enum Stop {
    Answer(String),
    Exhausted(String),
    Pause,
    Cancelled,
    Failed(String),
}

fn iteration_node(iteration: usize) -> String {
    format!("iteration-{}", iteration)
}

fn generation_node(iteration: usize) -> String {
    format!("iteration-{}:generation", iteration)
}

/// Names some models leak from their chat template instead of a real tool.
fn is_template_artifact(name: &str) -> bool {
    name.trim().is_empty() || name.contains("<|") || name.contains("functions.")
}

pub struct TaskRuntime {
    provider: Arc<dyn LlmProvider>,
    executor: ToolBatchExecutor,
    events: Arc<dyn EventSink>,
    checkpoints: Arc<dyn CheckpointStore>,
    background: Option<Arc<BackgroundTaskManager>>,
    options: RuntimeOptions,
}

impl TaskRuntime {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        executor: ToolBatchExecutor,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            provider,
            executor,
            events: Arc::new(NoopSink),
            checkpoints: Arc::new(MemoryCheckpointStore::new()),
            background: None,
            options,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn with_background(mut self, background: Arc<BackgroundTaskManager>) -> Self {
        self.background = Some(background);
        self
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    fn registry(&self) -> &Arc<ToolRegistry> {
        self.executor.pipeline().registry()
    }

    fn gates_enabled(&self) -> bool {
        self.options.enforce_gates && self.registry().contains(PLAN_TOOL)
    }

    fn emit(&self, ctx: &ExecutionContext, kind: EventKind) {
        self.events.emit(AgentEvent::new(ctx.ids(), kind));
    }

    fn system_prompt(&self) -> Option<String> {
        let tools = self.registry().combined_prompts();
        match (&self.options.system_prompt, tools.is_empty()) {
            (Some(base), true) => Some(base.clone()),
            (Some(base), false) => Some(format!("{}\n\n{}", base, tools)),
            (None, false) => Some(tools),
            (None, true) => None,
        }
    }

    /// Drive `state` until it finishes, fails, is cancelled or pauses for input.
    ///
    /// A state with uncommitted `pending_tool_calls` (restored from a
    /// checkpoint) runs those calls before thinking again.
    pub async fn run(&self, ctx: &ExecutionContext, state: &mut TaskState) -> TaskResult {
        let started = Instant::now();
        info!(
            run_id = %state.run_id(),
            iteration = state.iteration,
            max_iterations = self.options.max_iterations,
            "task run started"
        );

        if state.paused {
            return self.conclude(ctx, state, Stop::Pause, started).await;
        }

        if !state.pending_tool_calls.is_empty() {
            debug!(
                run_id = %state.run_id(),
                pending = state.pending_tool_calls.len(),
                "executing calls restored from checkpoint"
            );
            if let Some(stop) = self.act(ctx, state).await {
                return self.conclude(ctx, state, stop, started).await;
            }
        }

        loop {
            if state.iteration >= self.options.max_iterations {
                let stop = self.force_final_answer(ctx, state).await;
                return self.conclude(ctx, state, stop, started).await;
            }
            self.drain_background(state);
            if ctx.is_cancelled() {
                return self.conclude(ctx, state, Stop::Cancelled, started).await;
            }

            state.iteration += 1;
            let iteration = state.iteration;
            self.emit(
                ctx,
                EventKind::NodeStarted {
                    node_id: iteration_node(iteration),
                    node_kind: NodeKind::Iteration,
                    iteration: Some(iteration),
                    max_iterations: Some(self.options.max_iterations),
                },
            );

            let turn = match self.think(ctx, state, iteration, true).await {
                Ok(turn) => turn,
                Err(ThinkError::Cancelled) => {
                    self.cancelled_iteration(ctx, iteration, "think");
                    return self.conclude(ctx, state, Stop::Cancelled, started).await;
                }
                Err(ThinkError::Llm(e)) => {
                    warn!(run_id = %state.run_id(), iteration, "LLM call failed: {}", e);
                    self.emit(
                        ctx,
                        EventKind::NodeFailed {
                            node_id: iteration_node(iteration),
                            node_kind: NodeKind::Iteration,
                            iteration: Some(iteration),
                            phase: "think".into(),
                            error: e.to_string(),
                            recoverable: e.is_recoverable(),
                        },
                    );
                    return self
                        .conclude(ctx, state, Stop::Failed(e.to_string()), started)
                        .await;
                }
            };
            let tokens = turn.usage.total();
            let calls = self.filter_artifacts(ctx, turn.calls);

            if calls.is_empty() {
                if turn.text.trim().is_empty() {
                    warn!(run_id = %state.run_id(), iteration, "empty model turn");
                    state.messages.push(LlmMessage::system(EMPTY_TURN_CORRECTION));
                    self.complete_iteration(ctx, iteration, tokens, 0);
                    continue;
                }
                state.messages.push(LlmMessage::assistant(turn.text.clone()));
                self.complete_iteration(ctx, iteration, tokens, 0);
                return self
                    .conclude(ctx, state, Stop::Answer(turn.text), started)
                    .await;
            }

            if self.gates_enabled() {
                if let Err(violation) = orchestrator::check_batch(
                    &state.orchestrator,
                    &calls,
                    self.options.clarify_complex_tasks,
                ) {
                    info!(
                        run_id = %state.run_id(),
                        rejected = ?violation.rejected,
                        "tool batch rejected: {}",
                        violation.reason
                    );
                    state.messages.push(LlmMessage::system(violation.correction()));
                    self.emit(
                        ctx,
                        EventKind::OrchestratorCorrection {
                            reason: violation.reason,
                            rejected_tools: violation.rejected,
                        },
                    );
                    self.complete_iteration(ctx, iteration, tokens, 0);
                    continue;
                }
            }

            let call_count = calls.len();
            state.messages.push(assistant_turn(&turn.text, &calls));
            state.pending_tool_calls = calls;
            self.checkpoint(ctx, state).await;

            let stop = self.act(ctx, state).await;
            self.complete_iteration(ctx, iteration, tokens, call_count);
            if let Some(stop) = stop {
                return self.conclude(ctx, state, stop, started).await;
            }
        }
    }

    fn complete_iteration(
        &self,
        ctx: &ExecutionContext,
        iteration: usize,
        tokens: u64,
        tool_calls: usize,
    ) {
        self.emit(
            ctx,
            EventKind::NodeCompleted {
                node_id: iteration_node(iteration),
                node_kind: NodeKind::Iteration,
                iteration: Some(iteration),
                tokens_used: tokens,
                tool_calls,
                output: None,
            },
        );
    }

    /// Stream one completion. Tool definitions are offered when `with_tools`.
    async fn think(
        &self,
        ctx: &ExecutionContext,
        state: &mut TaskState,
        iteration: usize,
        with_tools: bool,
    ) -> Result<Turn, ThinkError> {
        let node_id = generation_node(iteration);
        self.emit(
            ctx,
            EventKind::NodeStarted {
                node_id: node_id.clone(),
                node_kind: NodeKind::Generation,
                iteration: Some(iteration),
                max_iterations: None,
            },
        );

        let tools = if with_tools {
            Some(self.registry().get_definitions()).filter(|defs| !defs.is_empty())
        } else {
            None
        };
        let request = LlmRequest {
            model: self.options.model.clone(),
            messages: state.messages.clone(),
            tools,
            max_tokens: Some(self.options.max_tokens),
            system: self.system_prompt(),
            ..Default::default()
        };

        let stream = tokio::select! {
            biased;
            _ = ctx.done() => return Err(ThinkError::Cancelled),
            stream = self.provider.complete_stream(request, Some(ctx.cancel_token().clone())) => stream?,
        };
        tokio::pin!(stream);

        let mut turn = Turn::default();
        let mut accumulated: Vec<AccumulatedToolCall> = Vec::new();
        let mut current: Option<AccumulatedToolCall> = None;

        loop {
            let delta = tokio::select! {
                biased;
                _ = ctx.done() => {
                    debug!(run_id = %state.run_id(), iteration, "generation cancelled");
                    return Err(ThinkError::Cancelled);
                }
                delta = stream.next() => delta,
            };
            match delta {
                Some(Ok(StreamDelta::Text(text))) => {
                    turn.text.push_str(&text);
                    self.emit(
                        ctx,
                        EventKind::NodeOutputDelta {
                            node_id: node_id.clone(),
                            iteration,
                            delta: text,
                        },
                    );
                }
                Some(Ok(StreamDelta::Thinking(_))) => {}
                Some(Ok(StreamDelta::ToolCallStart { id, name })) => {
                    if let Some(open) = current.take() {
                        accumulated.push(open);
                    }
                    current = Some(AccumulatedToolCall {
                        id,
                        name,
                        arguments: String::new(),
                    });
                }
                Some(Ok(StreamDelta::ToolCallDelta { arguments, .. })) => {
                    if let Some(tool) = current.as_mut() {
                        tool.arguments.push_str(&arguments);
                    }
                }
                Some(Ok(StreamDelta::ToolCallEnd { .. })) => {
                    if let Some(tool) = current.take() {
                        accumulated.push(tool);
                    }
                }
                Some(Ok(StreamDelta::Done { usage, .. })) => {
                    if let Some(usage) = usage {
                        turn.usage.add(&usage);
                    }
                }
                Some(Ok(StreamDelta::Error(e))) => {
                    return Err(ThinkError::Llm(LlmError::StreamError(e)));
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }
        if let Some(open) = current.take() {
            accumulated.push(open);
        }

        state.usage.add(&turn.usage);
        turn.calls = accumulated
            .into_iter()
            .map(|acc| self.to_tool_call(acc))
            .collect();

        self.emit(
            ctx,
            EventKind::NodeOutputSummary {
                node_id: node_id.clone(),
                iteration,
                content: turn.text.clone(),
                tool_call_count: turn.calls.len(),
            },
        );
        self.emit(
            ctx,
            EventKind::NodeCompleted {
                node_id,
                node_kind: NodeKind::Generation,
                iteration: Some(iteration),
                tokens_used: turn.usage.total(),
                tool_calls: turn.calls.len(),
                output: None,
            },
        );
        Ok(turn)
    }

    fn to_tool_call(&self, acc: AccumulatedToolCall) -> ToolCall {
        let arguments = match acc.parse_arguments() {
            Ok(value) => value,
            Err(e) => {
                warn!(tool = %acc.name, "unparseable tool arguments: {}", e);
                Value::String(acc.arguments.clone())
            }
        };
        let id = if acc.id.is_empty() {
            new_id("call")
        } else {
            acc.id
        };
        let mut call = ToolCall::new(id, acc.name, arguments);
        call.declared = self.registry().contains(&call.name);
        call
    }

    fn filter_artifacts(&self, ctx: &ExecutionContext, calls: Vec<ToolCall>) -> Vec<ToolCall> {
        let (dropped, kept): (Vec<ToolCall>, Vec<ToolCall>) =
            calls.into_iter().partition(|c| is_template_artifact(&c.name));
        if !dropped.is_empty() {
            let names: Vec<&str> = dropped.iter().map(|c| c.name.as_str()).collect();
            warn!(run_id = %ctx.run_id(), dropped = ?names, "dropping malformed tool calls");
            self.emit(
                ctx,
                EventKind::Diagnostic {
                    name: "tool_calls_filtered".into(),
                    payload: json!({ "tools": names }),
                },
            );
        }
        kept
    }

    /// Run `state.pending_tool_calls`, commit the results and apply followups.
    async fn act(&self, ctx: &ExecutionContext, state: &mut TaskState) -> Option<Stop> {
        let calls = state.pending_tool_calls.clone();
        let mut invocation = InvocationContext::new(ctx.clone());
        if let Some(background) = &self.background {
            invocation = invocation.with_background(background.clone());
        }
        let output = self.executor.execute(&invocation, &calls).await;

        let blocks: Vec<ContentBlock> = output
            .results
            .iter()
            .map(|r| ContentBlock::ToolResult {
                tool_use_id: r.call_id.clone(),
                content: truncate_result(r.to_content_string()),
                is_error: r.is_error().then_some(true),
            })
            .collect();
        state.messages.push(LlmMessage::blocks("user", blocks));
        state.pending_tool_calls.clear();

        let mut stop = None;
        for (call, result) in calls.iter().zip(&output.results) {
            if call.name == BG_DISPATCH_TOOL && result.error.is_none() {
                if let Some(task_id) = result.metadata.get("task_id").and_then(Value::as_str) {
                    state.background_tasks.push(task_id.to_string());
                }
            }
            match orchestrator::observe(&mut state.orchestrator, call, result) {
                Followup::None => {}
                Followup::Replan { message } => {
                    state.messages.push(LlmMessage::system(message));
                    self.emit(
                        ctx,
                        EventKind::ReplanRequested {
                            call_id: call.id.clone(),
                            tool_name: call.name.clone(),
                            error: result
                                .error
                                .as_ref()
                                .map(|e| e.message.clone())
                                .unwrap_or_default(),
                        },
                    );
                }
                Followup::Pause { question } => {
                    if state.pending_input.is_none() {
                        let mut request = InputRequest::new(
                            state.run_id(),
                            new_id("input"),
                            InputKind::Question,
                            question,
                        );
                        request.tool_name = Some(call.name.clone());
                        state.pending_input = Some(request);
                        state.paused = true;
                    }
                }
            }
            if stop.is_none() {
                if let Some(failure) = result.error.as_ref().filter(|f| f.is_fatal()) {
                    stop = Some(Stop::Failed(format!(
                        "tool `{}` failed: {}",
                        call.name, failure.message
                    )));
                }
            }
        }
        state.tool_results.extend(output.results);

        if stop.is_none() && ctx.is_cancelled() {
            stop = Some(Stop::Cancelled);
        }

        let mut pinned = state.task_index;
        let mut window = ContextManager::new(self.options.context_max_tokens);
        if let Some(system) = self.system_prompt() {
            window.set_system(&system);
        }
        window.compact(&mut state.messages, &mut pinned);
        state.task_index = pinned;

        self.checkpoint(ctx, state).await;
        if stop.is_none() && state.paused {
            stop = Some(Stop::Pause);
        }
        stop
    }

    /// One extra completion without tools once the iteration budget is spent.
    async fn force_final_answer(&self, ctx: &ExecutionContext, state: &mut TaskState) -> Stop {
        info!(
            run_id = %state.run_id(),
            max_iterations = self.options.max_iterations,
            "iteration limit reached, requesting final answer"
        );
        state.iteration += 1;
        let iteration = state.iteration;
        self.emit(
            ctx,
            EventKind::NodeStarted {
                node_id: iteration_node(iteration),
                node_kind: NodeKind::Iteration,
                iteration: Some(iteration),
                max_iterations: Some(self.options.max_iterations),
            },
        );
        state.messages.push(LlmMessage::user(FINAL_ANSWER_PROMPT));

        let fallback = |state: &TaskState| {
            let head = format!(
                "Reached the iteration limit ({}) before finishing.",
                self.options.max_iterations
            );
            match state.partial_summary() {
                Some(partial) => format!("{}\n\n{}", head, partial),
                None => head,
            }
        };

        match self.think(ctx, state, iteration, false).await {
            Ok(turn) => {
                self.complete_iteration(ctx, iteration, turn.usage.total(), 0);
                if turn.text.trim().is_empty() {
                    Stop::Exhausted(fallback(state))
                } else {
                    state.messages.push(LlmMessage::assistant(turn.text.clone()));
                    Stop::Exhausted(turn.text)
                }
            }
            Err(ThinkError::Cancelled) => {
                self.cancelled_iteration(ctx, iteration, "final_answer");
                Stop::Cancelled
            }
            Err(ThinkError::Llm(e)) => {
                warn!(run_id = %state.run_id(), "final answer request failed: {}", e);
                self.emit(
                    ctx,
                    EventKind::NodeFailed {
                        node_id: iteration_node(iteration),
                        node_kind: NodeKind::Iteration,
                        iteration: Some(iteration),
                        phase: "final_answer".into(),
                        error: e.to_string(),
                        recoverable: true,
                    },
                );
                Stop::Exhausted(fallback(state))
            }
        }
    }

    /// Close the generation and iteration nodes of a model call cut short by cancellation.
    fn cancelled_iteration(&self, ctx: &ExecutionContext, iteration: usize, phase: &str) {
        for (node_id, node_kind) in [
            (generation_node(iteration), NodeKind::Generation),
            (iteration_node(iteration), NodeKind::Iteration),
        ] {
            self.emit(
                ctx,
                EventKind::NodeFailed {
                    node_id,
                    node_kind,
                    iteration: Some(iteration),
                    phase: phase.into(),
                    error: "cancelled".into(),
                    recoverable: false,
                },
            );
        }
    }

    /// Fold background notifications into the conversation. Never blocks.
    fn drain_background(&self, state: &mut TaskState) {
        let Some(background) = &self.background else {
            return;
        };
        for notification in background.drain_notifications() {
            let text = match notification {
                BackgroundNotification::Completed {
                    task_id,
                    status,
                    summary,
                } => format!(
                    "Background task `{}` finished ({}): {}. Use bg_collect to read the full result.",
                    task_id, status, summary
                ),
                BackgroundNotification::InputRequested(request) => format!(
                    "Background task `{}` is waiting for input (request `{}`): {}. Answer with bg_reply.",
                    request.task_id, request.request_id, request.summary
                ),
            };
            state.messages.push(LlmMessage::system(text));
        }
    }

    async fn checkpoint(&self, ctx: &ExecutionContext, state: &TaskState) {
        match self
            .checkpoints
            .save(state.run_id(), state.iteration, state)
            .await
        {
            Ok(()) => self.emit(
                ctx,
                EventKind::CheckpointSaved {
                    iteration: state.iteration,
                    pending_calls: state.pending_tool_calls.len(),
                },
            ),
            Err(e) => warn!(run_id = %state.run_id(), "checkpoint write failed: {}", e),
        }
    }

    async fn conclude(
        &self,
        ctx: &ExecutionContext,
        state: &mut TaskState,
        stop: Stop,
        started: Instant,
    ) -> TaskResult {
        let (stop_reason, answer, error) = match stop {
            Stop::Answer(answer) => (StopReason::EndTurn, answer, None),
            Stop::Exhausted(answer) => (StopReason::MaxIterations, answer, None),
            Stop::Pause => {
                let question = state
                    .pending_input
                    .as_ref()
                    .map(|r| r.summary.clone())
                    .unwrap_or_default();
                (StopReason::AwaitUserInput, question, None)
            }
            Stop::Cancelled => {
                let reason = if ctx.cancel_token().is_cancelled() {
                    "cancelled"
                } else {
                    "deadline exceeded"
                };
                (
                    StopReason::Cancelled,
                    state.partial_summary().unwrap_or_default(),
                    Some(reason.to_string()),
                )
            }
            Stop::Failed(error) => {
                let answer = state.partial_summary().unwrap_or_else(|| error.clone());
                (StopReason::Error, answer, Some(error))
            }
        };

        match stop_reason {
            StopReason::AwaitUserInput => {
                if let Some(request) = &state.pending_input {
                    self.emit(
                        ctx,
                        EventKind::InputRequested {
                            request: request.clone(),
                        },
                    );
                }
            }
            StopReason::Cancelled => self.emit(
                ctx,
                EventKind::ResultCancelled {
                    reason: error.clone().unwrap_or_else(|| "cancelled".into()),
                },
            ),
            _ => self.stream_answer(ctx, state, &answer, stop_reason),
        }

        if stop_reason.is_terminal() {
            if let Err(e) = self.checkpoints.clear(state.run_id()).await {
                warn!(run_id = %state.run_id(), "failed to clear checkpoint: {}", e);
            }
        }

        info!(
            run_id = %state.run_id(),
            stop_reason = %stop_reason,
            iterations = state.iteration,
            tokens = state.usage.total(),
            "task run finished"
        );
        TaskResult {
            run_id: state.run_id().to_string(),
            answer,
            stop_reason,
            usage: state.usage,
            iterations: state.iteration,
            error,
            pending_input: state.pending_input.clone(),
            tool_results: state.tool_results.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Emit the answer as cumulative chunks, then once more as finished.
    fn stream_answer(
        &self,
        ctx: &ExecutionContext,
        state: &TaskState,
        answer: &str,
        stop_reason: StopReason,
    ) {
        let chunk = self.options.final_answer_chunk_chars.max(1);
        let chars: Vec<char> = answer.chars().collect();
        let streamed = chars.len() > chunk;
        let result = |text: String, stream_finished: bool| EventKind::ResultFinal {
            answer: text,
            stop_reason,
            iterations: state.iteration,
            usage: state.usage,
            streaming: streamed,
            stream_finished,
        };
        if streamed {
            let mut end = chunk;
            while end < chars.len() {
                self.emit(ctx, result(chars[..end].iter().collect(), false));
                end += chunk;
            }
        }
        self.emit(ctx, result(answer.to_string(), true));
    }
}

fn assistant_turn(text: &str, calls: &[ToolCall]) -> LlmMessage {
    let mut blocks = Vec::with_capacity(calls.len() + 1);
    if !text.is_empty() {
        blocks.push(ContentBlock::Text {
            text: text.to_string(),
        });
    }
    blocks.extend(calls.iter().map(|c| ContentBlock::ToolUse {
        id: c.id.clone(),
        name: c.name.clone(),
        input: c.arguments_value(),
    }));
    LlmMessage::blocks("assistant", blocks)
}
