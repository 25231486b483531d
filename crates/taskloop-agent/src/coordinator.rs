//! AgentCoordinator: wires a runtime per task and walks it through the
//! prepare / execute / summarize / persist lifecycle.
//!
//! The coordinator owns everything that outlives a single run: the provider,
//! the tool registry, the per-tool circuit breakers, the checkpoint and
//! session stores, and the background managers of runs that are paused
//! waiting for the user.

use crate::background::{BackgroundExecutor, BackgroundTaskManager, TaskHandle, UnitReport};
use crate::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use crate::events::{EventEmitter, SerializingListener, SubtaskSink};
use crate::runtime::{RuntimeOptions, TaskRuntime};
use crate::session::{InMemorySessionStore, SessionStore};
use crate::state::TaskState;
use crate::workflow::WorkflowTracker;
use dashmap::DashMap;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use taskloop_core::{
    AgentEvent, DispatchRequest, Error, EventKind, EventListener, EventSink, ExecutionContext,
    InputKind, NoopSink, Result, RuntimeConfig, SessionKey, StopReason, TaskResult,
    WorkflowStage, INTERNAL_AGENT_TYPE,
};
use taskloop_llm::LlmProvider;
use taskloop_tools::{
    Approver, BreakerRegistry, PipelineConfig, ToolBatchExecutor, ToolInvocationPipeline,
    ToolRegistry, REQUEST_USER_TOOL,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct AgentCoordinator {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    breakers: Arc<BreakerRegistry>,
    config: RuntimeConfig,
    approver: Option<Arc<dyn Approver>>,
    checkpoints: Arc<dyn CheckpointStore>,
    sessions: Arc<dyn SessionStore>,
    external_agents: HashMap<String, Arc<dyn BackgroundExecutor>>,
    /// Background managers of runs paused on user input, by run id.
    paused: DashMap<String, Arc<BackgroundTaskManager>>,
}

impl AgentCoordinator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        config: RuntimeConfig,
    ) -> Self {
        let checkpoints: Arc<dyn CheckpointStore> = match &config.checkpoint_dir {
            Some(dir) => Arc::new(FileCheckpointStore::new(dir)),
            None => Arc::new(MemoryCheckpointStore::new()),
        };
        Self {
            provider,
            registry,
            breakers: Arc::new(BreakerRegistry::new(config.breaker.clone())),
            config,
            approver: None,
            checkpoints,
            sessions: Arc::new(InMemorySessionStore::new()),
            external_agents: HashMap::new(),
            paused: DashMap::new(),
        }
    }

    pub fn with_approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.approver = Some(approver);
        self
    }

    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Register an executor for `bg_dispatch` calls with `agent_type`.
    pub fn with_external_agent(
        mut self,
        agent_type: impl Into<String>,
        executor: Arc<dyn BackgroundExecutor>,
    ) -> Self {
        self.external_agents.insert(agent_type.into(), executor);
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Whether `run_id` is paused waiting for [`Self::resume_task`].
    pub fn is_paused(&self, run_id: &str) -> bool {
        self.paused.contains_key(run_id)
    }

    /// Run `task` to completion, failure, cancellation or a user-input pause.
    ///
    /// Envelopes reach `listener` one at a time in sequence order; every
    /// envelope of the run has been delivered when this returns.
    pub async fn execute_task(
        self: &Arc<Self>,
        ctx: ExecutionContext,
        task: &str,
        listener: Arc<dyn EventListener>,
    ) -> Result<TaskResult> {
        if task.trim().is_empty() {
            return Err(Error::InvalidRequest("task must not be empty".into()));
        }
        let delivery = Arc::new(SerializingListener::new(listener));
        let emitter = Arc::new(EventEmitter::new(delivery.clone()));
        let events: Arc<dyn EventSink> = emitter.clone();
        info!(run_id = %ctx.run_id(), session = %ctx.session_id(), "task started");

        let mut tracker = WorkflowTracker::new(ctx.ids().clone(), events.clone());
        tracker.start(WorkflowStage::Prepare);
        let key = SessionKey::new(ctx.session_id());
        let history = match self.sessions.load(&key).await {
            Ok(history) => history,
            Err(e) => {
                warn!(run_id = %ctx.run_id(), "failed to load session history: {}", e);
                tracker.fail(WorkflowStage::Prepare, e.to_string());
                delivery.flush().await;
                return Err(e);
            }
        };
        tracker.succeed(
            WorkflowStage::Prepare,
            Some(json!({ "history_messages": history.len() })),
        );

        let state = TaskState::new(ctx.ids().clone(), task, history);
        let manager = Arc::new(self.background_manager());
        manager.set_events(events.clone());

        let result = self.drive(&ctx, state, &emitter, tracker, manager).await;
        delivery.flush().await;
        Ok(result)
    }

    /// Answer the outstanding input request of a paused run and continue it.
    pub async fn resume_task(
        self: &Arc<Self>,
        run_id: &str,
        reply: &str,
        cancel: CancellationToken,
        listener: Arc<dyn EventListener>,
    ) -> Result<TaskResult> {
        let checkpoint = self
            .checkpoints
            .load(run_id)
            .await?
            .ok_or_else(|| Error::CheckpointNotFound(run_id.to_string()))?;
        let mut state = checkpoint.state;
        if !state.paused {
            return Err(Error::InvalidRequest(format!(
                "run {} is not waiting for input",
                run_id
            )));
        }

        let delivery = Arc::new(SerializingListener::new(listener));
        let emitter = Arc::new(EventEmitter::starting_after(delivery.clone(), state.last_seq));
        let events: Arc<dyn EventSink> = emitter.clone();
        let ctx = ExecutionContext::new(state.ids.clone()).with_cancel(cancel);
        info!(run_id, iteration = state.iteration, "resuming paused task");

        let mut tracker = WorkflowTracker::new(ctx.ids().clone(), events.clone());
        tracker.start(WorkflowStage::Prepare);
        if let Some(request) = state.resolve_input(reply) {
            events.emit(AgentEvent::new(
                ctx.ids(),
                EventKind::InputResolved {
                    task_id: request.task_id,
                    request_id: request.request_id,
                    approved: true,
                    reason: "user_reply".into(),
                },
            ));
        }
        tracker.succeed(
            WorkflowStage::Prepare,
            Some(json!({ "resumed_from_iteration": state.iteration })),
        );

        let manager = match self.paused.remove(run_id) {
            Some((_, manager)) => manager,
            None => Arc::new(self.background_manager()),
        };
        manager.set_events(events.clone());

        let result = self.drive(&ctx, state, &emitter, tracker, manager).await;
        delivery.flush().await;
        Ok(result)
    }

    async fn drive(
        self: &Arc<Self>,
        ctx: &ExecutionContext,
        mut state: TaskState,
        emitter: &Arc<EventEmitter>,
        mut tracker: WorkflowTracker,
        manager: Arc<BackgroundTaskManager>,
    ) -> TaskResult {
        let events: Arc<dyn EventSink> = emitter.clone();

        tracker.start(WorkflowStage::Execute);
        let runtime = TaskRuntime::new(
            self.provider.clone(),
            self.batch_executor(events.clone()),
            RuntimeOptions::from(&self.config),
        )
        .with_events(events)
        .with_checkpoints(self.checkpoints.clone())
        .with_background(manager.clone());
        let result = runtime.run(ctx, &mut state).await;
        match (&result.stop_reason, &result.error) {
            (StopReason::Error, Some(error)) => tracker.fail(WorkflowStage::Execute, error.clone()),
            _ => tracker.succeed(
                WorkflowStage::Execute,
                Some(json!({
                    "stop_reason": result.stop_reason,
                    "iterations": result.iterations,
                })),
            ),
        }

        tracker.start(WorkflowStage::Summarize);
        tracker.succeed(
            WorkflowStage::Summarize,
            Some(json!({
                "answer_chars": result.answer.chars().count(),
                "tool_results": result.tool_results.len(),
                "tokens": result.usage.total(),
            })),
        );

        tracker.start(WorkflowStage::Persist);
        let key = SessionKey::new(ctx.session_id());
        match self.sessions.save(&key, &state.messages).await {
            Ok(()) => tracker.succeed(
                WorkflowStage::Persist,
                Some(json!({ "messages": state.messages.len() })),
            ),
            Err(e) => {
                warn!(run_id = %ctx.run_id(), "failed to persist session: {}", e);
                tracker.fail(WorkflowStage::Persist, e.to_string());
            }
        }

        if result.stop_reason == StopReason::AwaitUserInput {
            // Detach running units before sealing, so none of them can take a
            // number the resumed run will hand out again.
            manager.set_events(Arc::new(NoopSink));
            state.last_seq = emitter.seal();
            if let Err(e) = self
                .checkpoints
                .save(state.run_id(), state.iteration, &state)
                .await
            {
                warn!(run_id = %ctx.run_id(), "failed to save paused checkpoint: {}", e);
            }
            self.paused.insert(state.run_id().to_string(), manager);
        } else {
            manager.shutdown();
        }

        info!(
            run_id = %ctx.run_id(),
            stop_reason = %result.stop_reason,
            iterations = result.iterations,
            duration_ms = result.duration_ms,
            "task finished"
        );
        result
    }

    fn batch_executor(&self, events: Arc<dyn EventSink>) -> ToolBatchExecutor {
        let mut pipeline = ToolInvocationPipeline::new(
            self.registry.clone(),
            self.breakers.clone(),
            PipelineConfig::from(&self.config),
        )
        .with_events(events);
        if let Some(approver) = &self.approver {
            pipeline = pipeline.with_approver(approver.clone());
        }
        ToolBatchExecutor::new(Arc::new(pipeline), self.config.effective_concurrency())
    }

    fn background_manager(self: &Arc<Self>) -> BackgroundTaskManager {
        let mut executors = self.external_agents.clone();
        executors.insert(
            INTERNAL_AGENT_TYPE.to_string(),
            Arc::new(SubagentRunner {
                coordinator: Arc::downgrade(self),
            }),
        );
        BackgroundTaskManager::with_executors(self.config.background.clone(), executors)
    }

    /// Run a delegated subtask as a nested loop with the plan gates off.
    async fn run_subagent(
        &self,
        ctx: ExecutionContext,
        request: DispatchRequest,
        handle: TaskHandle,
    ) -> Result<UnitReport> {
        let (index, total) = handle.position();
        let events: Arc<dyn EventSink> = Arc::new(SubtaskSink::new(
            handle.events(),
            handle.parent_ids().clone(),
            handle.task_id(),
            index,
            total,
            handle.preview(),
        ));
        let mut options = RuntimeOptions::from(&self.config);
        options.enforce_gates = false;
        options.max_iterations = self.config.background.subagent_max_iterations;
        let runtime = TaskRuntime::new(
            self.provider.clone(),
            self.batch_executor(events.clone()),
            options,
        )
        .with_events(events);

        let mut state = TaskState::new(ctx.ids().clone(), request.prompt.clone(), Vec::new());
        loop {
            let result = runtime.run(&ctx, &mut state).await;
            match result.stop_reason {
                StopReason::AwaitUserInput => {
                    let response = handle
                        .request_input(
                            &ctx,
                            InputKind::Question,
                            result.answer,
                            Some(REQUEST_USER_TOOL.to_string()),
                            None,
                        )
                        .await;
                    let reply = match (response.approved, response.message) {
                        (true, Some(message)) => message,
                        (true, None) => "Approved.".to_string(),
                        (false, message) => format!(
                            "The user did not answer: {}. Continue without it.",
                            message.unwrap_or_else(|| "no reply".into())
                        ),
                    };
                    state.resolve_input(&reply);
                }
                StopReason::Cancelled => return Err(Error::Cancelled),
                _ => {
                    return Ok(UnitReport {
                        answer: result.answer,
                        error: result.error,
                        tokens: result.usage.total(),
                        iterations: result.iterations,
                        tool_calls: result.tool_results.len(),
                    })
                }
            }
        }
    }
}

/// Runs `internal` background tasks on the coordinator that dispatched them.
struct SubagentRunner {
    coordinator: Weak<AgentCoordinator>,
}

#[async_trait::async_trait]
impl BackgroundExecutor for SubagentRunner {
    async fn run(
        &self,
        ctx: ExecutionContext,
        request: DispatchRequest,
        handle: TaskHandle,
    ) -> Result<UnitReport> {
        let coordinator = self
            .coordinator
            .upgrade()
            .ok_or_else(|| Error::Background("coordinator is gone".into()))?;
        coordinator.run_subagent(ctx, request, handle).await
    }
}
