//! BackgroundTaskManager: delegated subtasks that run beside the main loop.
//!
//! Each dispatched task runs as its own tokio task under a child execution
//! context. The parent loop never waits on them: it drains notifications at
//! iteration boundaries and collects results when it wants them. A unit may
//! raise one input request at a time; unanswered requests resolve as rejected
//! once the TTL passes.

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use taskloop_core::{
    new_id, AgentEvent, BackgroundConfig, BackgroundNotification, BackgroundOutcome,
    BackgroundTaskStatus, BackgroundTaskSummary, DispatchRequest, Error, EventKind, EventSink,
    ExecutionContext, InputKind, InputRequest, InputResponse, NoopSink, Result, RunIds,
};
use taskloop_tools::BackgroundControl;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How many collected task ids are remembered after their entries are evicted.
const COLLECTED_IDS_KEPT: usize = 1024;
use tracing::{debug, info, warn};

/// What a delegated unit reports when it finishes.
#[derive(Clone, Debug, Default)]
pub struct UnitReport {
    pub answer: String,
    pub error: Option<String>,
    pub tokens: u64,
    pub iterations: usize,
    pub tool_calls: usize,
}

impl UnitReport {
    pub fn answer(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            ..Default::default()
        }
    }
}

/// Runs one kind of delegated unit (an in-process subagent, an external process).
#[async_trait::async_trait]
pub trait BackgroundExecutor: Send + Sync {
    async fn run(
        &self,
        ctx: ExecutionContext,
        request: DispatchRequest,
        handle: TaskHandle,
    ) -> Result<UnitReport>;
}

struct PendingInput {
    request: InputRequest,
    responder: oneshot::Sender<InputResponse>,
}

struct TaskEntry {
    summary: BackgroundTaskSummary,
    outcome: Option<BackgroundOutcome>,
    pending: Option<PendingInput>,
    cancel: CancellationToken,
    parent_ids: RunIds,
}

struct ManagerInner {
    config: BackgroundConfig,
    tasks: DashMap<String, TaskEntry>,
    notifications: Mutex<VecDeque<BackgroundNotification>>,
    events: RwLock<Arc<dyn EventSink>>,
    executors: HashMap<String, Arc<dyn BackgroundExecutor>>,
    /// Per-parent dispatch counters. Held across the capacity check and the
    /// insert, so concurrent dispatches cannot overshoot `max_tasks`.
    dispatched: Mutex<HashMap<String, usize>>,
    /// Ids of collected tasks, oldest first.
    collected: Mutex<VecDeque<String>>,
    shutdown: CancellationToken,
}

impl ManagerInner {
    fn events(&self) -> Arc<dyn EventSink> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn emit(&self, ids: &RunIds, kind: EventKind) {
        self.events().emit(AgentEvent::new(ids, kind));
    }

    fn notify(&self, notification: BackgroundNotification) {
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(notification);
    }

    fn was_collected(&self, task_id: &str) -> bool {
        self.collected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|id| id == task_id)
    }

    fn set_status(&self, task_id: &str, status: BackgroundTaskStatus) {
        if let Some(mut entry) = self.tasks.get_mut(task_id) {
            if !entry.summary.status.is_terminal() {
                entry.summary.status = status;
            }
        }
    }
}

/// Handle given to a running unit: raise input requests, report progress,
/// reach the delegating run's event stream.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<ManagerInner>,
    task_id: String,
    parent_ids: RunIds,
    index: usize,
    total: usize,
    preview: String,
}

impl TaskHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Ids of the run that dispatched this task.
    pub fn parent_ids(&self) -> &RunIds {
        &self.parent_ids
    }

    /// Dispatch order of this task within its parent run, and how many
    /// tasks that run had dispatched at the time.
    pub fn position(&self) -> (usize, usize) {
        (self.index, self.total)
    }

    pub fn preview(&self) -> &str {
        &self.preview
    }

    /// The delegating run's event sink. Every emit follows the manager's
    /// current routing, so events raised while the parent is paused are dropped
    /// and later ones reach the resumed run.
    pub fn events(&self) -> Arc<dyn EventSink> {
        Arc::new(RoutedSink {
            inner: self.inner.clone(),
        })
    }

    pub fn progress(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(task_id = %self.task_id, "{}", message);
        self.inner.emit(
            &self.parent_ids,
            EventKind::Diagnostic {
                name: "background.progress".into(),
                payload: serde_json::json!({ "task_id": self.task_id, "message": message }),
            },
        );
    }

    /// Ask the parent (and through it the user) for input, and wait.
    ///
    /// Resolves as rejected when the TTL passes, and as cancelled-rejected
    /// when `ctx` is cancelled. `request_id` lets a bridge keep its own ids.
    pub async fn request_input(
        &self,
        ctx: &ExecutionContext,
        kind: InputKind,
        summary: impl Into<String>,
        tool_name: Option<String>,
        request_id: Option<String>,
    ) -> InputResponse {
        let mut request = InputRequest::new(
            &self.task_id,
            request_id.unwrap_or_else(|| new_id("input")),
            kind,
            summary,
        );
        request.tool_name = tool_name;
        let (tx, rx) = oneshot::channel();

        {
            let Some(mut entry) = self.inner.tasks.get_mut(&self.task_id) else {
                return InputResponse::reject("task is no longer tracked");
            };
            if entry.pending.is_some() {
                return InputResponse::reject("another input request is already pending");
            }
            entry.summary.status = BackgroundTaskStatus::AwaitingInput;
            entry.summary.pending_input = Some(request.clone());
            entry.pending = Some(PendingInput {
                request: request.clone(),
                responder: tx,
            });
        }
        info!(task_id = %self.task_id, request_id = %request.request_id, "background task awaiting input");
        self.inner
            .notify(BackgroundNotification::InputRequested(request.clone()));
        self.inner.emit(
            &self.parent_ids,
            EventKind::InputRequested {
                request: request.clone(),
            },
        );

        let ttl = self.inner.config.input_ttl();
        let (response, reason) = tokio::select! {
            biased;
            _ = ctx.done() => (InputResponse::reject("cancelled"), "cancelled"),
            reply = rx => match reply {
                Ok(response) => return response,
                Err(_) => (InputResponse::reject("request dropped"), "dropped"),
            },
            _ = tokio::time::sleep(ttl) => (InputResponse::reject("timed out waiting for a reply"), "timed_out"),
        };

        // No reply arrived: withdraw the request ourselves.
        if let Some(mut entry) = self.inner.tasks.get_mut(&self.task_id) {
            let ours = entry
                .pending
                .as_ref()
                .is_some_and(|p| p.request.request_id == request.request_id);
            if ours {
                entry.pending = None;
                entry.summary.pending_input = None;
                if entry.summary.status == BackgroundTaskStatus::AwaitingInput {
                    entry.summary.status = BackgroundTaskStatus::Running;
                }
            }
        }
        warn!(task_id = %self.task_id, request_id = %request.request_id, reason, "input request auto-rejected");
        self.inner.emit(
            &self.parent_ids,
            EventKind::InputResolved {
                task_id: self.task_id.clone(),
                request_id: request.request_id,
                approved: false,
                reason: reason.to_string(),
            },
        );
        response
    }
}

struct RoutedSink {
    inner: Arc<ManagerInner>,
}

impl EventSink for RoutedSink {
    fn emit(&self, event: AgentEvent) {
        self.inner.events().emit(event);
    }
}

pub struct BackgroundTaskManager {
    inner: Arc<ManagerInner>,
}

impl BackgroundTaskManager {
    pub fn new(config: BackgroundConfig) -> Self {
        Self::with_executors(config, HashMap::new())
    }

    /// `executors` maps an agent type (`"internal"` or an external agent name)
    /// to the executor that runs it.
    pub fn with_executors(
        config: BackgroundConfig,
        executors: HashMap<String, Arc<dyn BackgroundExecutor>>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                tasks: DashMap::new(),
                notifications: Mutex::new(VecDeque::new()),
                events: RwLock::new(Arc::new(NoopSink)),
                executors,
                dispatched: Mutex::new(HashMap::new()),
                collected: Mutex::new(VecDeque::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Route lifecycle events to `events`. Replaced when a paused run resumes
    /// with a new listener.
    pub fn set_events(&self, events: Arc<dyn EventSink>) {
        *self.inner.events.write().unwrap_or_else(|e| e.into_inner()) = events;
    }

    pub fn supports(&self, agent_type: &str) -> bool {
        self.inner.executors.contains_key(agent_type)
    }

    /// Everything that happened since the last drain. Never blocks.
    pub fn drain_notifications(&self) -> Vec<BackgroundNotification> {
        self.inner
            .notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .tasks
            .iter()
            .filter(|e| !e.summary.status.is_terminal())
            .count()
    }

    /// Resolves once no task is pending, running or awaiting input, or `timeout` passes.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.active_count() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    /// Cancel every task still running.
    pub fn shutdown(&self) {
        let active = self.active_count();
        if active > 0 {
            info!(active, "cancelling background tasks");
        }
        self.inner.shutdown.cancel();
    }

    pub fn cancel_task(&self, task_id: &str) -> Result<()> {
        let entry = self
            .inner
            .tasks
            .get(task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        entry.cancel.cancel();
        Ok(())
    }
}

impl Drop for BackgroundTaskManager {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl BackgroundControl for BackgroundTaskManager {
    fn dispatch(&self, ctx: &ExecutionContext, request: DispatchRequest) -> Result<bool> {
        if request.task_id.trim().is_empty() || request.prompt.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "background task needs a task_id and a prompt".into(),
            ));
        }
        let Some(executor) = self.inner.executors.get(&request.agent_type).cloned() else {
            return Err(Error::InvalidRequest(format!(
                "unknown agent type `{}`",
                request.agent_type
            )));
        };

        let parent_ids = match &request.causation_id {
            Some(call_id) => ctx.ids().with_causation(call_id.clone()),
            None => ctx.ids().clone(),
        };
        let child = ctx.child(request.causation_id.clone());
        let cancel = child.cancel_token().clone();

        let task_id = request.task_id.clone();
        let summary = BackgroundTaskSummary {
            task_id: task_id.clone(),
            parent_task_id: request.parent_task_id.clone(),
            description: request.description.clone(),
            agent_type: request.agent_type.clone(),
            status: BackgroundTaskStatus::Pending,
            error: None,
            pending_input: None,
            started_at: Utc::now(),
            completed_at: None,
        };

        let (index, total) = {
            let mut dispatched = self.inner.dispatched.lock().unwrap_or_else(|e| e.into_inner());
            if self.active_count() >= self.inner.config.max_tasks {
                warn!(task_id = %task_id, max = self.inner.config.max_tasks, "background capacity reached");
                return Ok(false);
            }
            if self.inner.was_collected(&task_id) {
                return Err(Error::DuplicateTask(task_id));
            }
            match self.inner.tasks.entry(task_id.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    return Err(Error::DuplicateTask(task_id))
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(TaskEntry {
                        summary,
                        outcome: None,
                        pending: None,
                        cancel: cancel.clone(),
                        parent_ids: parent_ids.clone(),
                    });
                }
            }
            let count = dispatched.entry(parent_ids.run_id.clone()).or_insert(0);
            *count += 1;
            (*count - 1, *count)
        };

        info!(
            task_id = %task_id,
            agent_type = %request.agent_type,
            parent_run = %parent_ids.run_id,
            "background task dispatched"
        );
        self.inner.emit(
            &parent_ids,
            EventKind::BackgroundDispatched {
                task_id: task_id.clone(),
                description: request.description.clone(),
                agent_type: request.agent_type.clone(),
            },
        );

        let handle = TaskHandle {
            inner: self.inner.clone(),
            task_id: task_id.clone(),
            parent_ids: parent_ids.clone(),
            index,
            total,
            preview: preview(&request.description, self.inner.config.preview_chars),
        };
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            inner.set_status(&task_id, BackgroundTaskStatus::Running);

            let shutdown = inner.shutdown.clone();
            let run = AssertUnwindSafe(executor.run(child, request, handle)).catch_unwind();
            let outcome = tokio::select! {
                outcome = run => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(Error::Background("background unit panicked".into())),
                },
                _ = shutdown.cancelled() => {
                    cancel.cancel();
                    Err(Error::Cancelled)
                }
            };
            finish(&inner, &task_id, &parent_ids, outcome, started.elapsed());
        });
        Ok(true)
    }

    fn status(&self, task_id: Option<&str>) -> Vec<BackgroundTaskSummary> {
        let mut summaries: Vec<BackgroundTaskSummary> = match task_id {
            Some(id) => self
                .inner
                .tasks
                .get(id)
                .map(|e| vec![e.summary.clone()])
                .unwrap_or_default(),
            None => self.inner.tasks.iter().map(|e| e.summary.clone()).collect(),
        };
        summaries.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        summaries
    }

    /// Hands out a finished task's outcome once and evicts its entry.
    fn collect(&self, task_id: &str) -> Result<BackgroundOutcome> {
        let mut collected = self.inner.collected.lock().unwrap_or_else(|e| e.into_inner());
        let removed = self
            .inner
            .tasks
            .remove_if(task_id, |_, entry| entry.outcome.is_some());
        if let Some((_, entry)) = removed {
            collected.push_back(task_id.to_string());
            if collected.len() > COLLECTED_IDS_KEPT {
                collected.pop_front();
            }
            debug!(task_id, "background task collected and evicted");
            return entry
                .outcome
                .ok_or_else(|| Error::TaskNotFinished(task_id.to_string()));
        }
        if self.inner.tasks.contains_key(task_id) {
            return Err(Error::TaskNotFinished(task_id.to_string()));
        }
        if collected.iter().any(|id| id == task_id) {
            return Err(Error::AlreadyCollected(task_id.to_string()));
        }
        Err(Error::TaskNotFound(task_id.to_string()))
    }

    fn reply(&self, task_id: &str, request_id: &str, response: InputResponse) -> Result<()> {
        let mut entry = self
            .inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        let matches = entry
            .pending
            .as_ref()
            .is_some_and(|p| p.request.request_id == request_id);
        if !matches {
            return Err(Error::unknown_input(task_id, request_id));
        }
        let Some(pending) = entry.pending.take() else {
            return Err(Error::unknown_input(task_id, request_id));
        };
        entry.summary.pending_input = None;
        if entry.summary.status == BackgroundTaskStatus::AwaitingInput {
            entry.summary.status = BackgroundTaskStatus::Running;
        }
        let parent_ids = entry.parent_ids.clone();
        drop(entry);

        let approved = response.approved;
        let delivered = pending.responder.send(response).is_ok();
        self.inner.emit(
            &parent_ids,
            EventKind::InputResolved {
                task_id: task_id.to_string(),
                request_id: request_id.to_string(),
                approved,
                reason: if delivered { "replied".into() } else { "unit gone".into() },
            },
        );
        Ok(())
    }
}

fn finish(
    inner: &ManagerInner,
    task_id: &str,
    parent_ids: &RunIds,
    outcome: Result<UnitReport>,
    elapsed: Duration,
) {
    let (status, report) = match outcome {
        Ok(report) if report.error.is_none() => (BackgroundTaskStatus::Done, report),
        Ok(report) => (BackgroundTaskStatus::Failed, report),
        Err(e) => (
            BackgroundTaskStatus::Failed,
            UnitReport {
                error: Some(e.to_string()),
                ..Default::default()
            },
        ),
    };
    let summary_text = match &report.error {
        Some(err) => format!("failed: {}", err),
        None => preview(&report.answer, inner.config.preview_chars),
    };

    if let Some(mut entry) = inner.tasks.get_mut(task_id) {
        entry.summary.status = status;
        entry.summary.error = report.error.clone();
        entry.summary.completed_at = Some(Utc::now());
        entry.summary.pending_input = None;
        entry.pending = None;
        entry.outcome = Some(BackgroundOutcome {
            task_id: task_id.to_string(),
            status,
            answer: report.answer.clone(),
            error: report.error.clone(),
            tokens: report.tokens,
            iterations: report.iterations,
            duration_ms: elapsed.as_millis() as u64,
        });
    }

    info!(task_id, %status, tokens = report.tokens, "background task finished");
    inner.notify(BackgroundNotification::Completed {
        task_id: task_id.to_string(),
        status,
        summary: summary_text.clone(),
    });
    inner.emit(
        parent_ids,
        EventKind::BackgroundCompleted {
            task_id: task_id.to_string(),
            status,
            summary: summary_text,
            tokens: report.tokens,
            iterations: report.iterations,
            tool_calls: report.tool_calls,
        },
    );
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}
