//! ToolBatchExecutor: runs one iteration's tool calls through the pipeline.
//!
//! Results come back in call order whatever order the calls finish in.
//! Workers pull from a shared cursor over the batch and write into
//! pre-assigned slots, so ordering needs no lock. Cross-call side effects
//! (attachments) are merged under one mutex as each call completes.

use crate::pipeline::{panic_message, InvocationContext, ToolInvocationPipeline};
use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use taskloop_core::{Attachment, ToolCall, ToolFailure, ToolFailureKind, ToolResult};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Results of one batch plus the merged side effects.
#[derive(Debug, Default)]
pub struct BatchOutput {
    /// Same length and order as the input calls.
    pub results: Vec<ToolResult>,
    /// Attachments from every call, deduplicated by name, in completion order.
    pub attachments: Vec<Attachment>,
}

#[derive(Default)]
struct BatchAccumulator {
    attachments: Vec<Attachment>,
    failures: usize,
}

impl BatchAccumulator {
    fn merge(&mut self, result: &ToolResult) {
        if result.is_error() {
            self.failures += 1;
        }
        for attachment in &result.attachments {
            match self.attachments.iter_mut().find(|a| a.name == attachment.name) {
                Some(existing) => *existing = attachment.clone(),
                None => self.attachments.push(attachment.clone()),
            }
        }
    }
}

pub struct ToolBatchExecutor {
    pipeline: Arc<ToolInvocationPipeline>,
    concurrency: usize,
}

impl ToolBatchExecutor {
    pub fn new(pipeline: Arc<ToolInvocationPipeline>, concurrency: usize) -> Self {
        Self {
            pipeline,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn pipeline(&self) -> &Arc<ToolInvocationPipeline> {
        &self.pipeline
    }

    pub async fn execute(&self, ctx: &InvocationContext, calls: &[ToolCall]) -> BatchOutput {
        if calls.is_empty() {
            return BatchOutput::default();
        }
        if let Some(duplicate) = first_duplicate_id(calls) {
            warn!(call_id = %duplicate, "duplicate tool call id, rejecting batch");
            return reject_batch(calls, duplicate);
        }

        if calls.len() <= 1 || self.concurrency <= 1 {
            self.execute_sequential(ctx, calls).await
        } else {
            self.execute_parallel(ctx, calls).await
        }
    }

    async fn execute_sequential(&self, ctx: &InvocationContext, calls: &[ToolCall]) -> BatchOutput {
        let mut acc = BatchAccumulator::default();
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let result = if ctx.exec.is_cancelled() {
                ToolResult::cancelled(call)
            } else {
                run_guarded(&self.pipeline, ctx, call).await
            };
            acc.merge(&result);
            results.push(result);
        }
        BatchOutput {
            results,
            attachments: acc.attachments,
        }
    }

    async fn execute_parallel(&self, ctx: &InvocationContext, calls: &[ToolCall]) -> BatchOutput {
        let n = calls.len();
        let workers = self.concurrency.min(n);
        let calls: Arc<Vec<ToolCall>> = Arc::new(calls.to_vec());
        let slots: Arc<Vec<OnceLock<ToolResult>>> =
            Arc::new((0..n).map(|_| OnceLock::new()).collect());
        let cursor = Arc::new(AtomicUsize::new(0));
        let acc = Arc::new(Mutex::new(BatchAccumulator::default()));

        debug!(calls = n, workers, "dispatching tool batch");
        let mut pool = JoinSet::new();
        for _ in 0..workers {
            let calls = calls.clone();
            let slots = slots.clone();
            let cursor = cursor.clone();
            let acc = acc.clone();
            let pipeline = self.pipeline.clone();
            let ctx = ctx.clone();
            pool.spawn(async move {
                loop {
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(call) = calls.get(index) else { break };
                    let result = if ctx.exec.is_cancelled() {
                        ToolResult::cancelled(call)
                    } else {
                        run_guarded(&pipeline, &ctx, call).await
                    };
                    acc.lock().unwrap_or_else(|e| e.into_inner()).merge(&result);
                    let _ = slots[index].set(result);
                }
            });
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                warn!("tool worker exited abnormally: {}", e);
            }
        }

        let results = slots
            .iter()
            .zip(calls.iter())
            .map(|(slot, call)| {
                slot.get().cloned().unwrap_or_else(|| {
                    ToolResult::failure(
                        call,
                        ToolFailure::new(
                            ToolFailureKind::WorkerFault,
                            "tool worker exited before completing the call",
                        ),
                    )
                })
            })
            .collect();
        let acc = std::mem::take(&mut *acc.lock().unwrap_or_else(|e| e.into_inner()));
        if acc.failures > 0 {
            debug!(failures = acc.failures, "tool batch finished with failures");
        }
        BatchOutput {
            results,
            attachments: acc.attachments,
        }
    }
}

/// Converts a panic anywhere in the pipeline into a per-call error.
async fn run_guarded(
    pipeline: &ToolInvocationPipeline,
    ctx: &InvocationContext,
    call: &ToolCall,
) -> ToolResult {
    match AssertUnwindSafe(pipeline.invoke(ctx, call)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => ToolResult::failure(
            call,
            ToolFailure::new(ToolFailureKind::WorkerFault, panic_message(panic)),
        ),
    }
}

fn first_duplicate_id(calls: &[ToolCall]) -> Option<String> {
    let mut seen = HashSet::with_capacity(calls.len());
    calls
        .iter()
        .find(|c| !seen.insert(c.id.as_str()))
        .map(|c| c.id.clone())
}

fn reject_batch(calls: &[ToolCall], duplicate: String) -> BatchOutput {
    let results = calls
        .iter()
        .map(|call| {
            ToolResult::failure(
                call,
                ToolFailure::new(
                    ToolFailureKind::InvalidArguments,
                    format!("duplicate tool call id `{}` in batch; nothing was run", duplicate),
                ),
            )
        })
        .collect();
    BatchOutput {
        results,
        attachments: Vec::new(),
    }
}
