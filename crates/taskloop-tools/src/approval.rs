//! Approval seam for dangerous tool calls.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use taskloop_core::{ExecutionContext, ToolCall};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    AllowOnce,
    RejectOnce,
    Cancelled,
}

#[derive(Clone, Debug, Serialize)]
pub struct ApprovalRequest {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub summary: String,
    pub session_id: String,
    pub run_id: String,
}

impl ApprovalRequest {
    pub fn for_call(ctx: &ExecutionContext, call: &ToolCall) -> Self {
        let summary = call
            .arguments
            .iter()
            .next()
            .map(|(k, v)| format!("{} {}={}", call.name, k, v.as_str().map(String::from).unwrap_or_else(|| v.to_string())))
            .unwrap_or_else(|| call.name.clone());
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            summary,
            session_id: ctx.session_id().to_string(),
            run_id: ctx.run_id().to_string(),
        }
    }
}

#[async_trait::async_trait]
pub trait Approver: Send + Sync {
    async fn request_approval(
        &self,
        ctx: &ExecutionContext,
        request: &ApprovalRequest,
    ) -> ApprovalDecision;
}

/// Approves everything.
pub struct AutoApprover;

#[async_trait::async_trait]
impl Approver for AutoApprover {
    async fn request_approval(&self, _: &ExecutionContext, _: &ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::AllowOnce
    }
}

/// Always returns the same decision.
pub struct StaticApprover(pub ApprovalDecision);

#[async_trait::async_trait]
impl Approver for StaticApprover {
    async fn request_approval(&self, _: &ExecutionContext, _: &ApprovalRequest) -> ApprovalDecision {
        self.0
    }
}

/// An approval waiting on a front-end.
pub struct PendingApproval {
    pub request: ApprovalRequest,
    reply: oneshot::Sender<ApprovalDecision>,
}

impl PendingApproval {
    pub fn respond(self, decision: ApprovalDecision) {
        let _ = self.reply.send(decision);
    }
}

/// Forwards approval requests to a front-end over a channel.
///
/// A dropped [`PendingApproval`] resolves as cancelled. No answer within the
/// timeout resolves as rejected.
pub struct ChannelApprover {
    tx: mpsc::Sender<PendingApproval>,
    timeout: Option<Duration>,
}

impl ChannelApprover {
    pub fn new(buffer: usize, timeout: Option<Duration>) -> (Self, mpsc::Receiver<PendingApproval>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx, timeout }, rx)
    }
}

#[async_trait::async_trait]
impl Approver for ChannelApprover {
    async fn request_approval(
        &self,
        _ctx: &ExecutionContext,
        request: &ApprovalRequest,
    ) -> ApprovalDecision {
        let (reply, rx) = oneshot::channel();
        let pending = PendingApproval {
            request: request.clone(),
            reply,
        };
        if self.tx.send(pending).await.is_err() {
            warn!(call_id = %request.call_id, "approval front-end is gone, rejecting");
            return ApprovalDecision::RejectOnce;
        }
        let decision = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(answer) => answer,
                Err(_) => {
                    warn!(call_id = %request.call_id, "approval timed out, rejecting");
                    return ApprovalDecision::RejectOnce;
                }
            },
            None => rx.await,
        };
        decision.unwrap_or(ApprovalDecision::Cancelled)
    }
}
