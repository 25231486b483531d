//! Taskloop Tools: tool capabilities and the machinery that invokes them
//!
//! Each tool is a self-contained type implementing [`Tool`]. Calls go through
//! the [`ToolInvocationPipeline`] (validate, approve, retry and circuit-break,
//! correlate, execute) and batches fan out through the [`ToolBatchExecutor`].
//! Builtin orchestration tools live in src/tools/.

pub mod approval;
pub mod batch;
pub mod breaker;
pub mod pipeline;
pub mod registry;
pub mod retry;
pub mod schema;
pub mod tools;

pub use approval::{
    ApprovalDecision, ApprovalRequest, Approver, AutoApprover, ChannelApprover, PendingApproval,
    StaticApprover,
};
pub use batch::{BatchOutput, ToolBatchExecutor};
pub use breaker::{BreakerRegistry, CircuitBreaker, CircuitState};
pub use pipeline::{InvocationContext, PipelineConfig, ToolInvocationPipeline};
pub use registry::{Tool, ToolContext, ToolError, ToolOutput, ToolRegistry};
pub use retry::{AttemptFailure, RetryPolicy};
pub use tools::{
    is_orchestration_tool, BackgroundControl, BG_DISPATCH_TOOL, CLARIFY_TOOL, PLAN_TOOL,
    REQUEST_USER_TOOL,
};

/// Registry with the orchestration tools only.
pub fn create_orchestration_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(tools::PlanTool);
    registry.register(tools::ClarifyTool);
    registry.register(tools::RequestUserTool);
    registry
}

/// Create the default tool registry with all builtin tools.
///
/// Concrete capabilities (files, shell, search) are registered by the
/// embedding application on top of this.
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = create_orchestration_registry();

    // --- Background delegation ---
    registry.register(tools::BackgroundDispatchTool);
    registry.register(tools::BackgroundStatusTool);
    registry.register(tools::BackgroundCollectTool);
    registry.register(tools::BackgroundReplyTool);

    registry
}
