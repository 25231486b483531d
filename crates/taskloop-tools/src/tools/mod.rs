//! Builtin orchestration tools.
//!
//! `plan`, `clarify` and `request_user` steer the loop itself; the runtime
//! reads their results to update task state. The `bg_*` tools drive the
//! background-task manager through [`BackgroundControl`].

pub mod background;
pub mod clarify;
pub mod plan;
pub mod request_user;

pub use background::{
    BackgroundCollectTool, BackgroundControl, BackgroundDispatchTool, BackgroundReplyTool,
    BackgroundStatusTool,
};
pub use clarify::ClarifyTool;
pub use plan::PlanTool;
pub use request_user::RequestUserTool;

pub const PLAN_TOOL: &str = "plan";
pub const CLARIFY_TOOL: &str = "clarify";
pub const REQUEST_USER_TOOL: &str = "request_user";
pub const BG_DISPATCH_TOOL: &str = "bg_dispatch";

/// Tools that steer the loop rather than act on the world.
pub fn is_orchestration_tool(name: &str) -> bool {
    matches!(name, PLAN_TOOL | CLARIFY_TOOL | REQUEST_USER_TOOL)
}
