//! Taskloop Agent - the task runtime and everything it wires together
//!
//! [`AgentCoordinator`] builds a [`TaskRuntime`] per task, routes its events
//! through the [`events`] chain, tracks the workflow stages and keeps the
//! checkpoints and background managers that paused runs resume from.

pub mod background;
pub mod checkpoint;
pub mod context;
pub mod coordinator;
pub mod events;
pub mod orchestrator;
pub mod runtime;
pub mod session;
pub mod state;
pub mod workflow;

pub use background::{
    BackgroundExecutor, BackgroundTaskManager, BridgeExecutor, BridgeMessage, TaskHandle,
    UnitReport,
};
pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use context::ContextManager;
pub use coordinator::AgentCoordinator;
pub use events::{
    event_type, is_terminal, EventEmitter, ListenerChain, SerializingListener, SubflowStats,
    SubtaskSink, WorkflowEventTranslator,
};
pub use orchestrator::{GateViolation, OrchestratorState};
pub use runtime::{RuntimeOptions, TaskRuntime, FINAL_ANSWER_PROMPT};
pub use session::{InMemorySessionStore, SessionStore};
pub use state::TaskState;
pub use workflow::WorkflowTracker;
