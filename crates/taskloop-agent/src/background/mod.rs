//! Background delegation: the task manager and the executors it runs units with.

pub mod bridge;
pub mod manager;

pub use bridge::{BridgeExecutor, BridgeMessage};
pub use manager::{BackgroundExecutor, BackgroundTaskManager, TaskHandle, UnitReport};
