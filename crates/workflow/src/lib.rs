//! Face-swap workflow: a pure state machine plus the runtime that executes
//! its effects against the capture loop and the transfer manager.

pub mod config;
pub mod events;
pub mod machine;
pub mod runtime;
pub mod state;

pub use config::{load_settings, Settings, WorkflowConfig};
pub use events::{Effect, Event, Intent, TimerKind};
pub use machine::Machine;
pub use runtime::{WorkflowHandle, WorkflowRuntime};
pub use state::{ErrorCounts, OrchestratorContext, WorkflowSnapshot, WorkflowState};
