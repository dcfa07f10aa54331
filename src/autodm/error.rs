//! Crate-wide error umbrella.
//!
//! Each component keeps its own error enum (`ToolError`, `RouterError`,
//! `MemoryError`) for the caller that wants the specific kind. `AutoDmError`
//! exists for the integration seams — the orchestrator's `run()`, mainly —
//! that need one type to return.

use std::fmt;

use crate::autodm::memory::MemoryError;
use crate::autodm::router::RouterError;
use crate::autodm::tool_registry::ToolError;

#[derive(Debug, Clone)]
pub enum AutoDmError {
    Tool(ToolError),
    Router(RouterError),
    Memory(MemoryError),
    /// Sense or BuildContext failed badly enough to abort the run.
    StateMismatch(String),
    /// Outbound command attempted with no dispatcher configured.
    DispatcherUnconfigured,
}

impl fmt::Display for AutoDmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutoDmError::Tool(e) => write!(f, "tool error: {}", e),
            AutoDmError::Router(e) => write!(f, "router error: {}", e),
            AutoDmError::Memory(e) => write!(f, "memory error: {}", e),
            AutoDmError::StateMismatch(msg) => write!(f, "state mismatch: {}", msg),
            AutoDmError::DispatcherUnconfigured => write!(f, "no command dispatcher configured"),
        }
    }
}

impl std::error::Error for AutoDmError {}

impl From<ToolError> for AutoDmError {
    fn from(e: ToolError) -> Self {
        AutoDmError::Tool(e)
    }
}

impl From<RouterError> for AutoDmError {
    fn from(e: RouterError) -> Self {
        AutoDmError::Router(e)
    }
}

impl From<MemoryError> for AutoDmError {
    fn from(e: MemoryError) -> Self {
        AutoDmError::Memory(e)
    }
}
