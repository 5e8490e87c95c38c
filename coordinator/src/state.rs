//! Pipeline lifecycle state.

use serde::Serialize;

/// Pipeline operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Wiring origins and the store.
    Starting,
    /// Accepting ticks and reads.
    Running,
    /// Finishing the current tick, not accepting new ones.
    ShuttingDown,
    /// Stopped.
    Stopped,
}

impl PipelineState {
    /// Check if new ticks may start.
    pub fn accepts_ticks(&self) -> bool {
        matches!(self, PipelineState::Starting | PipelineState::Running)
    }

    /// Check if the pipeline is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Stopped)
    }
}
