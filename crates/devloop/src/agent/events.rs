//! Progress events emitted while a run advances

use serde_json::Value;

use super::state::RunOutcome;
use crate::tools::ToolResult;

/// What the loop is doing, for display
#[derive(Debug, Clone)]
pub enum RunEvent {
    RoundStarted {
        iteration: usize,
    },
    /// Text the model produced alongside (or instead of) tool calls
    AssistantText {
        content: String,
    },
    ToolStarted {
        call_id: String,
        name: String,
        arguments: Value,
    },
    ToolFinished {
        call_id: String,
        name: String,
        result: ToolResult,
    },
    Reflection {
        thoughts: String,
        objective_complete: bool,
    },
    Finished {
        outcome: RunOutcome,
    },
}
