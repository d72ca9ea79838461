//! Run loop for autonomous objective pursuit
//!
//! Each round sends the session's conversation to the model, dispatches the
//! tool calls it asks for, appends every result to the session and,
//! optionally, asks for an internal monologue before the next round.

mod agent_loop;
mod events;
mod parse;
mod prompt;
mod reflection;
mod state;

pub use agent_loop::AgentLoop;
pub use events::RunEvent;
pub use parse::parse_text_tool_calls;
pub use prompt::OBJECTIVE_MODULE;
pub use reflection::{Reflection, MONOLOGUE_NAME};
pub use state::{AgentConfig, AgentState, FailureTracker, LoopPhase, RunOutcome, RunStatus};
