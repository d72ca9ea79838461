//! Run configuration and per-run state

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use llm_core::ChatOptions;
use serde::Serialize;
use tracing::debug;

/// Configuration for a run
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model answering the main loop
    pub model: String,
    /// Model producing internal monologues
    pub reflection_model: String,
    /// Sampling options for main-loop calls
    pub options: ChatOptions,
    /// Replaces the built-in system prompt when set
    pub system_prompt: Option<String>,
    /// Rounds before the run stops with `IterationLimit`
    pub max_iterations: usize,
    /// Reflect after every round of tool results
    pub reflection: bool,
    /// Run non-conflicting calls of one round concurrently
    pub parallel_tools: bool,
    /// Terminal sessions opened before the first round
    pub terminal_sessions: usize,
    /// Tool outputs are truncated past this many bytes
    pub max_output_len: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            reflection_model: "gpt-4o".to_string(),
            options: ChatOptions::default(),
            system_prompt: None,
            max_iterations: 50,
            reflection: true,
            parallel_tools: true,
            terminal_sessions: 4,
            max_output_len: 50_000,
        }
    }
}

impl AgentConfig {
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            reflection_model: model.clone(),
            model,
            ..Default::default()
        }
    }

    pub fn with_reflection_model(mut self, model: impl Into<String>) -> Self {
        self.reflection_model = model.into();
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_reflection(mut self, enabled: bool) -> Self {
        self.reflection = enabled;
        self
    }

    pub fn with_parallel_tools(mut self, enabled: bool) -> Self {
        self.parallel_tools = enabled;
        self
    }

    pub fn with_terminal_sessions(mut self, count: usize) -> Self {
        self.terminal_sessions = count;
        self
    }

    pub fn with_max_output_len(mut self, len: usize) -> Self {
        self.max_output_len = len;
        self
    }
}

/// Where the run loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Idle,
    Dispatching,
    ExecutingTools,
    Reflecting,
    Terminal,
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopPhase::Idle => "idle",
            LoopPhase::Dispatching => "dispatching",
            LoopPhase::ExecutingTools => "executing_tools",
            LoopPhase::Reflecting => "reflecting",
            LoopPhase::Terminal => "terminal",
        };
        f.write_str(s)
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The model stopped calling tools or declared the objective complete
    Completed,
    Cancelled,
    IterationLimit,
    /// A model call failed after retries
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::IterationLimit => "iteration limit reached",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of `AgentLoop::run` and `AgentLoop::resume`
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub session_id: String,
    pub status: RunStatus,
    /// Rounds dispatched in this run
    pub iterations: usize,
    /// Last assistant text, when the model gave one
    pub final_response: Option<String>,
    pub error: Option<String>,
}

/// Mutable state of one run
#[derive(Debug)]
pub struct AgentState {
    pub iteration: usize,
    pub phase: LoopPhase,
    pub final_response: Option<String>,
    pub failure_tracker: FailureTracker,
}

impl AgentState {
    pub fn new() -> Self {
        Self {
            iteration: 0,
            phase: LoopPhase::Idle,
            final_response: None,
            failure_tracker: FailureTracker::default(),
        }
    }

    pub fn transition(&mut self, phase: LoopPhase) {
        debug!(iteration = self.iteration, from = %self.phase, to = %phase, "Phase change");
        self.phase = phase;
    }

    /// Close the run with `status`
    pub fn finish(&mut self, session_id: &str, status: RunStatus, error: Option<String>) -> RunOutcome {
        self.transition(LoopPhase::Terminal);
        RunOutcome {
            session_id: session_id.to_string(),
            status,
            iterations: self.iteration,
            final_response: self.final_response.clone(),
            error,
        }
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts consecutive failures of identical tool calls.
///
/// The run never aborts on repeats; the count is surfaced to the model
/// alongside the failed result.
#[derive(Debug, Default)]
pub struct FailureTracker {
    failures: HashMap<String, usize>,
}

impl FailureTracker {
    /// Signature of a call: tool name plus a hash of its arguments
    pub fn tool_signature(name: &str, args: &serde_json::Value) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        args.to_string().hash(&mut hasher);
        format!("{}:{:x}", name, hasher.finish())
    }

    pub fn record_success(&mut self, signature: &str) {
        self.failures.remove(signature);
    }

    /// Returns the consecutive failure count including this one
    pub fn record_failure(&mut self, signature: &str) -> usize {
        let count = self.failures.entry(signature.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn failure_count(&self, signature: &str) -> usize {
        self.failures.get(signature).copied().unwrap_or(0)
    }
}
