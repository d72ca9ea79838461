//! The run loop: model call, tool dispatch, reflection, repeat

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use llm_core::{ApiError, ChatMessage, ChatRequest, ModelGateway, Role, ToolCall};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::events::RunEvent;
use super::parse::parse_text_tool_calls;
use super::prompt::{self, OBJECTIVE_MODULE};
use super::reflection::{reflect, ReflectionError};
use super::state::{AgentConfig, AgentState, FailureTracker, LoopPhase, RunOutcome, RunStatus};
use crate::sandbox::Sandbox;
use crate::session::{Session, SessionStore};
use crate::terminal::TerminalManager;
use crate::tools::router::ToolRouter;
use crate::tools::{ToolContext, ToolResult};

/// Drives one session at a time towards its objective
pub struct AgentLoop {
    gateway: ModelGateway,
    router: ToolRouter,
    store: Arc<SessionStore>,
    sandbox: Sandbox,
    config: AgentConfig,
    terminals: Option<Arc<TerminalManager>>,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl AgentLoop {
    pub fn new(
        gateway: ModelGateway,
        router: ToolRouter,
        store: Arc<SessionStore>,
        sandbox: Sandbox,
        config: AgentConfig,
    ) -> Self {
        Self {
            gateway,
            router,
            store,
            sandbox,
            config,
            terminals: None,
            events: None,
        }
    }

    /// Terminal sessions to pre-open before the first round
    pub fn with_terminals(mut self, terminals: Arc<TerminalManager>) -> Self {
        self.terminals = Some(terminals);
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Start a new session for `objective` and run it until it stops
    pub async fn run(&self, objective: &str, cancel: CancellationToken) -> Result<RunOutcome> {
        let session = self
            .store
            .create(objective, self.sandbox.root())
            .context("Failed to create session")?;
        self.store.update_memory(&session.id, |memory| {
            memory.insert(OBJECTIVE_MODULE.to_string(), json!(objective));
        })?;
        self.store.append(&session.id, ChatMessage::user(objective))?;
        info!(session_id = %session.id, "Starting run");

        self.drive(&session.id, cancel).await
    }

    /// Continue an existing session
    pub async fn resume(&self, session_id: &str, cancel: CancellationToken) -> Result<RunOutcome> {
        let session = self
            .store
            .get(session_id)
            .with_context(|| format!("Cannot resume session {}", session_id))?;
        if session.workspace_root != self.sandbox.root() {
            warn!(
                session_id,
                recorded = %session.workspace_root.display(),
                current = %self.sandbox.root().display(),
                "Resuming in a different workspace than the session was created in"
            );
        }
        let settled = self.settle_dangling_calls(&session)?;
        if settled > 0 {
            info!(session_id, settled, "Recorded interrupted tool calls");
        }
        info!(session_id, entries = session.entries.len(), "Resuming run");

        self.drive(session_id, cancel).await
    }

    #[instrument(skip(self, cancel), fields(model = %self.config.model))]
    async fn drive(&self, session_id: &str, cancel: CancellationToken) -> Result<RunOutcome> {
        if let Some(terminals) = &self.terminals {
            terminals.ensure_sessions(self.config.terminal_sessions);
        }

        let system = prompt::system_prompt(self.config.system_prompt.as_deref(), self.sandbox.root());
        let tools = self.router.registry().tool_definitions();
        let ctx = ToolContext::new(self.sandbox.clone(), session_id, self.store.clone())
            .with_max_output_len(self.config.max_output_len)
            .with_cancel(cancel.clone());
        let mut state = AgentState::new();

        let outcome = loop {
            if cancel.is_cancelled() {
                info!(iteration = state.iteration, "Run cancelled");
                break state.finish(session_id, RunStatus::Cancelled, None);
            }
            if state.iteration >= self.config.max_iterations {
                warn!(max_iterations = self.config.max_iterations, "Iteration limit reached");
                break state.finish(session_id, RunStatus::IterationLimit, None);
            }

            state.iteration += 1;
            self.emit(RunEvent::RoundStarted {
                iteration: state.iteration,
            });
            state.transition(LoopPhase::Dispatching);

            let session = self.store.get(session_id)?;
            let request = ChatRequest::new(&self.config.model, prompt::build_messages(&system, &session))
                .with_options(self.config.options.clone())
                .with_tools(tools.clone());

            let response = match self.gateway.call(&request, &cancel).await {
                Ok(response) => response,
                Err(ApiError::Cancelled) => {
                    info!(iteration = state.iteration, "Run cancelled during model call");
                    break state.finish(session_id, RunStatus::Cancelled, None);
                }
                Err(e) => {
                    warn!(iteration = state.iteration, error = %e, "Model call failed, stopping run");
                    break state.finish(session_id, RunStatus::Failed, Some(e.to_string()));
                }
            };

            let mut calls = response.tool_calls;
            if calls.is_empty() {
                let registry = self.router.registry();
                if let Some(parsed) =
                    parse_text_tool_calls(&response.content, |name| registry.get(name).is_some())
                {
                    debug!(count = parsed.len(), "Parsed tool calls from reply text");
                    calls = parsed;
                }
            }
            let content = response.content;
            if !content.trim().is_empty() {
                state.final_response = Some(content.clone());
                self.emit(RunEvent::AssistantText {
                    content: content.clone(),
                });
            }

            if calls.is_empty() {
                self.store.append(session_id, ChatMessage::assistant(content))?;
                info!(iterations = state.iteration, "Model finished without tool calls");
                break state.finish(session_id, RunStatus::Completed, None);
            }

            self.store
                .append(session_id, ChatMessage::assistant_with_tools(content, calls.clone()))?;

            state.transition(LoopPhase::ExecutingTools);
            let results = self.execute_calls(&calls, &ctx).await;
            for (call, result) in calls.iter().zip(results) {
                let result = annotate_repeats(&mut state.failure_tracker, call, result);
                self.store.append(
                    session_id,
                    ChatMessage::tool_result(&call.id, &call.function.name, result.to_content()),
                )?;
            }

            if !self.config.reflection || cancel.is_cancelled() {
                continue;
            }

            state.transition(LoopPhase::Reflecting);
            let session = self.store.get(session_id)?;
            match reflect(&self.gateway, &self.config.reflection_model, &session, &cancel).await {
                Ok(reflection) => {
                    self.store.append(session_id, reflection.to_message())?;
                    self.emit(RunEvent::Reflection {
                        thoughts: reflection.summary(),
                        objective_complete: reflection.is_complete(),
                    });
                    if reflection.is_complete() {
                        info!(iterations = state.iteration, "Reflection declared the objective complete");
                        break state.finish(session_id, RunStatus::Completed, None);
                    }
                }
                Err(ReflectionError::Api(ApiError::Cancelled)) => {
                    break state.finish(session_id, RunStatus::Cancelled, None);
                }
                Err(e) => warn!(error = %e, "Reflection failed, skipping"),
            }
        };

        info!(
            session_id,
            status = %outcome.status,
            iterations = outcome.iterations,
            "Run finished"
        );
        self.emit(RunEvent::Finished {
            outcome: outcome.clone(),
        });
        Ok(outcome)
    }

    /// Run every call of one response; results come back in call order
    async fn execute_calls(&self, calls: &[ToolCall], ctx: &ToolContext) -> Vec<ToolResult> {
        let waves = if self.config.parallel_tools {
            self.router.waves(calls, ctx)
        } else {
            (0..calls.len()).map(|i| vec![i]).collect()
        };

        let mut results: Vec<Option<ToolResult>> = vec![None; calls.len()];
        for wave in waves {
            if ctx.cancel.is_cancelled() {
                for i in wave {
                    results[i] = Some(ToolResult::error("Cancelled before execution"));
                }
                continue;
            }

            for &i in &wave {
                self.emit(RunEvent::ToolStarted {
                    call_id: calls[i].id.clone(),
                    name: calls[i].function.name.clone(),
                    arguments: calls[i].function.arguments.clone(),
                });
            }
            let outputs = join_all(wave.iter().map(|&i| self.router.route(&calls[i], ctx))).await;
            for (i, result) in wave.into_iter().zip(outputs) {
                self.emit(RunEvent::ToolFinished {
                    call_id: calls[i].id.clone(),
                    name: calls[i].function.name.clone(),
                    result: result.clone(),
                });
                results[i] = Some(result);
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| ToolResult::error("Call was not executed")))
            .collect()
    }

    /// Give every unanswered call of the last assistant turn a failed
    /// result, so the conversation is well formed again
    fn settle_dangling_calls(&self, session: &Session) -> Result<usize> {
        let Some(pos) = session
            .entries
            .iter()
            .rposition(|e| e.role == Role::Assistant && !e.tool_calls.is_empty())
        else {
            return Ok(0);
        };

        let answered: HashSet<&str> = session.entries[pos + 1..]
            .iter()
            .filter(|e| e.role == Role::Tool)
            .filter_map(|e| e.tool_call_id.as_deref())
            .collect();

        let mut settled = 0;
        for call in &session.entries[pos].tool_calls {
            if answered.contains(call.id.as_str()) {
                continue;
            }
            let result = ToolResult::error("Interrupted before the call completed");
            self.store.append(
                &session.id,
                ChatMessage::tool_result(&call.id, &call.function.name, result.to_content()),
            )?;
            settled += 1;
        }
        Ok(settled)
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            // A dropped receiver only means nobody is watching
            let _ = events.send(event);
        }
    }
}

/// Note repeated identical failures on the result shown to the model
fn annotate_repeats(tracker: &mut FailureTracker, call: &ToolCall, mut result: ToolResult) -> ToolResult {
    let signature = FailureTracker::tool_signature(&call.function.name, &call.function.arguments);
    if result.success {
        tracker.record_success(&signature);
        return result;
    }
    let count = tracker.record_failure(&signature);
    if count > 1 {
        debug!(tool = %call.function.name, count, "Repeated failing call");
        result.output.push_str(&format!(
            "\n[This identical call has now failed {} times in a row. Change the arguments or try a different approach.]",
            count
        ));
    }
    result
}
