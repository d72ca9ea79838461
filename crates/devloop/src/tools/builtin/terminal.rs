//! Terminal tools over the session's persistent shells

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::terminal::{CommandRecord, CommandStatus, TerminalManager};
use crate::tools::{
    optional_str, optional_usize, required_str, Footprint, ParameterProperty, ParameterSchema,
    Tool, ToolContext, ToolResult, EXIT_FAILURE, EXIT_TIMEOUT,
};

fn session_footprint(args: &Value) -> Footprint {
    match optional_str(args, "session_id") {
        Some(id) => Footprint::terminal(id),
        None => Footprint::exclusive(),
    }
}

fn record_result(record: &CommandRecord) -> ToolResult {
    let value = serde_json::to_value(record).unwrap_or_else(|_| json!(record.output));
    let exit_code = match (record.status, record.exit_code) {
        (CommandStatus::Completed, Some(code)) => code,
        (CommandStatus::TimedOut, _) => EXIT_TIMEOUT,
        _ => EXIT_FAILURE,
    };
    if exit_code == 0 {
        return ToolResult::json(&value);
    }
    let output = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
    ToolResult::failure(exit_code, output)
}

/// Open another persistent shell
pub struct NewTerminalSessionTool {
    manager: Arc<TerminalManager>,
}

impl NewTerminalSessionTool {
    pub fn new(manager: Arc<TerminalManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for NewTerminalSessionTool {
    fn name(&self) -> &str {
        "new_terminal_session"
    }

    fn description(&self) -> &str {
        "Open a new persistent terminal session and return its session_id."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
    }

    fn footprint(&self, _args: &Value, _ctx: &ToolContext) -> Footprint {
        Footprint::default()
    }

    async fn execute(&self, _args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let id = self.manager.open_session();
        Ok(ToolResult::json(&json!({ "session_id": id })))
    }
}

/// Kill a shell and return its history
pub struct CloseTerminalSessionTool {
    manager: Arc<TerminalManager>,
}

impl CloseTerminalSessionTool {
    pub fn new(manager: Arc<TerminalManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for CloseTerminalSessionTool {
    fn name(&self) -> &str {
        "close_terminal_session"
    }

    fn description(&self) -> &str {
        "Close a terminal session, stopping its shell. Returns the number of commands it ran."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_required(
            "session_id",
            ParameterProperty::string("Terminal session to close"),
        )
    }

    fn footprint(&self, args: &Value, _ctx: &ToolContext) -> Footprint {
        session_footprint(args)
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let id = required_str(args, "session_id")?;
        match self.manager.close_session(id).await {
            Ok(history) => Ok(ToolResult::json(&json!({
                "session_id": id,
                "closed": true,
                "commands_run": history.len(),
            }))),
            Err(e) => Ok(ToolResult::error(e.to_string())),
        }
    }
}

/// Run a command in a session or a one-shot shell
pub struct SendTerminalCommandTool {
    manager: Arc<TerminalManager>,
}

impl SendTerminalCommandTool {
    pub fn new(manager: Arc<TerminalManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for SendTerminalCommandTool {
    fn name(&self) -> &str {
        "send_terminal_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace. With session_id the command runs in that persistent session, keeping its working directory and environment; without it the command runs in a fresh shell. Returns the combined output and exit code."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required(
                "command",
                ParameterProperty::string("The command to execute"),
            )
            .with_property(
                "session_id",
                ParameterProperty::string("Terminal session to run in, e.g. session_0"),
            )
    }

    fn footprint(&self, args: &Value, _ctx: &ToolContext) -> Footprint {
        session_footprint(args)
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let command = required_str(args, "command")?;
        let session_id = optional_str(args, "session_id");

        match self.manager.send(session_id, command, &ctx.cancel).await {
            Ok(record) => Ok(record_result(&record)),
            Err(e) => Ok(ToolResult::error(e.to_string())),
        }
    }
}

/// Recent commands of a session
pub struct GetTerminalHistoryTool {
    manager: Arc<TerminalManager>,
}

impl GetTerminalHistoryTool {
    pub fn new(manager: Arc<TerminalManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for GetTerminalHistoryTool {
    fn name(&self) -> &str {
        "get_latest_terminal_session_history"
    }

    fn description(&self) -> &str {
        "Return the most recent commands of a terminal session with their output and exit codes, oldest first."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required(
                "session_id",
                ParameterProperty::string("Terminal session to inspect"),
            )
            .with_property(
                "limit",
                ParameterProperty::integer("Number of most recent commands to return"),
            )
    }

    fn footprint(&self, args: &Value, _ctx: &ToolContext) -> Footprint {
        session_footprint(args)
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let id = required_str(args, "session_id")?;
        let limit = optional_usize(args, "limit")?;
        match self.manager.history(id, limit).await {
            Ok(history) => Ok(ToolResult::json(&json!({
                "session_id": id,
                "history": history,
            }))),
            Err(e) => Ok(ToolResult::error(e.to_string())),
        }
    }
}
