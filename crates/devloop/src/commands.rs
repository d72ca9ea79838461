//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use llm_core::{ChatOptions, ModelGateway};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use devloop::agent::{AgentConfig, AgentLoop, RunEvent, RunOutcome, RunStatus};
use devloop::browser::HttpProbe;
use devloop::config::DevloopConfig;
use devloop::sandbox::Sandbox;
use devloop::session::SessionStore;
use devloop::terminal::TerminalManager;
use devloop::tools::builtin::{create_default_registry, ToolDeps};
use devloop::tools::registry::ToolRegistry;
use devloop::tools::router::ToolRouter;

// ANSI color codes
const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const YELLOW: &str = "\x1b[93m";
const CYAN: &str = "\x1b[96m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Overrides given on the `run` command line
#[derive(Debug, Default)]
pub struct RunOverrides {
    pub workspace: Option<PathBuf>,
    pub model: Option<String>,
    pub max_iterations: Option<usize>,
    pub no_reflection: bool,
    pub sequential: bool,
}

impl RunOverrides {
    fn apply(&self, mut config: AgentConfig) -> AgentConfig {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(max) = self.max_iterations {
            config = config.with_max_iterations(max);
        }
        if self.no_reflection {
            config = config.with_reflection(false);
        }
        if self.sequential {
            config = config.with_parallel_tools(false);
        }
        config
    }
}

fn clip(text: &str, max: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= max {
        return single_line;
    }
    let kept: String = single_line.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

fn open_store(config: &DevloopConfig) -> Result<SessionStore> {
    let dir = config.sessions_dir()?;
    SessionStore::open(&dir).with_context(|| format!("Failed to open session store at {}", dir.display()))
}

fn build_registry(
    config: &DevloopConfig,
    gateway: ModelGateway,
    terminals: Arc<TerminalManager>,
) -> Result<ToolRegistry> {
    let browser = HttpProbe::new(
        Duration::from_secs(config.browser.timeout_secs),
        &config.browser.user_agent,
    )?;
    create_default_registry(ToolDeps {
        gateway,
        edit_model: config.model.edit_model().to_string(),
        edit_options: ChatOptions::json().with_max_tokens(config.model.max_tokens),
        terminals,
        browser: Arc::new(browser),
        exclude: Arc::new(config.workspace.exclude.clone()),
        read_depth: config.workspace.read_depth,
    })
}

/// Wire the loop and its collaborators for one workspace
fn build_agent(
    config: &DevloopConfig,
    workspace: &Path,
    agent_config: AgentConfig,
    events: mpsc::UnboundedSender<RunEvent>,
) -> Result<(AgentLoop, Arc<TerminalManager>)> {
    if !workspace.is_dir() {
        bail!("Workspace {} is not a directory", workspace.display());
    }
    let sandbox = Sandbox::new(workspace)?;
    let gateway = config.model.build_gateway()?;
    let store = Arc::new(open_store(config)?);

    let launcher = config.terminal.launcher(sandbox.root())?;
    let terminals = Arc::new(TerminalManager::new(launcher, config.terminal.command_timeout()));
    let registry = build_registry(config, gateway.clone(), terminals.clone())?;

    let agent = AgentLoop::new(gateway, ToolRouter::new(registry), store, sandbox, agent_config)
        .with_terminals(terminals.clone())
        .with_events(events);
    Ok((agent, terminals))
}

async fn render_events(mut events: mpsc::UnboundedReceiver<RunEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            RunEvent::RoundStarted { iteration } => {
                println!("{}[Round {}]{}", DIM, iteration, RESET);
            }
            RunEvent::AssistantText { content } => {
                println!("{}", content.trim());
            }
            RunEvent::ToolStarted { name, arguments, .. } => {
                println!(
                    "  {}→ {}{} {}{}{}",
                    CYAN,
                    name,
                    RESET,
                    DIM,
                    clip(&arguments.to_string(), 100),
                    RESET
                );
            }
            RunEvent::ToolFinished { name, result, .. } => {
                let (icon, color) = if result.success { ("✓", GREEN) } else { ("✗", RED) };
                println!(
                    "  {}{}{} {} {}(exit {}){} {}",
                    color,
                    icon,
                    RESET,
                    name,
                    DIM,
                    result.exit_code,
                    RESET,
                    clip(&result.output, 80)
                );
            }
            RunEvent::Reflection {
                thoughts,
                objective_complete,
            } => {
                println!("  {}thinking: {}{}", DIM, clip(&thoughts, 160), RESET);
                if objective_complete {
                    println!("  {}Objective reported complete{}", GREEN, RESET);
                }
            }
            RunEvent::Finished { .. } => {}
        }
    }
}

/// Run `start` with Ctrl-C wired to cancellation and events rendered
async fn drive<F, Fut>(
    config: &DevloopConfig,
    workspace: &Path,
    agent_config: AgentConfig,
    start: F,
) -> Result<RunOutcome>
where
    F: FnOnce(AgentLoop, CancellationToken) -> Fut,
    Fut: std::future::Future<Output = (AgentLoop, Result<RunOutcome>)>,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let (agent, terminals) = build_agent(config, workspace, agent_config, tx)?;
    let renderer = tokio::spawn(render_events(rx));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}Cancelling after the current step...{}", YELLOW, RESET);
            on_interrupt.cancel();
        }
    });

    let (agent, outcome) = start(agent, cancel).await;
    terminals.shutdown().await;
    drop(agent);
    let _ = renderer.await;
    outcome
}

fn report(outcome: &RunOutcome) -> Result<()> {
    println!();
    match outcome.status {
        RunStatus::Completed => println!(
            "{}Completed{} in {} rounds",
            GREEN, RESET, outcome.iterations
        ),
        RunStatus::Cancelled => println!(
            "{}Cancelled{} after {} rounds",
            YELLOW, RESET, outcome.iterations
        ),
        RunStatus::IterationLimit => println!(
            "{}Stopped{}: iteration limit of {} rounds reached",
            YELLOW, RESET, outcome.iterations
        ),
        RunStatus::Failed => println!("{}Failed{} in round {}", RED, RESET, outcome.iterations),
    }
    println!("{}Session:{} {}", DIM, RESET, outcome.session_id);
    println!(
        "{}Resume with:{} devloop resume {}",
        DIM, RESET, outcome.session_id
    );

    if outcome.status == RunStatus::Failed {
        bail!(
            "{}",
            outcome.error.as_deref().unwrap_or("model call failed")
        );
    }
    Ok(())
}

/// Start a new session for `objective`
pub async fn run(config: &DevloopConfig, objective: &str, overrides: RunOverrides) -> Result<()> {
    if objective.trim().is_empty() {
        bail!("An objective is required");
    }
    let workspace = config.workspace_root(overrides.workspace.as_deref())?;
    let agent_config = overrides.apply(config.agent_config());

    println!("{}devloop{}", BOLD, RESET);
    println!("  Model: {}", agent_config.model);
    println!("  Workspace: {}", workspace.display());
    println!("  Objective: {}", objective);
    println!();

    let objective = objective.to_string();
    let outcome = drive(config, &workspace, agent_config, |agent, cancel| async move {
        let outcome = agent.run(&objective, cancel).await;
        (agent, outcome)
    })
    .await?;
    report(&outcome)
}

/// Continue a saved session; `latest` picks the most recently updated one
pub async fn resume(config: &DevloopConfig, id: &str) -> Result<()> {
    let store = open_store(config)?;
    let session_id = if id == "latest" {
        store
            .list_sessions()?
            .first()
            .map(|s| s.id.clone())
            .context("No sessions found")?
    } else {
        id.to_string()
    };
    let session = store.get(&session_id)?;
    let agent_config = config.agent_config();

    println!("{}Resuming session:{} {}", BOLD, RESET, session.id);
    println!("  Objective: {}", session.objective);
    println!("  Entries: {}", session.entries.len());
    println!();

    let outcome = drive(
        config,
        &session.workspace_root,
        agent_config,
        |agent, cancel| async move {
            let outcome = agent.resume(&session_id, cancel).await;
            (agent, outcome)
        },
    )
    .await?;
    report(&outcome)
}

pub fn sessions_list(config: &DevloopConfig, json: bool) -> Result<()> {
    let sessions = open_store(config)?.list_sessions()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("No saved sessions found.");
        return Ok(());
    }

    println!("{}Saved Sessions:{}", BOLD, RESET);
    println!();
    for s in &sessions {
        println!("  {}", s.short_description());
    }
    println!();
    println!("{}Resume with:{} devloop resume <id>", DIM, RESET);
    Ok(())
}

pub fn sessions_show(config: &DevloopConfig, id: &str) -> Result<()> {
    let session = open_store(config)?.get(id)?;

    println!("{}Session:{} {}", BOLD, RESET, session.id);
    println!("  Objective: {}", session.objective);
    println!("  Workspace: {}", session.workspace_root.display());
    println!("  Created: {}", session.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Updated: {}", session.updated_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Entries: {}", session.entries.len());
    if let Some(snapshot) = &session.workspace_snapshot {
        println!(
            "  Snapshot: {} files from '{}' at {}",
            snapshot.files.len(),
            snapshot.path,
            snapshot.taken_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    if !session.memory.is_empty() {
        println!();
        println!("{}Working memory:{}", BOLD, RESET);
        for (module, value) in &session.memory {
            println!("  {}{}{}: {}", CYAN, module, RESET, clip(&value.to_string(), 100));
        }
    }

    println!();
    println!("{}Entries:{}", BOLD, RESET);
    for entry in &session.entries {
        let label = match &entry.name {
            Some(name) => format!("{} {}", entry.role, name),
            None => entry.role.to_string(),
        };
        println!("  {:>4}. [{}] {}", entry.seq, label, clip(&entry.content, 100));
        for call in &entry.tool_calls {
            println!(
                "        {}→ {} {}{}",
                DIM,
                call.function.name,
                clip(&call.function.arguments.to_string(), 80),
                RESET
            );
        }
    }
    Ok(())
}

pub fn sessions_delete(config: &DevloopConfig, id: &str) -> Result<()> {
    open_store(config)?.delete_session(id)?;
    println!("{}Deleted session:{} {}", GREEN, RESET, id);
    Ok(())
}

/// Print the tool schema advertised to the model
pub fn tools(config: &DevloopConfig, json: bool) -> Result<()> {
    let workspace = config.workspace_root(None)?;
    let gateway = config.model.build_gateway()?;
    let launcher = config.terminal.launcher(&workspace)?;
    let terminals = Arc::new(TerminalManager::new(launcher, config.terminal.command_timeout()));
    let registry = build_registry(config, gateway, terminals)?;
    let definitions = registry.tool_definitions();

    if json {
        println!("{}", serde_json::to_string_pretty(&definitions)?);
        return Ok(());
    }

    println!("{}Tools ({}):{}", BOLD, definitions.len(), RESET);
    for def in &definitions {
        println!("  {}{}{}", CYAN, def.function.name, RESET);
        println!("    {}{}{}", DIM, def.function.description, RESET);
    }
    Ok(())
}

pub fn init_config() -> Result<()> {
    let path = DevloopConfig::default_config_path()?;
    DevloopConfig::create_default(&path)?;
    println!("{}Created config:{} {}", GREEN, RESET, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip() {
        assert_eq!(clip("short", 10), "short");
        assert_eq!(clip("line one\nline two", 100), "line one line two");
        assert_eq!(clip("abcdefghij", 6), "abc...");
    }

    #[test]
    fn test_overrides_apply() {
        let overrides = RunOverrides {
            model: Some("other".into()),
            max_iterations: Some(5),
            no_reflection: true,
            sequential: true,
            ..Default::default()
        };
        let config = overrides.apply(AgentConfig::new("base"));
        assert_eq!(config.model, "other");
        assert_eq!(config.max_iterations, 5);
        assert!(!config.reflection);
        assert!(!config.parallel_tools);
    }
}
