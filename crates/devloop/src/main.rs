//! devloop: autonomous coding-agent loop
//!
//! Give it an objective and a workspace; it drives a model through tool
//! calls until the objective is met, persisting every step as a session.

mod commands;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

use devloop::config::DevloopConfig;

#[derive(Debug, Parser)]
#[command(name = "devloop")]
#[command(about = "Autonomous coding-agent loop over a sandboxed workspace", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: nearest devloop.toml)
    #[arg(short, long, global = true, env = "DEVLOOP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start a new session and work towards an objective
    Run {
        /// The objective, in plain language
        #[arg(required = true)]
        objective: Vec<String>,

        /// Workspace root (overrides config)
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Model to use (overrides config)
        #[arg(short, long)]
        model: Option<String>,

        /// Maximum rounds before stopping
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Skip the internal monologue between rounds
        #[arg(long)]
        no_reflection: bool,

        /// Run the tool calls of a round one at a time
        #[arg(long)]
        sequential: bool,
    },

    /// Continue a saved session ("latest" for the most recent)
    Resume {
        /// Session id
        id: String,
    },

    /// Manage saved sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Show the tools advertised to the model
    Tools {
        /// Output the raw schema as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a default config file to the platform config directory
    InitConfig,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum SessionAction {
    /// List saved sessions
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a session's entries and working memory
    Show {
        /// Session id
        id: String,
    },
    /// Delete a session
    Delete {
        /// Session id
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config_path = cli.config;
    let load_config = || DevloopConfig::load(config_path.as_deref());

    match cli.command {
        Commands::Run {
            objective,
            workspace,
            model,
            max_iterations,
            no_reflection,
            sequential,
        } => {
            let overrides = commands::RunOverrides {
                workspace,
                model,
                max_iterations,
                no_reflection,
                sequential,
            };
            commands::run(&load_config()?, &objective.join(" "), overrides).await
        }
        Commands::Resume { id } => commands::resume(&load_config()?, &id).await,
        Commands::Sessions { action } => {
            let config = load_config()?;
            match action {
                SessionAction::List { json } => commands::sessions_list(&config, json),
                SessionAction::Show { id } => commands::sessions_show(&config, &id),
                SessionAction::Delete { id } => commands::sessions_delete(&config, &id),
            }
        }
        Commands::Tools { json } => commands::tools(&load_config()?, json),
        Commands::InitConfig => commands::init_config(),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "devloop", &mut io::stdout());
            Ok(())
        }
    }
}
