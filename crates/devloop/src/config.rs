//! Configuration for devloop
//!
//! Read from `devloop.toml`, found by walking up from the current directory,
//! or from the path given with `--config`. Missing sections use defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use llm_core::{ChatOptions, GatewayConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::AgentConfig;
use crate::session::default_sessions_dir;
use crate::terminal::{DockerShell, LocalShell, ShellLauncher};
use crate::walk::ExclusionSet;

pub const CONFIG_FILE_NAME: &str = "devloop.toml";

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevloopConfig {
    pub model: GatewayConfig,
    pub workspace: WorkspaceConfig,
    pub agent: AgentSection,
    pub terminal: TerminalConfig,
    pub browser: BrowserConfig,
    pub sessions: SessionsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Sandbox root; the current directory when unset
    pub root: Option<PathBuf>,
    /// Default depth for `read_directory_contents`
    pub read_depth: usize,
    pub exclude: ExclusionSet,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: None,
            read_depth: 10,
            exclude: ExclusionSet::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_iterations: usize,
    pub reflection: bool,
    pub terminal_sessions: usize,
    pub parallel_tools: bool,
    pub max_output_len: usize,
    /// Replaces the built-in system prompt
    pub system_prompt: Option<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        let defaults = AgentConfig::default();
        Self {
            max_iterations: defaults.max_iterations,
            reflection: defaults.reflection,
            terminal_sessions: defaults.terminal_sessions,
            parallel_tools: defaults.parallel_tools,
            max_output_len: defaults.max_output_len,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalBackend {
    #[default]
    Local,
    Docker,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub backend: TerminalBackend,
    /// Container name or id for the docker backend
    pub container: Option<String>,
    pub shell: String,
    pub command_timeout_secs: u64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            backend: TerminalBackend::Local,
            container: None,
            shell: "bash".to_string(),
            command_timeout_secs: 120,
        }
    }
}

impl TerminalConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Launcher for the configured backend
    pub fn launcher(&self, workspace: &Path) -> Result<Arc<dyn ShellLauncher>> {
        match self.backend {
            TerminalBackend::Local => Ok(Arc::new(LocalShell {
                shell: self.shell.clone(),
                working_dir: workspace.to_path_buf(),
            })),
            TerminalBackend::Docker => {
                let Some(container) = self.container.clone() else {
                    bail!("terminal.backend = \"docker\" requires terminal.container");
                };
                DockerShell::check_available()?;
                Ok(Arc::new(DockerShell {
                    container,
                    shell: self.shell.clone(),
                    working_dir: None,
                }))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: format!("devloop/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub dir: Option<PathBuf>,
}

impl DevloopConfig {
    /// Load from `explicit`, else from the nearest `devloop.toml`, else
    /// defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        match Self::find_config_path(&cwd) {
            Some(path) => Self::load_from(path),
            None => {
                debug!("No {} found, using defaults", CONFIG_FILE_NAME);
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Search `start` and up to nine of its parents
    pub fn find_config_path(start: &Path) -> Option<PathBuf> {
        let mut current = start.to_path_buf();
        for _ in 0..10 {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !current.pop() {
                break;
            }
        }
        None
    }

    /// Platform location written by `init-config`
    pub fn default_config_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(dir.join("devloop").join(CONFIG_FILE_NAME))
    }

    /// Write the commented default configuration to `path`
    pub fn create_default(path: &Path) -> Result<()> {
        if path.exists() {
            bail!("Config file already exists: {}", path.display());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, DEFAULT_CONFIG)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Sandbox root: the override, then `workspace.root`, then the current
    /// directory
    pub fn workspace_root(&self, override_root: Option<&Path>) -> Result<PathBuf> {
        match override_root.or(self.workspace.root.as_deref()) {
            Some(root) => Ok(root.to_path_buf()),
            None => std::env::current_dir().context("Failed to read current directory"),
        }
    }

    pub fn sessions_dir(&self) -> Result<PathBuf> {
        match &self.sessions.dir {
            Some(dir) => Ok(dir.clone()),
            None => default_sessions_dir(),
        }
    }

    pub fn agent_config(&self) -> AgentConfig {
        let options = ChatOptions::default()
            .with_temperature(self.model.temperature)
            .with_max_tokens(self.model.max_tokens);
        let mut config = AgentConfig::new(self.model.model.clone())
            .with_reflection_model(self.model.reflection_model())
            .with_options(options)
            .with_max_iterations(self.agent.max_iterations)
            .with_reflection(self.agent.reflection)
            .with_parallel_tools(self.agent.parallel_tools)
            .with_terminal_sessions(self.agent.terminal_sessions)
            .with_max_output_len(self.agent.max_output_len);
        if let Some(prompt) = &self.agent.system_prompt {
            config = config.with_system_prompt(prompt.clone());
        }
        config
    }
}

const DEFAULT_CONFIG: &str = r#"# devloop configuration
# Looked up as ./devloop.toml (or in a parent directory), or passed with --config.

[model]
# Any OpenAI-compatible endpoint
base_url = "https://api.openai.com/v1"
# Environment variable holding the API key
api_key_env = "OPENAI_API_KEY"
model = "gpt-4o"
# reflection_model = "gpt-4o-mini"
# edit_model = "gpt-4o"
temperature = 0.0
# max_tokens = 4096
request_timeout_secs = 120

[model.retry]
max_attempts = 3
delay_ms = 5000

[workspace]
# Sandbox root; defaults to the current directory
# root = "/path/to/project"
read_depth = 10

# [workspace.exclude]
# files = [".DS_Store", "package-lock.json"]
# dirs = ["node_modules", "dist", "build"]
# extensions = [".png", ".svg"]

[agent]
max_iterations = 50
reflection = true
terminal_sessions = 4
parallel_tools = true
max_output_len = 50000

[terminal]
# "local" or "docker"
backend = "local"
# container = "dev"
shell = "bash"
command_timeout_secs = 120

[browser]
timeout_secs = 30

[sessions]
# dir = "/path/to/sessions"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = DevloopConfig::default();
        assert_eq!(config.agent.max_iterations, 50);
        assert_eq!(config.agent.terminal_sessions, 4);
        assert!(config.agent.reflection);
        assert_eq!(config.terminal.backend, TerminalBackend::Local);
        assert!(config.workspace.exclude.excludes_dir("node_modules"));
    }

    #[test]
    fn test_default_template_parses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        DevloopConfig::create_default(&path).unwrap();

        let config = DevloopConfig::load_from(&path).unwrap();
        assert_eq!(config.model.retry_config().max_attempts, 3);
        assert_eq!(config.agent, AgentSection::default());
        assert_eq!(config.workspace.exclude, ExclusionSet::default());

        assert!(DevloopConfig::create_default(&path).is_err());
    }

    #[test]
    fn test_partial_sections() {
        let config: DevloopConfig = toml::from_str(
            r#"
[model]
model = "qwen2.5-coder"
reflection_model = "qwen2.5:7b"
temperature = 0.2

[agent]
max_iterations = 12
reflection = false

[terminal]
backend = "docker"
container = "sandbox"

[workspace.exclude]
dirs = ["target"]
"#,
        )
        .unwrap();

        let agent = config.agent_config();
        assert_eq!(agent.model, "qwen2.5-coder");
        assert_eq!(agent.reflection_model, "qwen2.5:7b");
        assert_eq!(agent.options.temperature, 0.2);
        assert_eq!(agent.max_iterations, 12);
        assert!(!agent.reflection);
        assert!(agent.parallel_tools);

        assert_eq!(config.terminal.backend, TerminalBackend::Docker);
        assert_eq!(config.terminal.shell, "bash");
        assert!(config.workspace.exclude.excludes_dir("target"));
        assert!(!config.workspace.exclude.excludes_dir("node_modules"));
        assert!(config.workspace.exclude.excludes_file(".DS_Store"));
    }

    #[test]
    fn test_find_config_walks_up() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "[agent]\nmax_iterations = 3\n").unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let found = DevloopConfig::find_config_path(&nested).unwrap();
        assert_eq!(found, dir.path().join(CONFIG_FILE_NAME));
        let config = DevloopConfig::load(Some(&found)).unwrap();
        assert_eq!(config.agent.max_iterations, 3);
    }

    #[test]
    fn test_explicit_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        let err = DevloopConfig::load(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }

    #[test]
    fn test_workspace_root_precedence() {
        let config: DevloopConfig = toml::from_str("[workspace]\nroot = \"/srv/app\"\n").unwrap();
        assert_eq!(config.workspace_root(None).unwrap(), PathBuf::from("/srv/app"));
        assert_eq!(
            config.workspace_root(Some(Path::new("/tmp/other"))).unwrap(),
            PathBuf::from("/tmp/other")
        );
    }

    #[test]
    fn test_docker_backend_requires_container() {
        let config = TerminalConfig {
            backend: TerminalBackend::Docker,
            ..Default::default()
        };
        let err = config.launcher(Path::new("/tmp")).err().unwrap();
        assert!(err.to_string().contains("terminal.container"));
    }
}
