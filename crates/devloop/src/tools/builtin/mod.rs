//! Built-in tools

mod browser;
mod edit;
mod files;
mod retrieval;
mod tasks;
mod terminal;

pub use browser::CheckBrowserTool;
pub use edit::{EditError, EditFileTool};
pub use files::{CreateFileTool, DeleteFileTool, MoveFileTool, RenameFileTool};
pub use retrieval::{
    GetFileTreeTool, ReadDirectoryContentsTool, ReadFileContentsTool, DEFAULT_TREE_DEPTH,
};
pub use tasks::{
    AddTaskTool, RemoveTaskTool, SelectTaskTool, UpdateTaskTool, CURRENT_FOCUS_MODULE,
    TASK_LIST_MODULE,
};
pub use terminal::{
    CloseTerminalSessionTool, GetTerminalHistoryTool, NewTerminalSessionTool,
    SendTerminalCommandTool,
};

use std::sync::Arc;

use anyhow::Result;
use llm_core::{ChatOptions, ModelGateway};

use super::registry::ToolRegistry;
use crate::browser::BrowserBackend;
use crate::terminal::TerminalManager;
use crate::walk::ExclusionSet;

/// Collaborators the built-in tools are constructed with
pub struct ToolDeps {
    /// Gateway used by `edit_file_contents`
    pub gateway: ModelGateway,
    pub edit_model: String,
    pub edit_options: ChatOptions,
    pub terminals: Arc<TerminalManager>,
    pub browser: Arc<dyn BrowserBackend>,
    pub exclude: Arc<ExclusionSet>,
    /// Default depth for `read_directory_contents`
    pub read_depth: usize,
}

/// Create a registry with every built-in tool, validated
pub fn create_default_registry(deps: ToolDeps) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    // Files
    registry.register(CreateFileTool)?;
    registry.register(MoveFileTool)?;
    registry.register(RenameFileTool)?;
    registry.register(DeleteFileTool)?;
    registry.register(
        EditFileTool::new(deps.gateway, deps.edit_model).with_options(deps.edit_options),
    )?;

    // Retrieval
    registry.register(GetFileTreeTool::new(deps.exclude.clone()))?;
    registry.register(ReadFileContentsTool)?;
    registry.register(ReadDirectoryContentsTool::new(deps.exclude, deps.read_depth))?;

    // Terminal
    registry.register(NewTerminalSessionTool::new(deps.terminals.clone()))?;
    registry.register(CloseTerminalSessionTool::new(deps.terminals.clone()))?;
    registry.register(SendTerminalCommandTool::new(deps.terminals.clone()))?;
    registry.register(GetTerminalHistoryTool::new(deps.terminals))?;

    // Browser
    registry.register(CheckBrowserTool::new(deps.browser))?;

    // Tasks
    registry.register(AddTaskTool)?;
    registry.register(UpdateTaskTool)?;
    registry.register(RemoveTaskTool)?;
    registry.register(SelectTaskTool)?;

    registry.validate()?;
    Ok(registry)
}

#[cfg(test)]
pub(crate) mod test_deps {
    use super::*;
    use crate::browser::BrowserReport;
    use crate::terminal::LocalShell;
    use async_trait::async_trait;
    use llm_core::ScriptedBackend;
    use std::path::Path;
    use std::time::Duration;

    pub struct CleanPage;

    #[async_trait]
    impl BrowserBackend for CleanPage {
        async fn inspect(&self, _url: &str) -> Result<BrowserReport> {
            Ok(BrowserReport {
                errors_found: false,
                details: Vec::new(),
            })
        }
    }

    /// Deps with a local shell in `workspace` and the given edit backend
    pub fn deps(workspace: &Path, backend: Arc<ScriptedBackend>) -> ToolDeps {
        let launcher = LocalShell {
            shell: "bash".to_string(),
            working_dir: workspace.to_path_buf(),
        };
        ToolDeps {
            gateway: ModelGateway::new(backend),
            edit_model: "edit-model".to_string(),
            edit_options: ChatOptions::json(),
            terminals: Arc::new(TerminalManager::new(Arc::new(launcher), Duration::from_secs(10))),
            browser: Arc::new(CleanPage),
            exclude: Arc::new(ExclusionSet::default()),
            read_depth: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_core::ScriptedBackend;
    use tempfile::TempDir;

    const CATALOGUE: &[&str] = &[
        "add_task",
        "check_browser_tab_for_error",
        "close_terminal_session",
        "create_file",
        "delete_file",
        "edit_file_contents",
        "get_file_tree",
        "get_latest_terminal_session_history",
        "move_file",
        "new_terminal_session",
        "read_directory_contents",
        "read_file_contents",
        "remove_task",
        "rename_file",
        "select_and_execute_task",
        "send_terminal_command",
        "update_task",
    ];

    #[test]
    fn test_default_registry_catalogue() {
        let dir = TempDir::new().unwrap();
        let registry =
            create_default_registry(test_deps::deps(dir.path(), Arc::new(ScriptedBackend::default())))
                .unwrap();
        assert_eq!(registry.list_names(), CATALOGUE);
    }

    #[test]
    fn test_definitions_are_function_schemas() {
        let dir = TempDir::new().unwrap();
        let registry =
            create_default_registry(test_deps::deps(dir.path(), Arc::new(ScriptedBackend::default())))
                .unwrap();
        for def in registry.tool_definitions() {
            assert_eq!(def.tool_type, "function");
            assert_eq!(def.function.parameters["type"], "object");
            assert!(!def.function.description.is_empty());
        }
    }
}
