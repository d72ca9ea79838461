//! File creation, moving, renaming and deletion inside the workspace

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::tools::{
    footprint_paths, required_str, Footprint, ParameterProperty, ParameterSchema, Tool,
    ToolContext, ToolResult,
};

fn write_footprint(ctx: &ToolContext, args: &Value, keys: &[&str]) -> Footprint {
    footprint_paths(ctx, args, keys).map_or_else(Footprint::exclusive, Footprint::writes)
}

/// Replace a file's contents through a temporary sibling and a rename, so
/// readers see either the old or the new contents
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("No parent directory for {}", path.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    tmp.write_all(contents.as_bytes())
        .context("Failed to write temporary file")?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Create an empty file
pub struct CreateFileTool;

#[async_trait]
impl Tool for CreateFileTool {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create an empty file at file_path, relative to the workspace root. Parent directories are created as needed. Fails if the file already exists."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_required(
            "file_path",
            ParameterProperty::string("Path for the new file, relative to the workspace root"),
        )
    }

    fn footprint(&self, args: &Value, ctx: &ToolContext) -> Footprint {
        write_footprint(ctx, args, &["file_path"])
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let file_path = required_str(args, "file_path")?;
        let path = match ctx.sandbox.resolve(file_path) {
            Ok(p) => p,
            Err(e) => return Ok(e.into()),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directories for {}", file_path))?;
        }

        // create_new refuses to touch an existing file
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {
                debug!(path = %path.display(), "Created file");
                Ok(ToolResult::success(format!("File {} created successfully", file_path)))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Ok(ToolResult::error(format!("File {} already exists", file_path)))
            }
            Err(e) => Ok(ToolResult::error(format!("Failed to create {}: {}", file_path, e))),
        }
    }
}

/// Move a file, replacing any existing destination
pub struct MoveFileTool;

#[async_trait]
impl Tool for MoveFileTool {
    fn name(&self) -> &str {
        "move_file"
    }

    fn description(&self) -> &str {
        "Move a file from current_file_path to new_file_path, both relative to the workspace root. An existing file at the destination is replaced."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required(
                "current_file_path",
                ParameterProperty::string("Current path of the file, relative to the workspace root"),
            )
            .with_required(
                "new_file_path",
                ParameterProperty::string("New path for the file, relative to the workspace root"),
            )
    }

    fn footprint(&self, args: &Value, ctx: &ToolContext) -> Footprint {
        write_footprint(ctx, args, &["current_file_path", "new_file_path"])
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let from = required_str(args, "current_file_path")?;
        let to = required_str(args, "new_file_path")?;
        relocate(ctx, from, to, false)
    }
}

/// Rename a file; the new name must be free
pub struct RenameFileTool;

#[async_trait]
impl Tool for RenameFileTool {
    fn name(&self) -> &str {
        "rename_file"
    }

    fn description(&self) -> &str {
        "Rename a file from old_file_path to new_file_path, both relative to the workspace root. Fails if new_file_path already exists."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required(
                "old_file_path",
                ParameterProperty::string("Old path of the file, relative to the workspace root"),
            )
            .with_required(
                "new_file_path",
                ParameterProperty::string("New path for the file, relative to the workspace root"),
            )
    }

    fn footprint(&self, args: &Value, ctx: &ToolContext) -> Footprint {
        write_footprint(ctx, args, &["old_file_path", "new_file_path"])
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let from = required_str(args, "old_file_path")?;
        let to = required_str(args, "new_file_path")?;
        relocate(ctx, from, to, true)
    }
}

fn relocate(ctx: &ToolContext, from: &str, to: &str, refuse_existing: bool) -> Result<ToolResult> {
    let source = match ctx.sandbox.resolve(from) {
        Ok(p) => p,
        Err(e) => return Ok(e.into()),
    };
    let dest = match ctx.sandbox.resolve(to) {
        Ok(p) => p,
        Err(e) => return Ok(e.into()),
    };

    if !source.exists() {
        return Ok(ToolResult::error(format!("File {} does not exist", from)));
    }
    if source == ctx.sandbox.root() {
        return Ok(ToolResult::error("The workspace root cannot be moved"));
    }
    if refuse_existing && dest.exists() {
        return Ok(ToolResult::error(format!("File {} already exists", to)));
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directories for {}", to))?;
    }
    match fs::rename(&source, &dest) {
        Ok(()) => {
            debug!(from = %source.display(), to = %dest.display(), "Moved file");
            Ok(ToolResult::success(format!("File moved from {} to {}", from, to)))
        }
        Err(e) => Ok(ToolResult::error(format!("Failed to move {} to {}: {}", from, to, e))),
    }
}

/// Delete a single file
pub struct DeleteFileTool;

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete the file at file_path, relative to the workspace root."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_required(
            "file_path",
            ParameterProperty::string("Path of the file to delete, relative to the workspace root"),
        )
    }

    fn footprint(&self, args: &Value, ctx: &ToolContext) -> Footprint {
        write_footprint(ctx, args, &["file_path"])
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let file_path = required_str(args, "file_path")?;
        let path = match ctx.sandbox.resolve(file_path) {
            Ok(p) => p,
            Err(e) => return Ok(e.into()),
        };

        if path.is_dir() {
            return Ok(ToolResult::error(format!("{} is a directory, not a file", file_path)));
        }
        match fs::remove_file(&path) {
            Ok(()) => Ok(ToolResult::success(format!("File {} deleted successfully", file_path))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Ok(ToolResult::error(format!("File {} does not exist", file_path)))
            }
            Err(e) => Ok(ToolResult::error(format!("Failed to delete {}: {}", file_path, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::Fixture;
    use crate::tools::EXIT_SANDBOX;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_file_with_parents() {
        let fx = Fixture::new();
        let result = CreateFileTool
            .execute(&json!({"file_path": "src/app/page.tsx"}), &fx.ctx)
            .await
            .unwrap();
        assert!(result.success, "{}", result.output);
        assert_eq!(fx.read("src/app/page.tsx"), "");
    }

    #[tokio::test]
    async fn test_create_existing_file_keeps_content() {
        let fx = Fixture::new();
        fx.write("a.txt", "original");

        let result = CreateFileTool
            .execute(&json!({"file_path": "a.txt"}), &fx.ctx)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("already exists"));
        assert_eq!(fx.read("a.txt"), "original");
    }

    #[tokio::test]
    async fn test_create_outside_root_refused() {
        let fx = Fixture::new();
        let result = CreateFileTool
            .execute(&json!({"file_path": "../escape.txt"}), &fx.ctx)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, EXIT_SANDBOX);
        assert!(!fx.workspace.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_move_overwrites_destination() {
        let fx = Fixture::new();
        fx.write("a.txt", "from a");
        fx.write("b.txt", "from b");

        let result = MoveFileTool
            .execute(
                &json!({"current_file_path": "a.txt", "new_file_path": "b.txt"}),
                &fx.ctx,
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(fx.read("b.txt"), "from a");
        assert!(!fx.path("a.txt").exists());
    }

    #[tokio::test]
    async fn test_move_missing_source() {
        let fx = Fixture::new();
        let result = MoveFileTool
            .execute(
                &json!({"current_file_path": "nope.txt", "new_file_path": "b.txt"}),
                &fx.ctx,
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("does not exist"));
    }

    #[tokio::test]
    async fn test_rename_refuses_collision() {
        let fx = Fixture::new();
        fx.write("old.txt", "old");
        fx.write("new.txt", "new");

        let result = RenameFileTool
            .execute(&json!({"old_file_path": "old.txt", "new_file_path": "new.txt"}), &fx.ctx)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(fx.read("old.txt"), "old");
        assert_eq!(fx.read("new.txt"), "new");

        let result = RenameFileTool
            .execute(&json!({"old_file_path": "old.txt", "new_file_path": "renamed.txt"}), &fx.ctx)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(fx.read("renamed.txt"), "old");
    }

    #[tokio::test]
    async fn test_delete_file() {
        let fx = Fixture::new();
        fx.write("gone.txt", "x");

        let result = DeleteFileTool
            .execute(&json!({"file_path": "gone.txt"}), &fx.ctx)
            .await
            .unwrap();
        assert!(result.success);
        assert!(!fx.path("gone.txt").exists());

        let again = DeleteFileTool
            .execute(&json!({"file_path": "gone.txt"}), &fx.ctx)
            .await
            .unwrap();
        assert!(!again.success);
    }

    #[tokio::test]
    async fn test_delete_refuses_directory() {
        let fx = Fixture::new();
        fx.write("dir/inner.txt", "x");
        let result = DeleteFileTool
            .execute(&json!({"file_path": "dir"}), &fx.ctx)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(fx.path("dir/inner.txt").exists());
    }

    #[test]
    fn test_write_atomic_replaces() {
        let fx = Fixture::new();
        fx.write("f.txt", "before");
        write_atomic(&fx.path("f.txt"), "after").unwrap();
        assert_eq!(fx.read("f.txt"), "after");
        assert_eq!(std::fs::read_dir(fx.workspace.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_footprints() {
        let fx = Fixture::new();
        let fp = MoveFileTool.footprint(
            &json!({"current_file_path": "a", "new_file_path": "b"}),
            &fx.ctx,
        );
        assert_eq!(fp.writes, vec![fx.path("a"), fx.path("b")]);

        let fp = CreateFileTool.footprint(&json!({"file_path": "~/x"}), &fx.ctx);
        assert!(fp.exclusive);
    }
}
