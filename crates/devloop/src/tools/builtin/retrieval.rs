//! Read-only workspace retrieval: file trees, single files, whole directories

use std::fs;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::tools::{
    footprint_paths, optional_usize, required_str, Footprint, ParameterProperty, ParameterSchema,
    Tool, ToolContext, ToolResult,
};
use crate::walk::{list_files, read_files, ExclusionSet};

/// Default depth for `get_file_tree`
pub const DEFAULT_TREE_DEPTH: usize = 3;

fn read_footprint(ctx: &ToolContext, args: &Value) -> Footprint {
    footprint_paths(ctx, args, &["path"]).map_or_else(Footprint::exclusive, Footprint::reads)
}

/// Depth-bounded listing of file paths
pub struct GetFileTreeTool {
    exclude: Arc<ExclusionSet>,
}

impl GetFileTreeTool {
    pub fn new(exclude: Arc<ExclusionSet>) -> Self {
        Self { exclude }
    }
}

#[async_trait]
impl Tool for GetFileTreeTool {
    fn name(&self) -> &str {
        "get_file_tree"
    }

    fn description(&self) -> &str {
        "List files under a directory recursively, up to a depth limit. Paths are relative to the workspace root; returned paths are relative to the listed directory."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required(
                "path",
                ParameterProperty::string("Directory to list, relative to the workspace root"),
            )
            .with_property(
                "depth",
                ParameterProperty::integer("Directory levels to descend, default 3")
                    .with_default(json!(DEFAULT_TREE_DEPTH)),
            )
    }

    fn footprint(&self, args: &Value, ctx: &ToolContext) -> Footprint {
        read_footprint(ctx, args)
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let path = required_str(args, "path")?;
        let depth = optional_usize(args, "depth")?.unwrap_or(DEFAULT_TREE_DEPTH);

        let dir = match ctx.sandbox.resolve(path) {
            Ok(p) => p,
            Err(e) => return Ok(e.into()),
        };
        if !dir.is_dir() {
            return Ok(ToolResult::error(format!(
                "Directory {} does not exist or is not a directory",
                path
            )));
        }

        let paths: Vec<String> = list_files(&dir, depth, &self.exclude)?
            .into_iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        debug!(path, depth, count = paths.len(), "Listed file tree");
        Ok(ToolResult::json(&json!({ "paths": paths })))
    }
}

/// Full text of one file
pub struct ReadFileContentsTool;

#[async_trait]
impl Tool for ReadFileContentsTool {
    fn name(&self) -> &str {
        "read_file_contents"
    }

    fn description(&self) -> &str {
        "Show the contents of the file at path, relative to the workspace root."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_required(
            "path",
            ParameterProperty::string("Path of the file, relative to the workspace root"),
        )
    }

    fn footprint(&self, args: &Value, ctx: &ToolContext) -> Footprint {
        read_footprint(ctx, args)
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let path = required_str(args, "path")?;
        let file = match ctx.sandbox.resolve(path) {
            Ok(p) => p,
            Err(e) => return Ok(e.into()),
        };
        if !file.is_file() {
            return Ok(ToolResult::error(format!("File {} does not exist", path)));
        }

        match fs::read(&file).map(String::from_utf8) {
            Ok(Ok(text)) => Ok(ToolResult::success(text)),
            Ok(Err(_)) => Ok(ToolResult::error(format!(
                "File {} is not valid UTF-8 text",
                path
            ))),
            Err(e) => Ok(ToolResult::error(format!("Failed to read {}: {}", path, e))),
        }
    }
}

/// Every text file under a directory, keyed by relative path. The mapping
/// is cached with the session as the latest workspace snapshot.
pub struct ReadDirectoryContentsTool {
    exclude: Arc<ExclusionSet>,
    default_depth: usize,
}

impl ReadDirectoryContentsTool {
    pub fn new(exclude: Arc<ExclusionSet>, default_depth: usize) -> Self {
        Self {
            exclude,
            default_depth,
        }
    }
}

#[async_trait]
impl Tool for ReadDirectoryContentsTool {
    fn name(&self) -> &str {
        "read_directory_contents"
    }

    fn description(&self) -> &str {
        "Read all text files under a directory, relative to the workspace root, and return a mapping from relative file path to contents. Excluded and non-text files are skipped."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required(
                "path",
                ParameterProperty::string("Path of the directory, relative to the workspace root"),
            )
            .with_property(
                "depth",
                ParameterProperty::integer("Directory levels to descend"),
            )
    }

    fn footprint(&self, args: &Value, ctx: &ToolContext) -> Footprint {
        read_footprint(ctx, args)
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let path = required_str(args, "path")?;
        let depth = optional_usize(args, "depth")?.unwrap_or(self.default_depth);

        let dir = match ctx.sandbox.resolve(path) {
            Ok(p) => p,
            Err(e) => return Ok(e.into()),
        };
        if !dir.is_dir() {
            return Ok(ToolResult::error(format!(
                "Directory {} does not exist or is not a directory",
                path
            )));
        }

        let (contents, skipped) = read_files(&dir, depth, &self.exclude)?;
        debug!(path, files = contents.len(), skipped = skipped.paths.len(), "Read directory");

        let snapshot_path = ctx.sandbox.relative(&dir).to_string_lossy().into_owned();
        let cached =
            ctx.store
                .cache_workspace_snapshot(&ctx.session_id, snapshot_path, contents.clone());

        let mut output = json!({ "contents": contents });
        if !skipped.paths.is_empty() {
            output["skipped"] = json!(skipped.paths);
        }
        if let Err(e) = cached {
            warn!(error = %e, "Failed to cache workspace snapshot");
            output["snapshot_error"] = json!(format!("Workspace snapshot was not saved: {}", e));
        }
        Ok(ToolResult::json(&output))
    }
}
