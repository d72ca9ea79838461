//! Tool framework for the run loop
//!
//! Every capability the model can invoke is a [`Tool`]: a name, a parameter
//! schema advertised to the model, and an `execute` that always ends in a
//! [`ToolResult`]. Errors never cross the router; they come back as failed
//! results the model can read.

pub mod builtin;
pub mod registry;
pub mod router;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use llm_core::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::sandbox::{PathError, Sandbox};
use crate::session::SessionStore;

/// Generic failure
pub const EXIT_FAILURE: i32 = 1;
/// Path refused by the sandbox
pub const EXIT_SANDBOX: i32 = 2;
/// Command or shell did not finish in time
pub const EXIT_TIMEOUT: i32 = 124;
/// Unknown tool name
pub const EXIT_NOT_FOUND: i32 = 127;

/// Uniform outcome of every tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    /// 0 on success
    pub exit_code: i32,
    /// Always present, pre-serialized when structured
    pub output: String,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: 0,
            output: output.into(),
        }
    }

    /// Successful result carrying pretty-printed JSON
    pub fn json(value: &Value) -> Self {
        Self::success(serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()))
    }

    /// Generic failure (exit code 1)
    pub fn error(output: impl Into<String>) -> Self {
        Self::failure(EXIT_FAILURE, output)
    }

    pub fn failure(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code,
            output: output.into(),
        }
    }

    /// Wire form folded into the conversation as a tool entry
    pub fn to_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.output.clone())
    }
}

impl From<PathError> for ToolResult {
    fn from(err: PathError) -> Self {
        Self::failure(EXIT_SANDBOX, err.to_string())
    }
}

/// Per-call context handed to every tool
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub sandbox: Sandbox,
    /// Session the call belongs to
    pub session_id: String,
    pub store: Arc<SessionStore>,
    /// Outputs longer than this are truncated by the router
    pub max_output_len: usize,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(sandbox: Sandbox, session_id: impl Into<String>, store: Arc<SessionStore>) -> Self {
        Self {
            sandbox,
            session_id: session_id.into(),
            store,
            max_output_len: 50_000,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_max_output_len(mut self, len: usize) -> Self {
        self.max_output_len = len;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Schema for a single tool parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterProperty {
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterProperty>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterProperty {
    fn typed(param_type: &str, description: impl Into<String>) -> Self {
        Self {
            param_type: param_type.to_string(),
            description: description.into(),
            enum_values: None,
            items: None,
            default: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::typed("string", description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::typed("integer", description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::typed("boolean", description)
    }

    /// Array whose elements follow `items`
    pub fn array(description: impl Into<String>, items: ParameterProperty) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::typed("array", description)
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_enum(mut self, values: Vec<String>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// `{"type": "object", "properties": {...}, "required": [...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: BTreeMap<String, ParameterProperty>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        self.properties.insert(name.into(), prop);
        self
    }

    pub fn with_required(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), prop);
        self.required.push(name);
        self
    }
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// What a call touches, used to decide which calls of one model turn may
/// run concurrently
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Footprint {
    pub reads: Vec<PathBuf>,
    pub writes: Vec<PathBuf>,
    /// Terminal sessions used
    pub terminals: Vec<String>,
    /// Mutates the session's working memory
    pub memory: bool,
    /// Conflicts with every other call
    pub exclusive: bool,
}

impl Footprint {
    pub fn exclusive() -> Self {
        Self {
            exclusive: true,
            ..Default::default()
        }
    }

    pub fn reads(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            reads: paths.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn writes(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            writes: paths.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn terminal(session_id: impl Into<String>) -> Self {
        Self {
            terminals: vec![session_id.into()],
            ..Default::default()
        }
    }

    pub fn memory() -> Self {
        Self {
            memory: true,
            ..Default::default()
        }
    }

    /// Two calls conflict when either is exclusive, they share a terminal
    /// or the working memory, or one writes a path the other touches.
    /// Paths overlap when one is a prefix of the other.
    pub fn conflicts_with(&self, other: &Footprint) -> bool {
        if self.exclusive || other.exclusive {
            return true;
        }
        if self.memory && other.memory {
            return true;
        }
        if self.terminals.iter().any(|t| other.terminals.contains(t)) {
            return true;
        }

        let overlaps = |written: &[PathBuf], touched: &[&PathBuf]| {
            written
                .iter()
                .any(|w| touched.iter().any(|t| paths_overlap(w, t)))
        };
        let mine: Vec<&PathBuf> = self.reads.iter().chain(self.writes.iter()).collect();
        let theirs: Vec<&PathBuf> = other.reads.iter().chain(other.writes.iter()).collect();
        overlaps(&self.writes, &theirs) || overlaps(&other.writes, &mine)
    }
}

fn paths_overlap(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// A capability the model can invoke by name
#[async_trait]
pub trait Tool: Send + Sync {
    /// Exact wire name
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> ParameterSchema;

    /// Resources the call with these arguments will touch. The default is
    /// exclusive, so tools that do not say otherwise run alone.
    fn footprint(&self, _args: &Value, _ctx: &ToolContext) -> Footprint {
        Footprint::exclusive()
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult>;

    fn to_definition(&self) -> ToolDefinition {
        let parameters = serde_json::to_value(self.parameters_schema()).unwrap_or_default();
        ToolDefinition::function(self.name(), self.description(), parameters)
    }
}

/// Required string argument
pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("Missing required parameter: {}", key))
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

/// Non-negative integer argument; numeric strings are accepted too
pub(crate) fn optional_usize(args: &Value, key: &str) -> Result<Option<usize>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| {
                // models often send whole numbers as floats, e.g. 2.0
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                    .filter(|f| *f <= u64::MAX as f64)
                    .map(|f| f as u64)
            })
            .map(|n| Some(n as usize))
            .ok_or_else(|| anyhow!("Parameter {} must be a non-negative integer", key)),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("Parameter {} must be a non-negative integer", key)),
        Some(_) => Err(anyhow!("Parameter {} must be a non-negative integer", key)),
    }
}

/// Resolve an argument through the sandbox for footprint purposes; refused
/// paths fall back to an exclusive footprint
pub(crate) fn footprint_paths(
    ctx: &ToolContext,
    args: &Value,
    keys: &[&str],
) -> Option<Vec<PathBuf>> {
    keys.iter()
        .map(|key| {
            optional_str(args, key).and_then(|p| ctx.sandbox.resolve(p).ok())
        })
        .collect()
}

/// Cut output at `max_len` bytes on a char boundary
pub fn truncate_output(output: &str, max_len: usize) -> String {
    if output.len() <= max_len {
        return output.to_string();
    }
    let mut cut = max_len;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n... (output truncated, {} bytes total)",
        &output[..cut],
        output.len()
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// Workspace and session store in temporary directories
    pub struct Fixture {
        pub workspace: TempDir,
        pub _store_dir: TempDir,
        pub ctx: ToolContext,
    }

    impl Fixture {
        pub fn new() -> Self {
            let workspace = TempDir::new().unwrap();
            let store_dir = TempDir::new().unwrap();
            let store = Arc::new(SessionStore::open(store_dir.path()).unwrap());
            let session = store.create("test objective", workspace.path()).unwrap();
            let sandbox = Sandbox::new(workspace.path()).unwrap();
            let ctx = ToolContext::new(sandbox, session.id, store);
            Self {
                workspace,
                _store_dir: store_dir,
                ctx,
            }
        }

        pub fn path(&self, rel: &str) -> PathBuf {
            self.workspace.path().join(rel)
        }

        pub fn write(&self, rel: &str, content: &str) {
            let path = self.path(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }

        pub fn read(&self, rel: &str) -> String {
            std::fs::read_to_string(self.path(rel)).unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_wire_shape() {
        let value: Value = serde_json::from_str(&ToolResult::error("nope").to_content()).unwrap();
        assert_eq!(value, json!({"success": false, "exit_code": 1, "output": "nope"}));
    }

    #[test]
    fn test_path_error_maps_to_sandbox_code() {
        let result: ToolResult = PathError::InvalidPath("~/x".to_string()).into();
        assert!(!result.success);
        assert_eq!(result.exit_code, EXIT_SANDBOX);
    }

    #[test]
    fn test_schema_serialization() {
        let schema = ParameterSchema::new()
            .with_required("path", ParameterProperty::string("Target"))
            .with_property(
                "depth",
                ParameterProperty::integer("Levels").with_default(json!(3)),
            )
            .with_property(
                "mode",
                ParameterProperty::string("Mode").with_enum(vec!["a".into(), "b".into()]),
            )
            .with_property(
                "resources",
                ParameterProperty::array("Files", ParameterProperty::string("A file")),
            );
        let value = serde_json::to_value(schema).unwrap();
        assert_eq!(value["type"], "object");
        assert_eq!(value["required"], json!(["path"]));
        assert_eq!(value["properties"]["depth"]["default"], 3);
        assert_eq!(value["properties"]["mode"]["enum"], json!(["a", "b"]));
        assert_eq!(value["properties"]["resources"]["items"]["type"], "string");
    }

    #[test]
    fn test_footprint_conflicts() {
        let a = Footprint::writes([PathBuf::from("/w/src")]);
        let b = Footprint::reads([PathBuf::from("/w/src/main.rs")]);
        let c = Footprint::reads([PathBuf::from("/w/docs")]);
        let d = Footprint::reads([PathBuf::from("/w/src/lib.rs")]);

        assert!(a.conflicts_with(&b));
        assert!(b.conflicts_with(&a));
        assert!(!a.conflicts_with(&c));
        // readers never conflict with each other
        assert!(!b.conflicts_with(&d));

        assert!(Footprint::terminal("session_0").conflicts_with(&Footprint::terminal("session_0")));
        assert!(!Footprint::terminal("session_0").conflicts_with(&Footprint::terminal("session_1")));
        assert!(Footprint::memory().conflicts_with(&Footprint::memory()));
        assert!(Footprint::exclusive().conflicts_with(&c));
    }

    #[test]
    fn test_sibling_prefix_does_not_overlap() {
        let a = Footprint::writes([PathBuf::from("/w/src")]);
        let b = Footprint::writes([PathBuf::from("/w/srcX")]);
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn test_optional_usize() {
        assert_eq!(optional_usize(&json!({"d": 2}), "d").unwrap(), Some(2));
        assert_eq!(optional_usize(&json!({"d": "4"}), "d").unwrap(), Some(4));
        assert_eq!(optional_usize(&json!({}), "d").unwrap(), None);
        assert!(optional_usize(&json!({"d": -1}), "d").is_err());
        assert!(optional_usize(&json!({"d": true}), "d").is_err());
        assert_eq!(optional_usize(&json!({"d": 2.0}), "d").unwrap(), Some(2));
        assert_eq!(optional_usize(&json!({"d": 0.0}), "d").unwrap(), Some(0));
        assert!(optional_usize(&json!({"d": 2.5}), "d").is_err());
        assert!(optional_usize(&json!({"d": -3.0}), "d").is_err());
    }

    #[test]
    fn test_truncate_output() {
        assert_eq!(truncate_output("short", 10), "short");
        let out = truncate_output("ééééé", 3);
        assert!(out.starts_with("é\n"));
        assert!(out.contains("10 bytes total"));
    }
}
