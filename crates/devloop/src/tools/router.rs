//! Tool routing and dispatch

use llm_core::ToolCall;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::registry::ToolRegistry;
use super::{truncate_output, Footprint, ToolContext, ToolResult, EXIT_FAILURE, EXIT_NOT_FOUND};

/// Router for dispatching tool calls by name
pub struct ToolRouter {
    registry: ToolRegistry,
}

impl ToolRouter {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// Route a single tool call. Never fails: unknown names and tool errors
    /// come back as failed results.
    #[instrument(skip(self, ctx), fields(tool = %call.function.name, call_id = %call.id))]
    pub async fn route(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let name = &call.function.name;
        let tool = match self.registry.get(name) {
            Some(t) => t,
            None => {
                warn!(tool = %name, "Tool not found");
                return ToolResult::failure(
                    EXIT_NOT_FOUND,
                    format!("function not found: {}", name),
                );
            }
        };

        let args = normalized_args(&call.function.arguments);
        info!(tool = %name, "Executing tool");
        let result = match tool.execute(&args, ctx).await {
            Ok(result) => {
                if result.success {
                    info!(tool = %name, output_len = result.output.len(), "Tool executed successfully");
                } else {
                    warn!(tool = %name, exit_code = result.exit_code, "Tool execution failed");
                }
                result
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool execution error");
                ToolResult::failure(EXIT_FAILURE, format!("{:#}", e))
            }
        };

        ToolResult {
            output: truncate_output(&result.output, ctx.max_output_len),
            ..result
        }
    }

    /// Group calls into waves that may each run concurrently.
    ///
    /// A call lands one wave after the latest earlier call it conflicts
    /// with, so conflicting calls keep their response order. Indices refer
    /// to `calls`.
    pub fn waves(&self, calls: &[ToolCall], ctx: &ToolContext) -> Vec<Vec<usize>> {
        let footprints: Vec<Footprint> = calls
            .iter()
            .map(|call| match self.registry.get(&call.function.name) {
                Some(tool) => tool.footprint(&normalized_args(&call.function.arguments), ctx),
                // Unknown tools fail without side effects
                None => Footprint::default(),
            })
            .collect();

        let mut wave_of: Vec<usize> = Vec::with_capacity(calls.len());
        let mut waves: Vec<Vec<usize>> = Vec::new();
        for (i, footprint) in footprints.iter().enumerate() {
            let wave = (0..i)
                .filter(|&j| footprint.conflicts_with(&footprints[j]))
                .map(|j| wave_of[j] + 1)
                .max()
                .unwrap_or(0);
            wave_of.push(wave);
            if waves.len() <= wave {
                waves.resize_with(wave + 1, Vec::new);
            }
            waves[wave].push(i);
        }

        debug!(calls = calls.len(), waves = waves.len(), "Planned tool waves");
        waves
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

/// Missing arguments are treated as an empty object
fn normalized_args(args: &Value) -> Value {
    match args {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    }
}

impl std::fmt::Debug for ToolRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRouter")
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::Fixture;
    use crate::tools::{required_str, ParameterSchema, Tool};
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::PathBuf;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes input"
        }

        fn parameters_schema(&self) -> ParameterSchema {
            ParameterSchema::new()
        }

        fn footprint(&self, args: &Value, _ctx: &ToolContext) -> Footprint {
            match args.get("path").and_then(|v| v.as_str()) {
                Some(p) => Footprint::writes([PathBuf::from(p)]),
                None => Footprint::default(),
            }
        }

        async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
            let text = required_str(args, "text")?;
            Ok(ToolResult::success(text))
        }
    }

    fn router() -> ToolRouter {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        ToolRouter::new(registry)
    }

    fn echo(id: &str, args: Value) -> ToolCall {
        ToolCall::new(id, "echo", args)
    }

    #[tokio::test]
    async fn test_route_success() {
        let fx = Fixture::new();
        let result = router().route(&echo("1", json!({"text": "hello"})), &fx.ctx).await;
        assert!(result.success);
        assert_eq!(result.output, "hello");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_failed_result() {
        let fx = Fixture::new();
        let call = ToolCall::new("1", "nonexistent", json!({}));
        let result = router().route(&call, &fx.ctx).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, EXIT_NOT_FOUND);
        assert!(result.output.contains("function not found"));
    }

    #[tokio::test]
    async fn test_tool_error_becomes_failed_result() {
        let fx = Fixture::new();
        let result = router().route(&echo("1", Value::Null), &fx.ctx).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, EXIT_FAILURE);
        assert!(result.output.contains("Missing required parameter: text"));
    }

    #[tokio::test]
    async fn test_output_truncated() {
        let fx = Fixture::new();
        let ctx = fx.ctx.clone().with_max_output_len(4);
        let result = router().route(&echo("1", json!({"text": "abcdefgh"})), &ctx).await;
        assert!(result.output.starts_with("abcd\n"));
    }

    #[test]
    fn test_waves_keep_conflicting_calls_ordered() {
        let fx = Fixture::new();
        let calls = vec![
            echo("a", json!({"path": "/w/a"})),
            echo("b", json!({"path": "/w/b"})),
            echo("c", json!({"path": "/w/a/x"})),
            ToolCall::new("d", "missing", json!({})),
            echo("e", json!({"path": "/w/a"})),
        ];
        let waves = router().waves(&calls, &fx.ctx);
        assert_eq!(waves, vec![vec![0, 1, 3], vec![2], vec![4]]);
    }
}
