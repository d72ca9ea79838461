//! Static registry mapping tool names to handlers

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use llm_core::ToolDefinition;

use super::Tool;

/// Registry of available tools, keyed by exact wire name
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool; a second tool with the same name is refused
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            bail!("Tool already registered: {}", name);
        }
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered names, sorted
    pub fn list_names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Check every schema once, at startup
    pub fn validate(&self) -> Result<()> {
        for (name, tool) in &self.tools {
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            {
                bail!("Invalid tool name: {:?}", name);
            }
            let schema = tool.parameters_schema();
            if schema.schema_type != "object" {
                bail!("Tool {} must take an object of parameters", name);
            }
            for required in &schema.required {
                if !schema.properties.contains_key(required) {
                    bail!(
                        "Tool {} requires parameter {} that its schema does not declare",
                        name,
                        required
                    );
                }
            }
        }
        Ok(())
    }

    /// Definitions advertised to the model, sorted by name
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.list_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ParameterProperty, ParameterSchema, ToolContext, ToolResult};
    use async_trait::async_trait;
    use serde_json::Value;

    struct MockTool {
        name: &'static str,
        schema: ParameterSchema,
    }

    impl MockTool {
        fn named(name: &'static str) -> Self {
            Self {
                name,
                schema: ParameterSchema::new(),
            }
        }
    }

    #[async_trait]
    impl Tool for MockTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "A mock tool for testing"
        }

        fn parameters_schema(&self) -> ParameterSchema {
            self.schema.clone()
        }

        async fn execute(&self, _args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
            Ok(ToolResult::success("mock output"))
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::named("mock")).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get("mock").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_duplicate_name_refused() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::named("mock")).unwrap();
        assert!(registry.register(MockTool::named("mock")).is_err());
    }

    #[test]
    fn test_definitions_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::named("zeta")).unwrap();
        registry.register(MockTool::named("alpha")).unwrap();

        let defs = registry.tool_definitions();
        assert_eq!(defs[0].function.name, "alpha");
        assert_eq!(defs[1].function.name, "zeta");
        assert_eq!(defs[0].function.parameters["type"], "object");
    }

    #[test]
    fn test_validate_catches_undeclared_required() {
        let mut schema = ParameterSchema::new().with_property("a", ParameterProperty::string("a"));
        schema.required.push("b".to_string());

        let mut registry = ToolRegistry::new();
        registry.register(MockTool { name: "broken", schema }).unwrap();
        assert!(registry.validate().is_err());
    }

    #[test]
    fn test_validate_catches_bad_name() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::named("Bad-Name")).unwrap();
        assert!(registry.validate().is_err());
    }
}
