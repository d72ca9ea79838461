//! Task planning over the session's working memory
//!
//! Tasks live in the `TaskList` module as `{"Task": {"ID", "Instructions",
//! "Resources"}}` objects. Selecting a task records it in `CurrentFocus`.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tools::{
    optional_str, required_str, Footprint, ParameterProperty, ParameterSchema, Tool, ToolContext,
    ToolResult,
};

pub const TASK_LIST_MODULE: &str = "TaskList";
pub const CURRENT_FOCUS_MODULE: &str = "CurrentFocus";

const FOCUS_PREFIX: &str = "I AM CURRENTLY WORKING ON COMPLETING THIS TASK: ";

fn resources_arg(args: &Value, key: &str) -> Result<Option<Vec<String>>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|_| anyhow!("Parameter {} must be an array of strings", key)),
    }
}

/// Run `f` over the task list, creating it when missing or malformed
fn with_task_list<R>(
    memory: &mut BTreeMap<String, Value>,
    f: impl FnOnce(&mut Vec<Value>) -> R,
) -> R {
    let mut tasks = match memory.remove(TASK_LIST_MODULE) {
        Some(Value::Array(tasks)) => tasks,
        _ => Vec::new(),
    };
    let out = f(&mut tasks);
    memory.insert(TASK_LIST_MODULE.to_string(), Value::Array(tasks));
    out
}

fn task_id(task: &Value) -> Option<&str> {
    task.pointer("/Task/ID").and_then(|v| v.as_str())
}

fn task_id_schema(description: &str) -> ParameterSchema {
    ParameterSchema::new().with_required("task_id", ParameterProperty::string(description))
}

/// Append a task to the task list
pub struct AddTaskTool;

#[async_trait]
impl Tool for AddTaskTool {
    fn name(&self) -> &str {
        "add_task"
    }

    fn description(&self) -> &str {
        "Add a new task to the task list in working memory."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        task_id_schema("The unique identifier for the task")
            .with_required(
                "instructions",
                ParameterProperty::string("Detailed instructions for the task"),
            )
            .with_required(
                "resources",
                ParameterProperty::array(
                    "Resources needed for the task",
                    ParameterProperty::string("A resource, such as a file path"),
                ),
            )
    }

    fn footprint(&self, _args: &Value, _ctx: &ToolContext) -> Footprint {
        Footprint::memory()
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let id = required_str(args, "task_id")?.to_string();
        let instructions = required_str(args, "instructions")?.to_string();
        let resources = resources_arg(args, "resources")?.unwrap_or_default();

        let added = ctx.store.update_memory(&ctx.session_id, |memory| {
            with_task_list(memory, |tasks| {
                if tasks.iter().any(|t| task_id(t) == Some(id.as_str())) {
                    return false;
                }
                tasks.push(json!({
                    "Task": {
                        "ID": id,
                        "Instructions": instructions,
                        "Resources": resources,
                    }
                }));
                true
            })
        })?;

        if added {
            debug!(task_id = %id, "Task added");
            Ok(ToolResult::success("Task added successfully."))
        } else {
            Ok(ToolResult::error(format!("Task ID {} already exists.", id)))
        }
    }
}

/// Change instructions or resources of an existing task
pub struct UpdateTaskTool;

#[async_trait]
impl Tool for UpdateTaskTool {
    fn name(&self) -> &str {
        "update_task"
    }

    fn description(&self) -> &str {
        "Update the instructions and/or resources of an existing task in the task list."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        task_id_schema("The unique identifier for the task to update")
            .with_property(
                "instructions",
                ParameterProperty::string("Updated instructions for the task"),
            )
            .with_property(
                "resources",
                ParameterProperty::array(
                    "Updated list of resources for the task",
                    ParameterProperty::string("A resource, such as a file path"),
                ),
            )
    }

    fn footprint(&self, _args: &Value, _ctx: &ToolContext) -> Footprint {
        Footprint::memory()
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let id = required_str(args, "task_id")?;
        let instructions = optional_str(args, "instructions").filter(|s| !s.is_empty());
        let resources = resources_arg(args, "resources")?.filter(|r| !r.is_empty());

        let found = ctx.store.update_memory(&ctx.session_id, |memory| {
            with_task_list(memory, |tasks| {
                let Some(task) = tasks.iter_mut().find(|t| task_id(t) == Some(id)) else {
                    return false;
                };
                if let Some(instructions) = instructions {
                    task["Task"]["Instructions"] = json!(instructions);
                }
                if let Some(resources) = resources {
                    task["Task"]["Resources"] = json!(resources);
                }
                true
            })
        })?;

        if found {
            Ok(ToolResult::success("Task updated successfully."))
        } else {
            Ok(ToolResult::error("Task ID not found."))
        }
    }
}

/// Drop a task from the list
pub struct RemoveTaskTool;

#[async_trait]
impl Tool for RemoveTaskTool {
    fn name(&self) -> &str {
        "remove_task"
    }

    fn description(&self) -> &str {
        "Remove a task from the task list by its ID."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        task_id_schema("The unique identifier for the task to remove")
    }

    fn footprint(&self, _args: &Value, _ctx: &ToolContext) -> Footprint {
        Footprint::memory()
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let id = required_str(args, "task_id")?;

        let removed = ctx.store.update_memory(&ctx.session_id, |memory| {
            with_task_list(memory, |tasks| {
                let pos = tasks.iter().position(|t| task_id(t) == Some(id))?;
                Some(tasks.remove(pos))
            })
        })?;

        match removed {
            Some(task) => Ok(ToolResult::success(format!(
                "Task removed successfully: {}",
                serde_json::to_string_pretty(&task)?
            ))),
            None => Ok(ToolResult::error("Task ID not found.")),
        }
    }
}

/// Make a task the current focus
pub struct SelectTaskTool;

#[async_trait]
impl Tool for SelectTaskTool {
    fn name(&self) -> &str {
        "select_and_execute_task"
    }

    fn description(&self) -> &str {
        "Select a task by its ID and make it the current focus. Work on the selected task next."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        task_id_schema("The unique identifier for the task to select")
    }

    fn footprint(&self, _args: &Value, _ctx: &ToolContext) -> Footprint {
        Footprint::memory()
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let id = required_str(args, "task_id")?;

        let selected = ctx.store.update_memory(&ctx.session_id, |memory| {
            let task = with_task_list(memory, |tasks| {
                tasks.iter().find(|t| task_id(t) == Some(id)).cloned()
            })?;
            let focus = format!("{}{}", FOCUS_PREFIX, task);
            memory.insert(CURRENT_FOCUS_MODULE.to_string(), json!([focus]));
            Some(task)
        })?;

        match selected {
            Some(_) => Ok(ToolResult::success(
                "Updated the working memory 'CurrentFocus'. Now start working on the selected task.",
            )),
            None => Ok(ToolResult::error("Task ID not found.")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::Fixture;

    async fn add(fx: &Fixture, id: &str) -> ToolResult {
        AddTaskTool
            .execute(
                &json!({"task_id": id, "instructions": format!("do {}", id), "resources": ["a.rs"]}),
                &fx.ctx,
            )
            .await
            .unwrap()
    }

    fn tasks(fx: &Fixture) -> Vec<Value> {
        let memory = fx.ctx.store.memory(&fx.ctx.session_id).unwrap();
        memory[TASK_LIST_MODULE].as_array().unwrap().clone()
    }

    #[tokio::test]
    async fn test_add_task_shape() {
        let fx = Fixture::new();
        assert!(add(&fx, "t1").await.success);

        assert_eq!(
            tasks(&fx),
            vec![json!({"Task": {"ID": "t1", "Instructions": "do t1", "Resources": ["a.rs"]}})]
        );
    }

    #[tokio::test]
    async fn test_duplicate_id_refused() {
        let fx = Fixture::new();
        add(&fx, "t1").await;
        assert!(!add(&fx, "t1").await.success);
        assert_eq!(tasks(&fx).len(), 1);
    }

    #[tokio::test]
    async fn test_update_task() {
        let fx = Fixture::new();
        add(&fx, "t1").await;

        let result = UpdateTaskTool
            .execute(&json!({"task_id": "t1", "resources": ["b.rs"]}), &fx.ctx)
            .await
            .unwrap();
        assert!(result.success);
        let task = &tasks(&fx)[0]["Task"];
        assert_eq!(task["Instructions"], "do t1");
        assert_eq!(task["Resources"], json!(["b.rs"]));

        let missing = UpdateTaskTool
            .execute(&json!({"task_id": "t9", "instructions": "x"}), &fx.ctx)
            .await
            .unwrap();
        assert!(!missing.success);
        assert_eq!(missing.output, "Task ID not found.");
    }

    #[tokio::test]
    async fn test_remove_task() {
        let fx = Fixture::new();
        add(&fx, "t1").await;
        add(&fx, "t2").await;

        let result = RemoveTaskTool
            .execute(&json!({"task_id": "t1"}), &fx.ctx)
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("\"ID\": \"t1\""));
        assert_eq!(tasks(&fx).len(), 1);

        let again = RemoveTaskTool
            .execute(&json!({"task_id": "t1"}), &fx.ctx)
            .await
            .unwrap();
        assert_eq!(again.output, "Task ID not found.");
    }

    #[tokio::test]
    async fn test_select_sets_current_focus() {
        let fx = Fixture::new();
        add(&fx, "t1").await;

        let result = SelectTaskTool
            .execute(&json!({"task_id": "t1"}), &fx.ctx)
            .await
            .unwrap();
        assert!(result.success);

        let memory = fx.ctx.store.memory(&fx.ctx.session_id).unwrap();
        let focus = memory[CURRENT_FOCUS_MODULE][0].as_str().unwrap();
        assert!(focus.starts_with(FOCUS_PREFIX));
        assert!(focus.contains("\"ID\":\"t1\""));

        let missing = SelectTaskTool
            .execute(&json!({"task_id": "nope"}), &fx.ctx)
            .await
            .unwrap();
        assert!(!missing.success);
    }

    #[tokio::test]
    async fn test_bad_resources_rejected() {
        let fx = Fixture::new();
        let err = AddTaskTool
            .execute(
                &json!({"task_id": "t", "instructions": "i", "resources": "not-a-list"}),
                &fx.ctx,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("array of strings"));
    }
}
