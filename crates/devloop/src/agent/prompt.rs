//! Conversation assembly for model calls

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use llm_core::ChatMessage;
use serde_json::Value;

use crate::session::{Entry, Session};

/// Memory module holding the run's objective
pub const OBJECTIVE_MODULE: &str = "OverarchingObjective";

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an autonomous software engineer working inside a sandboxed workspace.

Work towards the overarching objective by calling the available tools. Every \
path you pass to a tool is relative to the workspace root; paths outside it \
are refused. Tool results come back as JSON with success, exit_code and output.

Guidelines:
- Inspect before you change: list the file tree and read the files you touch.
- Break larger objectives into tasks with add_task and pick the next one with \
select_and_execute_task. Keep the task list current.
- Use the persistent terminal sessions (session_0, session_1, ...) for builds, \
tests and servers. Check pages you serve with check_browser_tab_for_error.
- When a call fails, read the error and change your approach instead of \
repeating the same call.
- When the objective is met, reply with a short summary and no tool calls.";

/// The system message for the main loop
pub fn system_prompt(custom: Option<&str>, workspace_root: &Path) -> String {
    let base = custom.unwrap_or(DEFAULT_SYSTEM_PROMPT);
    format!("{}\n\nWorkspace root: {}", base, workspace_root.display())
}

/// Working memory rendered as a system message, if there is any
pub fn memory_message(memory: &BTreeMap<String, Value>) -> Option<ChatMessage> {
    if memory.is_empty() {
        return None;
    }
    Some(ChatMessage::system(format!(
        "Working memory:\n{}",
        render_memory(memory)
    )))
}

pub fn render_memory(memory: &BTreeMap<String, Value>) -> String {
    serde_json::to_string_pretty(memory).unwrap_or_else(|_| format!("{:?}", memory))
}

/// Full request conversation: system prompt, working memory, then the
/// session's entries in sequence order
pub fn build_messages(system: &str, session: &Session) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(session.entries.len() + 2);
    messages.push(ChatMessage::system(system));
    messages.extend(memory_message(&session.memory));
    messages.extend(session.messages());
    messages
}

/// Plain-text rendering of the entries, for calls that read the
/// conversation as a document
pub fn transcript(entries: &[Entry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = write!(out, "[{}", entry.role.as_str());
        if let Some(name) = &entry.name {
            let _ = write!(out, " {}", name);
        }
        if let Some(id) = &entry.tool_call_id {
            let _ = write!(out, " {}", id);
        }
        let _ = writeln!(out, "] {}", entry.content);
        for call in &entry.tool_calls {
            let _ = writeln!(
                out,
                "  -> {}({}) [{}]",
                call.function.name, call.function.arguments, call.id
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStore;
    use llm_core::{Role, ToolCall};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_build_messages_order() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let session = store.create("ship it", "/work").unwrap();
        store
            .update_memory(&session.id, |m| {
                m.insert(OBJECTIVE_MODULE.to_string(), json!("ship it"));
            })
            .unwrap();
        store.append(&session.id, ChatMessage::user("ship it")).unwrap();

        let session = store.get(&session.id).unwrap();
        let messages = build_messages(&system_prompt(None, Path::new("/work")), &session);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.ends_with("Workspace root: /work"));
        assert!(messages[1].content.contains(OBJECTIVE_MODULE));
        assert_eq!(messages[2].role, Role::User);
    }

    #[test]
    fn test_empty_memory_omitted() {
        assert!(memory_message(&BTreeMap::new()).is_none());
    }

    #[test]
    fn test_transcript_includes_calls() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let session = store.create("o", "/work").unwrap();
        let call = ToolCall::new("c1", "create_file", json!({"file_path": "a.txt"}));
        store
            .append(&session.id, ChatMessage::assistant_with_tools("", vec![call]))
            .unwrap();
        store
            .append(
                &session.id,
                ChatMessage::tool_result("c1", "create_file", r#"{"success":true}"#),
            )
            .unwrap();

        let text = transcript(&store.list(&session.id).unwrap());
        assert!(text.contains("-> create_file({\"file_path\":\"a.txt\"}) [c1]"));
        assert!(text.contains("[tool create_file c1] {\"success\":true}"));
    }
}
