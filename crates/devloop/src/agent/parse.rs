//! Tool calls written into the reply text
//!
//! Some models answer with JSON in the content instead of native tool
//! calls. Accepted shapes:
//! - a single object: `{"name": "tool", "arguments": {...}}`
//! - an array of such objects
//! - either of the above inside a fenced code block
//! - objects embedded in surrounding prose
//!
//! Objects must carry exactly `name` and `arguments`, and the name must be a
//! registered tool, so JSON quoted in a final answer is left alone.

use llm_core::ToolCall;
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TextCall {
    name: String,
    arguments: Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextCalls {
    One(TextCall),
    Many(Vec<TextCall>),
}

impl TextCall {
    fn into_call(self, is_known: &impl Fn(&str) -> bool) -> Option<ToolCall> {
        if self.name.trim().is_empty() || !is_known(&self.name) {
            return None;
        }
        let arguments = match self.arguments {
            // Some models double-encode the arguments
            Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
            other => other,
        };
        Some(ToolCall::new(
            format!("call_{}", uuid::Uuid::new_v4().simple()),
            self.name,
            arguments,
        ))
    }
}

/// Recover calls to tools accepted by `is_known` from reply text, or `None`
/// when there are none
pub fn parse_text_tool_calls(
    content: &str,
    is_known: impl Fn(&str) -> bool,
) -> Option<Vec<ToolCall>> {
    let content = content.trim();
    if content.is_empty() {
        return None;
    }

    let body = fenced_block(content).unwrap_or(content);
    if let Ok(parsed) = serde_json::from_str::<TextCalls>(body) {
        let calls: Vec<ToolCall> = match parsed {
            TextCalls::One(call) => call.into_call(&is_known).into_iter().collect(),
            TextCalls::Many(calls) => calls
                .into_iter()
                .filter_map(|call| call.into_call(&is_known))
                .collect(),
        };
        return non_empty(calls);
    }

    let calls = embedded_objects(content)
        .filter_map(|obj| serde_json::from_str::<TextCall>(obj).ok())
        .filter_map(|call| call.into_call(&is_known))
        .collect();
    non_empty(calls)
}

fn non_empty(calls: Vec<ToolCall>) -> Option<Vec<ToolCall>> {
    (!calls.is_empty()).then_some(calls)
}

/// Body of the first fenced code block, with an optional language tag
fn fenced_block(content: &str) -> Option<&str> {
    let start = content.find("```")? + 3;
    let rest = &content[start..];
    let body_start = rest.find('\n')? + 1;
    let tag = rest[..body_start].trim();
    if !tag.is_empty() && !tag.eq_ignore_ascii_case("json") {
        return None;
    }
    let body = &rest[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// Top-level `{...}` spans, skipping braces inside string literals
fn embedded_objects(content: &str) -> impl Iterator<Item = &str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in content.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push(&content[start..=i]);
                }
            }
            _ => {}
        }
    }
    spans.into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TOOLS: &[&str] = &[
        "create_file",
        "delete_file",
        "get_file_tree",
        "read_file_contents",
    ];

    fn parse(content: &str) -> Option<Vec<ToolCall>> {
        parse_text_tool_calls(content, |name| TOOLS.contains(&name))
    }

    #[test]
    fn test_single_object() {
        let calls =
            parse(r#"{"name": "read_file_contents", "arguments": {"path": "a.txt"}}"#)
                .unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "read_file_contents");
        assert_eq!(calls[0].function.arguments, json!({"path": "a.txt"}));
        assert!(calls[0].id.starts_with("call_"));
    }

    #[test]
    fn test_fenced_block() {
        let content = "```json\n{\"name\": \"get_file_tree\", \"arguments\": {\"path\": \"\"}}\n```";
        let calls = parse(content).unwrap();
        assert_eq!(calls[0].function.name, "get_file_tree");
    }

    #[test]
    fn test_array_gets_distinct_ids() {
        let content = r#"[
            {"name": "read_file_contents", "arguments": {"path": "a.txt"}},
            {"name": "read_file_contents", "arguments": {"path": "b.txt"}}
        ]"#;
        let calls = parse(content).unwrap();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[test]
    fn test_embedded_in_prose() {
        let content = r#"Let me look around first.
{"name": "get_file_tree", "arguments": {"path": "src", "depth": 2}}
Then I'll decide."#;
        let calls = parse(content).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.arguments["depth"], 2);
    }

    #[test]
    fn test_braces_inside_strings() {
        let content = r#"Writing: {"name": "create_file", "arguments": {"path": "x.js", "content": "fn() { return '}'; }"}}"#;
        let calls = parse(content).unwrap();
        assert_eq!(calls[0].function.arguments["content"], "fn() { return '}'; }");
    }

    #[test]
    fn test_string_arguments_decoded() {
        let content = r#"{"name": "delete_file", "arguments": "{\"path\": \"old.txt\"}"}"#;
        let calls = parse(content).unwrap();
        assert_eq!(calls[0].function.arguments, json!({"path": "old.txt"}));
    }

    #[test]
    fn test_plain_text_and_other_json() {
        assert!(parse("All done, the page renders.").is_none());
        assert!(parse(r#"{"status": "ok"}"#).is_none());
        assert!(parse(r#"{"name": "", "arguments": {}}"#).is_none());
        assert!(parse("```rust\nfn main() {}\n```").is_none());
    }

    #[test]
    fn test_quoted_json_in_final_answer_is_not_a_call() {
        let content = "Done. Your package.json now reads:\n```json\n{\"name\": \"todo-app\", \"version\": \"0.1.0\"}\n```";
        assert!(parse(content).is_none());
        // same object embedded in prose
        assert!(parse(r#"Set {"name": "todo-app", "version": "0.1.0"} and ship."#).is_none());
    }

    #[test]
    fn test_unregistered_or_incomplete_calls_dropped() {
        assert!(parse(r#"{"name": "todo-app", "arguments": {}}"#).is_none());
        assert!(parse(r#"{"name": "create_file"}"#).is_none());

        let content = r#"[
            {"name": "read_file_contents", "arguments": {"path": "a.txt"}},
            {"name": "format_disk", "arguments": {}}
        ]"#;
        let calls = parse(content).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "read_file_contents");
    }
}
