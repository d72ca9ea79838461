//! Model-driven whole-file edits
//!
//! The current file and the instructions go to the model in JSON mode; the
//! reply must be exactly `{"newFileContents": "..."}`. Anything else fails the
//! call and leaves the file untouched.

use std::fs;

use anyhow::Result;
use async_trait::async_trait;
use llm_core::{ApiError, ChatMessage, ChatOptions, ChatRequest, ModelGateway};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::files::write_atomic;
use crate::tools::{
    footprint_paths, required_str, Footprint, ParameterProperty, ParameterSchema, Tool,
    ToolContext, ToolResult,
};

const EDIT_SYSTEM_PROMPT: &str = "You are a meticulous engineer editing one file. \
Apply the requested changes and return the complete new file. Never strip the file of \
unrelated content; make deliberate changes only. Respond with a JSON object that has \
exactly one property, \"newFileContents\", holding the full new file contents.";

/// The only reply shape accepted from the model
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EditReply {
    #[serde(rename = "newFileContents")]
    new_file_contents: String,
}

#[derive(Debug, Error)]
pub enum EditError {
    #[error("edit generation failed: {0}")]
    Generation(#[from] ApiError),

    #[error("model reply is not {{\"newFileContents\": string}}: {0}")]
    Malformed(String),
}

fn parse_reply(content: &str) -> Result<String, EditError> {
    serde_json::from_str::<EditReply>(content.trim())
        .map(|reply| reply.new_file_contents)
        .map_err(|e| EditError::Malformed(e.to_string()))
}

/// Replace a file's contents with a model-generated version
pub struct EditFileTool {
    gateway: ModelGateway,
    model: String,
    options: ChatOptions,
}

impl EditFileTool {
    pub fn new(gateway: ModelGateway, model: impl Into<String>) -> Self {
        Self {
            gateway,
            model: model.into(),
            options: ChatOptions::json(),
        }
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = ChatOptions {
            json_mode: true,
            ..options
        };
        self
    }

    async fn generate(
        &self,
        file_path: &str,
        current: &str,
        instructions: &str,
        ctx: &ToolContext,
    ) -> Result<String, EditError> {
        let user = format!(
            "This is the current content of '{}':\n\n<current_content>{}</current_content>\n\n\
             Implement the following instructions for {}: {}\n\n\
             Respond strictly as {{\"newFileContents\": \"<the complete file>\"}}.",
            file_path, current, file_path, instructions
        );
        let request = ChatRequest::new(
            self.model.clone(),
            vec![ChatMessage::system(EDIT_SYSTEM_PROMPT), ChatMessage::user(user)],
        )
        .with_options(self.options.clone());

        let response = self.gateway.call(&request, &ctx.cancel).await?;
        parse_reply(&response.content)
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file_contents"
    }

    fn description(&self) -> &str {
        "Edit the contents of an existing file according to natural-language instructions. The whole file is regenerated and replaced."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required(
                "file_path",
                ParameterProperty::string("Path of the file to edit, relative to the workspace root"),
            )
            .with_required(
                "instructions",
                ParameterProperty::string("Instructions on how to edit the file contents"),
            )
    }

    fn footprint(&self, args: &Value, ctx: &ToolContext) -> Footprint {
        footprint_paths(ctx, args, &["file_path"]).map_or_else(Footprint::exclusive, Footprint::writes)
    }

    #[instrument(skip(self, args, ctx), fields(file_path = tracing::field::Empty))]
    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let file_path = required_str(args, "file_path")?;
        let instructions = required_str(args, "instructions")?;
        tracing::Span::current().record("file_path", file_path);

        let path = match ctx.sandbox.resolve(file_path) {
            Ok(p) => p,
            Err(e) => return Ok(e.into()),
        };
        if !path.is_file() {
            return Ok(ToolResult::error(format!("File {} does not exist", file_path)));
        }

        let current = match fs::read(&path).map(String::from_utf8) {
            Ok(Ok(text)) => text,
            Ok(Err(_)) => {
                return Ok(ToolResult::error(format!("File {} is not valid UTF-8", file_path)))
            }
            Err(e) => return Ok(ToolResult::error(format!("Failed to read {}: {}", file_path, e))),
        };

        let new_contents = match self.generate(file_path, &current, instructions, ctx).await {
            Ok(contents) => contents,
            Err(e) => {
                warn!(error = %e, "Edit failed");
                return Ok(ToolResult::error(e.to_string()));
            }
        };

        write_atomic(&path, &new_contents)?;
        info!(bytes = new_contents.len(), "File edited");
        Ok(ToolResult::success(format!(
            "File {} edited successfully based on instructions",
            file_path
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::Fixture;
    use llm_core::{BackendError, ChatResponse, RetryConfig, ScriptedBackend};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn tool(backend: Arc<ScriptedBackend>) -> EditFileTool {
        let gateway = ModelGateway::new(backend).with_retry(RetryConfig::new(3, Duration::ZERO));
        EditFileTool::new(gateway, "test-model")
    }

    #[test]
    fn test_parse_reply_is_strict() {
        assert_eq!(parse_reply(r#"{"newFileContents": "x"}"#).unwrap(), "x");
        assert!(matches!(
            parse_reply(r#"{"File": {"FilePath": "a", "newFileContents": "x"}}"#),
            Err(EditError::Malformed(_))
        ));
        assert!(parse_reply(r#"{"newFileContents": "x", "extra": 1}"#).is_err());
        assert!(parse_reply(r#"{"newFileContents": 5}"#).is_err());
        assert!(parse_reply("not json").is_err());
    }

    #[tokio::test]
    async fn test_edit_replaces_contents() {
        let fx = Fixture::new();
        fx.write("main.py", "print('hi')\n");
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(ChatResponse::text(
            r#"{"newFileContents": "print('hello')\n"}"#,
        ))]));

        let result = tool(backend.clone())
            .execute(
                &json!({"file_path": "main.py", "instructions": "say hello"}),
                &fx.ctx,
            )
            .await
            .unwrap();
        assert!(result.success, "{}", result.output);
        assert_eq!(fx.read("main.py"), "print('hello')\n");

        let request = &backend.requests()[0];
        assert!(request.options.json_mode);
        assert!(request.messages[1].content.contains("print('hi')"));
        assert!(request.messages[1].content.contains("say hello"));
    }

    #[tokio::test]
    async fn test_nested_reply_fails_without_writing() {
        let fx = Fixture::new();
        fx.write("main.py", "original");
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(ChatResponse::text(
            r#"{"File": {"FilePath": "main.py", "newFileContents": "changed"}}"#,
        ))]));

        let result = tool(backend.clone())
            .execute(&json!({"file_path": "main.py", "instructions": "x"}), &fx.ctx)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("newFileContents"));
        assert_eq!(fx.read("main.py"), "original");
        // not retried by the tool
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_gateway_exhaustion_is_failed_result() {
        let fx = Fixture::new();
        fx.write("main.py", "original");
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(BackendError::Transient("overloaded".into())),
            Err(BackendError::Transient("overloaded".into())),
            Err(BackendError::Transient("overloaded".into())),
        ]));

        let result = tool(backend)
            .execute(&json!({"file_path": "main.py", "instructions": "x"}), &fx.ctx)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("edit generation failed"));
        assert_eq!(fx.read("main.py"), "original");
    }

    #[tokio::test]
    async fn test_missing_file_skips_model() {
        let fx = Fixture::new();
        let backend = Arc::new(ScriptedBackend::default());

        let result = tool(backend.clone())
            .execute(&json!({"file_path": "nope.py", "instructions": "x"}), &fx.ctx)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(backend.call_count(), 0);
    }
}
