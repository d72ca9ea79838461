//! Internal monologue between rounds

use llm_core::{ApiError, ChatMessage, ChatOptions, ChatRequest, ModelGateway};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::prompt::{render_memory, transcript};
use crate::session::Session;

/// Entry name marking monologue entries
pub const MONOLOGUE_NAME: &str = "internal_monologue";

const MONOLOGUE_PROMPT: &str = "\
You are the inner voice of an autonomous software engineer. Read the \
conversation and the working memory, then reflect on the progress towards \
the overarching objective.

Reply with a single JSON object and nothing else:
{
  \"observations\": \"what the latest tool results show\",
  \"thoughts\": \"what is going well, what is failing and why\",
  \"next_actions\": [\"the next concrete steps\"],
  \"objective_complete\": false
}
Set objective_complete to true only when the objective is fully met and verified.";

/// Parsed monologue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub observations: Value,
    pub thoughts: Value,
    pub next_actions: Value,
    #[serde(default)]
    pub objective_complete: Option<bool>,
}

impl Reflection {
    pub fn is_complete(&self) -> bool {
        self.objective_complete.unwrap_or(false)
    }

    /// Thoughts as display text
    pub fn summary(&self) -> String {
        match &self.thoughts {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Session entry carrying this monologue
    pub fn to_message(&self) -> ChatMessage {
        let content = serde_json::to_string_pretty(self).unwrap_or_default();
        ChatMessage::user(content).with_name(MONOLOGUE_NAME)
    }
}

#[derive(Debug, Error)]
pub enum ReflectionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("monologue did not match the expected shape: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Ask the reflection model for a monologue over `session`
#[instrument(skip_all, fields(session_id = %session.id, model = %model))]
pub async fn reflect(
    gateway: &ModelGateway,
    model: &str,
    session: &Session,
    cancel: &CancellationToken,
) -> Result<Reflection, ReflectionError> {
    let context = format!(
        "Working memory:\n{}\n\nConversation:\n{}",
        render_memory(&session.memory),
        transcript(&session.entries)
    );
    let request = ChatRequest::new(
        model,
        vec![ChatMessage::system(MONOLOGUE_PROMPT), ChatMessage::user(context)],
    )
    .with_options(ChatOptions::json());

    let response = gateway.call(&request, cancel).await?;
    let reflection: Reflection = response.parse_json()?;
    debug!(complete = reflection.is_complete(), "Reflection received");
    Ok(reflection)
}
