//! Retrying model gateway
//!
//! Wraps a [`ChatBackend`] with a fixed retry policy. Transient backend
//! failures and JSON-mode replies that do not parse are retried after a
//! fixed delay; anything else is surfaced immediately as [`ApiError`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::backend::{BackendError, ChatBackend};
use crate::chat::{ChatRequest, ChatResponse};

/// Retry policy for model calls
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Fixed pause between attempts
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// A model call that could not be completed
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    #[error("model call failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("model call rejected: {0}")]
    Rejected(String),

    #[error("model call cancelled")]
    Cancelled,

    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

/// Why a single attempt did not produce a usable response
enum AttemptError {
    Retryable(String),
    Fatal(String),
}

/// Model gateway shared by the run loop and model-backed tools
#[derive(Clone)]
pub struct ModelGateway {
    backend: Arc<dyn ChatBackend>,
    retry: RetryConfig,
}

impl std::fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGateway")
            .field("backend", &self.backend.name())
            .field("retry", &self.retry)
            .finish()
    }
}

impl ModelGateway {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Run a completion with retries.
    ///
    /// The token aborts both an in-flight request and the pause between
    /// attempts.
    #[instrument(skip_all, fields(model = %request.model, json_mode = request.options.json_mode))]
    pub async fn call(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ApiError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                result = self.backend.complete(request) => result,
            };

            match self.check(request, outcome) {
                Ok(response) => {
                    debug!(attempt, "Model call succeeded");
                    return Ok(response);
                }
                Err(AttemptError::Fatal(reason)) => {
                    warn!(attempt, error = %reason, "Model call rejected");
                    return Err(ApiError::Rejected(reason));
                }
                Err(AttemptError::Retryable(reason)) => {
                    warn!(attempt, max_attempts, error = %reason, "Model call failed");
                    last_error = reason;
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                    _ = tokio::time::sleep(self.retry.delay) => {}
                }
            }
        }

        Err(ApiError::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    fn check(
        &self,
        request: &ChatRequest,
        outcome: Result<ChatResponse, BackendError>,
    ) -> Result<ChatResponse, AttemptError> {
        let response = match outcome {
            Ok(response) => response,
            Err(BackendError::Transient(e)) => return Err(AttemptError::Retryable(e)),
            Err(BackendError::Fatal(e)) => return Err(AttemptError::Fatal(e)),
        };

        if request.options.json_mode && !response.has_tool_calls() {
            validate_json(&response.content).map_err(AttemptError::Retryable)?;
        }

        Ok(response)
    }
}

/// JSON-mode replies must be a non-empty JSON value
fn validate_json(content: &str) -> Result<(), String> {
    let value: serde_json::Value = serde_json::from_str(content.trim())
        .map_err(|e| format!("response is not valid JSON: {}", e))?;

    let empty = match &value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.is_empty(),
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        _ => false,
    };

    if empty {
        Err("response is an empty JSON value".to_string())
    } else {
        Ok(())
    }
}
