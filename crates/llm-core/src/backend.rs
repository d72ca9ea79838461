//! Completion backend abstraction
//!
//! The gateway never talks to a provider directly. Anything that can turn a
//! [`ChatRequest`] into a [`ChatResponse`] implements [`ChatBackend`] and
//! classifies its failures so the gateway knows which ones are worth retrying.

use async_trait::async_trait;
use thiserror::Error;

use crate::chat::{ChatRequest, ChatResponse};

/// Failure reported by a backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Network trouble, rate limiting, provider overload, malformed reply
    #[error("transient provider error: {0}")]
    Transient(String),
    /// The provider refused the request; retrying will not help
    #[error("provider rejected request: {0}")]
    Fatal(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// A model-completion provider
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Run one completion request
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError>;
}
