//! llm-core: model gateway for devloop
//!
//! Provides:
//! - Chat wire types shared with the agent
//! - The `ChatBackend` collaborator trait and an OpenAI-compatible client
//! - `ModelGateway`, which retries transient failures and invalid JSON replies
//! - The `[model]` configuration section

pub mod backend;
pub mod chat;
pub mod config;
pub mod gateway;
pub mod openai;
pub mod scripted;

pub use backend::{BackendError, ChatBackend};
pub use chat::{
    ChatMessage, ChatOptions, ChatRequest, ChatResponse, FunctionCall, FunctionDefinition, Role,
    ToolCall, ToolDefinition, Usage,
};
pub use config::GatewayConfig;
pub use gateway::{ApiError, ModelGateway, RetryConfig};
pub use openai::OpenAiClient;
pub use scripted::ScriptedBackend;
