//! `[model]` configuration section

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::gateway::{ModelGateway, RetryConfig};
use crate::openai::OpenAiClient;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of an OpenAI-compatible API
    pub base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    /// Model driving the run loop
    pub model: String,
    /// Model for the internal monologue; falls back to `model`
    pub reflection_model: Option<String>,
    /// Model generating file rewrites; falls back to `model`
    pub edit_model: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub request_timeout_secs: u64,
    pub retry: RetrySection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            max_attempts: retry.max_attempts,
            delay_ms: retry.delay.as_millis() as u64,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o".to_string(),
            reflection_model: None,
            edit_model: None,
            temperature: 0.0,
            max_tokens: None,
            request_timeout_secs: 120,
            retry: RetrySection::default(),
        }
    }
}

impl GatewayConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.retry.max_attempts, Duration::from_millis(self.retry.delay_ms))
    }

    pub fn reflection_model(&self) -> &str {
        self.reflection_model.as_deref().unwrap_or(&self.model)
    }

    pub fn edit_model(&self) -> &str {
        self.edit_model.as_deref().unwrap_or(&self.model)
    }

    /// Build a gateway backed by the OpenAI-compatible client
    pub fn build_gateway(&self) -> Result<ModelGateway> {
        if self.api_key().is_none() {
            tracing::warn!(
                env = %self.api_key_env,
                "No API key found, sending unauthenticated requests"
            );
        }

        let client = OpenAiClient::new(
            self.base_url.clone(),
            self.api_key(),
            Duration::from_secs(self.request_timeout_secs),
        )?;

        Ok(ModelGateway::new(Arc::new(client)).with_retry(self.retry_config()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_section() {
        let toml = r#"
base_url = "http://localhost:11434/v1"
api_key_env = "LOCAL_KEY"
model = "qwen2.5-coder"
edit_model = "qwen2.5-coder:32b"
max_tokens = 4096

[retry]
max_attempts = 5
delay_ms = 250
"#;

        let config: GatewayConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.model, "qwen2.5-coder");
        assert_eq!(config.edit_model(), "qwen2.5-coder:32b");
        assert_eq!(config.reflection_model(), "qwen2.5-coder");
        assert_eq!(config.max_tokens, Some(4096));
        assert_eq!(
            config.retry_config(),
            RetryConfig::new(5, Duration::from_millis(250))
        );
    }

    #[test]
    fn test_defaults_match_retry_policy() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.retry_config(), RetryConfig::default());
        assert_eq!(config.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn test_missing_env_var_yields_no_key() {
        let config = GatewayConfig {
            api_key_env: "DEVLOOP_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..Default::default()
        };
        assert!(config.api_key().is_none());
    }
}
