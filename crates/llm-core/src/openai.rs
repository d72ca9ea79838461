//! OpenAI-compatible chat completions client

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::backend::{BackendError, ChatBackend};
use crate::chat::{ChatMessage, ChatRequest, ChatResponse, FunctionCall, ToolCall, ToolDefinition, Usage};

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// Providers send arguments as a JSON-encoded string
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        let content = if msg.content.is_empty() && !msg.tool_calls.is_empty() {
            None
        } else {
            Some(msg.content.clone())
        };

        Self {
            role: msg.role.as_str().to_string(),
            content,
            name: msg.name.clone(),
            tool_calls: (!msg.tool_calls.is_empty()).then(|| {
                msg.tool_calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: call.id.clone(),
                        call_type: function_type(),
                        function: WireFunctionCall {
                            name: call.function.name.clone(),
                            arguments: call.function.arguments.to_string(),
                        },
                    })
                    .collect()
            }),
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

impl From<WireToolCall> for ToolCall {
    fn from(call: WireToolCall) -> Self {
        let arguments = if call.function.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::String(call.function.arguments))
        };

        ToolCall {
            id: call.id,
            function: FunctionCall {
                name: call.function.name,
                arguments,
            },
        }
    }
}

/// Client for any `/chat/completions` endpoint speaking the OpenAI dialect
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Create a new client with the given request timeout
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// Statuses worth another attempt
fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

#[async_trait]
impl ChatBackend for OpenAiClient {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
        let body = WireRequest {
            model: &request.model,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            temperature: request.options.temperature,
            max_tokens: request.options.max_tokens,
            response_format: request.options.json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
            tools: (!request.tools.is_empty()).then_some(request.tools.as_slice()),
        };

        let mut builder = self.client.post(self.endpoint()).json(&body);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| BackendError::Transient(format!("request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let detail = format!("HTTP {}: {}", status.as_u16(), text.trim());
            return Err(if is_retryable_status(status) {
                BackendError::Transient(detail)
            } else {
                BackendError::Fatal(detail)
            });
        }

        let wire: WireResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Transient(format!("malformed response body: {}", e)))?;

        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Transient("response contained no choices".to_string()))?;

        let response = ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(ToolCall::from)
                .collect(),
            usage: wire.usage,
        };

        debug!(
            model = %request.model,
            tool_calls = response.tool_calls.len(),
            content_len = response.content.len(),
            "Completion received"
        );

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatOptions;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OpenAiClient {
        OpenAiClient::new(server.uri(), Some("sk-test".to_string()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_complete_parses_text_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "hello"}}],
                "usage": {"prompt_tokens": 7, "completion_tokens": 2}
            })))
            .mount(&server)
            .await;

        let request = ChatRequest::new("gpt-test", vec![ChatMessage::user("hi")]);
        let response = client_for(&server).complete(&request).await.unwrap();

        assert_eq!(response.content, "hello");
        assert!(response.tool_calls.is_empty());
        assert_eq!(response.usage.unwrap().prompt_tokens, 7);
    }

    #[tokio::test]
    async fn test_complete_decodes_tool_call_arguments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "create_file", "arguments": "{\"file_path\": \"a.txt\"}"}
                    }]
                }}]
            })))
            .mount(&server)
            .await;

        let request = ChatRequest::new("gpt-test", vec![ChatMessage::user("make a file")]);
        let response = client_for(&server).complete(&request).await.unwrap();

        assert_eq!(response.content, "");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "call_1");
        assert_eq!(response.tool_calls[0].function.arguments["file_path"], "a.txt");
    }

    #[tokio::test]
    async fn test_json_mode_sets_response_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"response_format": {"type": "json_object"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "{}"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = ChatRequest::new("gpt-test", vec![ChatMessage::user("json please")])
            .with_options(ChatOptions::json());
        client_for(&server).complete(&request).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let request = ChatRequest::new("gpt-test", vec![ChatMessage::user("hi")]);
        let err = client_for(&server).complete(&request).await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_client_error_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let request = ChatRequest::new("gpt-test", vec![ChatMessage::user("hi")]);
        let err = client_for(&server).complete(&request).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_wire_message_drops_empty_content_alongside_tool_calls() {
        let msg = ChatMessage::assistant_with_tools(
            "",
            vec![ToolCall::new("c1", "delete_file", json!({"file_path": "x"}))],
        );
        let wire = WireMessage::from(&msg);
        assert!(wire.content.is_none());
        let calls = wire.tool_calls.unwrap();
        assert_eq!(calls[0].function.arguments, "{\"file_path\":\"x\"}");
    }

    #[test]
    fn test_undecodable_arguments_kept_verbatim() {
        let call = ToolCall::from(WireToolCall {
            id: "c1".to_string(),
            call_type: function_type(),
            function: WireFunctionCall {
                name: "x".to_string(),
                arguments: "not json".to_string(),
            },
        });
        assert_eq!(call.function.arguments, Value::String("not json".to_string()));
    }
}
