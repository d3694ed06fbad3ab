//! Anthropic Claude API client
//!
//! Implements `LlmClient` for the Messages API with blocking and SSE
//! streaming responses. Usage from every response is fed into the shared
//! token meter under (model, agent).

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;

use super::client::LlmClient;
use super::error::LlmError;
use super::meter::TokenMeter;
use super::types::{
    CompletionRequest, CompletionResponse, ContentBlock, Message, MessageContent, StopReason, StreamChunk, TokenUsage,
    ToolCall,
};
use crate::config::LlmConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude API client
#[derive(Debug)]
pub struct AnthropicClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
    meter: TokenMeter,
}

impl AnthropicClient {
    /// Create a new client from configuration
    ///
    /// Reads the API key from the environment variable named in config;
    /// a missing key is an authentication error with an actionable hint.
    pub fn from_config(config: &LlmConfig, meter: TokenMeter) -> Result<Self, LlmError> {
        let api_key =
            std::env::var(&config.api_key_env).map_err(|_| LlmError::Authentication(config.api_key_env.clone()))?;

        let timeout = Duration::from_millis(config.timeout_ms);
        let http = Client::builder().timeout(timeout).build().map_err(LlmError::Network)?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.clone(),
            http,
            max_tokens: config.max_tokens,
            meter,
        })
    }

    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens.min(self.max_tokens),
            "system": request.system_prompt,
            "messages": convert_messages(&request.messages),
        });

        if !request.tools.is_empty() && !request.disable_tools {
            body["tools"] = serde_json::json!(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.input_schema,
                        })
                    })
                    .collect::<Vec<_>>()
            );
        }

        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        if !request.stop_sequences.is_empty() {
            body["stop_sequences"] = serde_json::json!(request.stop_sequences);
        }

        body
    }

    fn record_usage(&self, request: &CompletionRequest, usage: &TokenUsage) {
        let agent = request.agent_id.as_deref().unwrap_or("unattributed");
        self.meter.record(&self.model, agent, usage);
    }

    fn parse_response(&self, api_response: ApiResponse) -> CompletionResponse {
        let mut content = None;
        let mut tool_calls = Vec::new();

        for block in api_response.content {
            match block {
                ApiContentBlock::Text { text } => content = Some(text),
                ApiContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall { id, name, input });
                }
            }
        }

        CompletionResponse {
            content,
            tool_calls,
            stop_reason: StopReason::from_api(&api_response.stop_reason),
            usage: TokenUsage {
                input_tokens: api_response.usage.input_tokens,
                output_tokens: api_response.usage.output_tokens,
                cache_read_tokens: api_response.usage.cache_read_input_tokens.unwrap_or(0),
                cache_creation_tokens: api_response.usage.cache_creation_input_tokens.unwrap_or(0),
            },
        }
    }

    fn classify_status(status: u16, message: String, retry_after: Option<u64>) -> LlmError {
        match status {
            401 | 403 => LlmError::Authentication(message),
            429 => LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after.unwrap_or(60)),
            },
            _ => LlmError::Api { status, message },
        }
    }
}

fn convert_messages(messages: &[Message]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|msg| {
            let content = match &msg.content {
                MessageContent::Text(text) => serde_json::json!(text),
                MessageContent::Blocks(blocks) => {
                    serde_json::json!(blocks.iter().map(convert_content_block).collect::<Vec<_>>())
                }
            };
            serde_json::json!({ "role": msg.role, "content": content })
        })
        .collect()
}

fn convert_content_block(block: &ContentBlock) -> serde_json::Value {
    match block {
        ContentBlock::Text { text } => serde_json::json!({ "type": "text", "text": text }),
        ContentBlock::ToolUse { id, name, input } => {
            serde_json::json!({ "type": "tool_use", "id": id, "name": name, "input": input })
        }
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error,
        }),
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_request_body(&request);

        let response = self
            .http
            .post(url)
            .header("x-api-key", self.api_key.clone())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            let text = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, text, retry_after));
        }

        let api_response: ApiResponse = response.json().await?;
        let parsed = self.parse_response(api_response);
        self.record_usage(&request, &parsed.usage);
        Ok(parsed)
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let mut body = self.build_request_body(&request);
        body["stream"] = serde_json::json!(true);

        let http_request = self
            .http
            .post(url)
            .header("x-api-key", self.api_key.clone())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let mut es = EventSource::new(http_request).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let mut full_content = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut current_tool: Option<(String, String, String)> = None; // (id, name, json_acc)
        let mut stop_reason = StopReason::EndTurn;
        let mut usage = TokenUsage::default();

        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    let data: serde_json::Value = serde_json::from_str(&msg.data).map_err(LlmError::Json)?;

                    match data["type"].as_str() {
                        Some("message_start") => {
                            usage.input_tokens = data["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0);
                            let _ = chunk_tx
                                .send(StreamChunk::MessageStart {
                                    input_tokens: usage.input_tokens,
                                })
                                .await;
                        }
                        Some("content_block_start") => {
                            if let Some(block) = data.get("content_block")
                                && block["type"] == "tool_use"
                            {
                                let id = block["id"].as_str().unwrap_or("").to_string();
                                let name = block["name"].as_str().unwrap_or("").to_string();
                                current_tool = Some((id.clone(), name.clone(), String::new()));
                                let _ = chunk_tx.send(StreamChunk::ToolUseStart { id, name }).await;
                            }
                        }
                        Some("content_block_delta") => {
                            if let Some(delta) = data.get("delta") {
                                if let Some(text) = delta["text"].as_str() {
                                    full_content.push_str(text);
                                    let _ = chunk_tx.send(StreamChunk::TextDelta(text.to_string())).await;
                                } else if let Some(partial) = delta["partial_json"].as_str()
                                    && let Some((id, _, acc)) = current_tool.as_mut()
                                {
                                    acc.push_str(partial);
                                    let _ = chunk_tx
                                        .send(StreamChunk::ToolUseDelta {
                                            id: id.clone(),
                                            json_delta: partial.to_string(),
                                        })
                                        .await;
                                }
                            }
                        }
                        Some("content_block_stop") => {
                            if let Some((id, name, acc)) = current_tool.take() {
                                let input = serde_json::from_str(&acc).unwrap_or(serde_json::json!({}));
                                tool_calls.push(ToolCall { id, name, input });
                            }
                        }
                        Some("message_delta") => {
                            if let Some(reason) = data["delta"]["stop_reason"].as_str() {
                                stop_reason = StopReason::from_api(reason);
                            }
                            if let Some(out) = data["usage"]["output_tokens"].as_u64() {
                                usage.output_tokens = out;
                            }
                        }
                        Some("message_stop") => break,
                        _ => {}
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    let _ = chunk_tx.send(StreamChunk::Error(e.to_string())).await;
                    return Err(LlmError::InvalidResponse(e.to_string()));
                }
            }
        }

        let _ = chunk_tx.send(StreamChunk::MessageDone { stop_reason, usage }).await;

        let response = CompletionResponse {
            content: if full_content.is_empty() { None } else { Some(full_content) },
            tool_calls,
            stop_reason,
            usage,
        };
        self.record_usage(&request, &response.usage);
        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiContentBlock>,
    stop_reason: String,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u64,
    output_tokens: u64,
    cache_read_input_tokens: Option<u64>,
    cache_creation_input_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ToolDefinition;

    fn client() -> AnthropicClient {
        AnthropicClient {
            model: "claude-sonnet-4".to_string(),
            api_key: "test-key".to_string(),
            base_url: "https://api.example.com".to_string(),
            http: Client::new(),
            max_tokens: 8192,
            meter: TokenMeter::new(),
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_from_config_missing_key_is_authentication_error() {
        let config = LlmConfig {
            api_key_env: "NEXUS_TEST_MISSING_KEY".to_string(),
            ..Default::default()
        };
        unsafe { std::env::remove_var("NEXUS_TEST_MISSING_KEY") };
        let err = AnthropicClient::from_config(&config, TokenMeter::new()).unwrap_err();
        assert!(matches!(err, LlmError::Authentication(_)));
        assert!(err.config_hint().is_some());
    }

    #[test]
    #[serial_test::serial]
    fn test_from_config_with_key() {
        let config = LlmConfig {
            api_key_env: "NEXUS_TEST_PRESENT_KEY".to_string(),
            ..Default::default()
        };
        unsafe { std::env::set_var("NEXUS_TEST_PRESENT_KEY", "sk-test") };
        let client = AnthropicClient::from_config(&config, TokenMeter::new()).unwrap();
        assert_eq!(client.model, config.model);
        unsafe { std::env::remove_var("NEXUS_TEST_PRESENT_KEY") };
    }

    #[test]
    fn test_build_request_body_basic() {
        let c = client();
        let request = CompletionRequest {
            system_prompt: "You are helpful".to_string(),
            messages: vec![Message::user("hi")],
            max_tokens: 1024,
            ..Default::default()
        };

        let body = c.build_request_body(&request);
        assert_eq!(body["model"], "claude-sonnet-4");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["system"], "You are helpful");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_build_request_body_respects_disable_tools() {
        let c = client();
        let request = CompletionRequest {
            tools: vec![ToolDefinition::new("t", "d", serde_json::json!({}))],
            disable_tools: true,
            max_tokens: 100,
            ..Default::default()
        };
        let body = c.build_request_body(&request);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_build_request_body_clamps_max_tokens() {
        let c = client();
        let request = CompletionRequest {
            max_tokens: 1_000_000,
            ..Default::default()
        };
        let body = c.build_request_body(&request);
        assert_eq!(body["max_tokens"], 8192);
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            AnthropicClient::classify_status(401, "bad key".to_string(), None),
            LlmError::Authentication(_)
        ));
        match AnthropicClient::classify_status(429, "slow down".to_string(), Some(30)) {
            LlmError::RateLimited { retry_after } => assert_eq!(retry_after, Duration::from_secs(30)),
            other => panic!("expected rate limit, got {other:?}"),
        }
        assert!(matches!(
            AnthropicClient::classify_status(500, "boom".to_string(), None),
            LlmError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn test_parse_response_with_tool_use() {
        let c = client();
        let api_response = ApiResponse {
            content: vec![
                ApiContentBlock::Text {
                    text: "calling a tool".to_string(),
                },
                ApiContentBlock::ToolUse {
                    id: "tu_1".to_string(),
                    name: "submit".to_string(),
                    input: serde_json::json!({"x": 1}),
                },
            ],
            stop_reason: "tool_use".to_string(),
            usage: ApiUsage {
                input_tokens: 10,
                output_tokens: 5,
                cache_read_input_tokens: None,
                cache_creation_input_tokens: None,
            },
        };

        let parsed = c.parse_response(api_response);
        assert_eq!(parsed.text(), "calling a tool");
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.stop_reason, StopReason::ToolUse);
        assert_eq!(parsed.usage.input_tokens, 10);
    }
}
