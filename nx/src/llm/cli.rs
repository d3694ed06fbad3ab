//! CLI subprocess LLM backend
//!
//! Runs a local CLI binary (one process per completion) instead of the
//! HTTP API. The prompt goes in on stdin; the reply comes back as JSON on
//! stdout. Useful where only a vendored CLI is available.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use super::client::LlmClient;
use super::error::LlmError;
use super::meter::TokenMeter;
use super::types::{CompletionRequest, CompletionResponse, MessageContent, Role, StopReason, StreamChunk, TokenUsage};
use crate::config::LlmConfig;

/// LLM client backed by a local CLI binary
#[derive(Debug)]
pub struct CliClient {
    binary: PathBuf,
    model: String,
    timeout: Duration,
    meter: TokenMeter,
}

/// Expected JSON shape on the CLI's stdout
#[derive(Debug, Deserialize)]
struct CliReply {
    #[serde(default)]
    result: String,
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl CliClient {
    /// Create a client from configuration; verifies the binary exists
    pub fn from_config(config: &LlmConfig, meter: TokenMeter) -> Result<Self, LlmError> {
        let binary = PathBuf::from(&config.cli_path);
        if !binary.exists() && which_on_path(&config.cli_path).is_none() {
            return Err(LlmError::CliNotFound(config.cli_path.clone()));
        }
        Ok(Self {
            binary,
            model: config.model.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            meter,
        })
    }

    /// Flatten the conversation to a single prompt for stdin
    fn render_prompt(request: &CompletionRequest) -> String {
        let mut prompt = String::new();
        if !request.system_prompt.is_empty() {
            prompt.push_str(&request.system_prompt);
            prompt.push_str("\n\n");
        }
        for msg in &request.messages {
            let role = match msg.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            if let MessageContent::Text(text) = &msg.content {
                prompt.push_str(&format!("{role}: {text}\n\n"));
            }
        }
        prompt
    }
}

fn which_on_path(binary: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

#[async_trait]
impl LlmClient for CliClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let prompt = Self::render_prompt(&request);
        debug!(binary = %self.binary.display(), prompt_len = prompt.len(), "CliClient::complete");

        let mut cmd = Command::new(&self.binary);
        cmd.args(["--print", "--output-format", "json", "--model", &self.model])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &request.working_directory {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LlmError::CliNotFound(self.binary.display().to_string())
            } else {
                LlmError::Cli {
                    exit_code: None,
                    message: e.to_string(),
                }
            }
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await.map_err(|e| LlmError::Cli {
                exit_code: None,
                message: e.to_string(),
            })?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| LlmError::Timeout(self.timeout))?
            .map_err(|e| LlmError::Cli {
                exit_code: None,
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(LlmError::Cli {
                exit_code: output.status.code(),
                message: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let reply: CliReply = serde_json::from_str(stdout.trim())
            .map_err(|_| LlmError::InvalidResponse(format!("CLI emitted non-JSON output: {}", stdout.trim())))?;

        let usage = TokenUsage {
            input_tokens: reply.input_tokens,
            output_tokens: reply.output_tokens,
            ..Default::default()
        };
        let agent = request.agent_id.as_deref().unwrap_or("unattributed");
        self.meter.record(&self.model, agent, &usage);

        Ok(CompletionResponse {
            content: Some(reply.result),
            tool_calls: vec![],
            stop_reason: StopReason::EndTurn,
            usage,
        })
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError> {
        // The CLI backend has no token stream; emit the full reply as one chunk.
        let response = self.complete(request).await?;
        if let Some(text) = &response.content {
            let _ = chunk_tx.send(StreamChunk::TextDelta(text.clone())).await;
        }
        let _ = chunk_tx
            .send(StreamChunk::MessageDone {
                stop_reason: response.stop_reason,
                usage: response.usage,
            })
            .await;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::Message;

    #[test]
    fn test_render_prompt_includes_system_and_roles() {
        let request = CompletionRequest {
            system_prompt: "Be terse".to_string(),
            messages: vec![Message::user("hello"), Message::assistant("hi")],
            ..Default::default()
        };
        let prompt = CliClient::render_prompt(&request);
        assert!(prompt.starts_with("Be terse"));
        assert!(prompt.contains("User: hello"));
        assert!(prompt.contains("Assistant: hi"));
    }

    #[test]
    fn test_missing_binary_is_cli_not_found() {
        let config = LlmConfig {
            cli_path: "/definitely/not/a/real/binary".to_string(),
            ..Default::default()
        };
        let err = CliClient::from_config(&config, TokenMeter::new()).unwrap_err();
        assert!(matches!(err, LlmError::CliNotFound(_)));
        assert!(err.config_hint().is_some());
    }

    #[test]
    fn test_cli_reply_parse() {
        let reply: CliReply =
            serde_json::from_str(r#"{"result": "done", "input_tokens": 12, "output_tokens": 4}"#).unwrap();
        assert_eq!(reply.result, "done");
        assert_eq!(reply.input_tokens, 12);
    }
}
