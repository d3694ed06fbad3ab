//! LLM client module
//!
//! Provides the `LlmClient` capability, the Anthropic API and CLI
//! backends, retry handling, and process-wide token metering.

use std::sync::Arc;

mod anthropic;
pub mod cli;
pub mod client;
mod error;
mod meter;
mod types;

pub use anthropic::AnthropicClient;
pub use cli::CliClient;
pub use client::{LlmClient, RetryPolicy, complete_with_retry};
pub use error::LlmError;
pub use meter::{MeterKey, TokenMeter};
pub use types::{
    CompletionRequest, CompletionResponse, ContentBlock, Message, MessageContent, Role, StopReason, StreamChunk,
    TokenUsage, ToolCall, ToolDefinition,
};

use crate::config::LlmConfig;

/// Create an LLM client for the provider named in config
///
/// Supports "anthropic" (Messages API) and "cli" (local subprocess).
pub fn create_client(config: &LlmConfig, meter: TokenMeter) -> Result<Arc<dyn LlmClient>, LlmError> {
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicClient::from_config(config, meter)?)),
        "cli" => Ok(Arc::new(CliClient::from_config(config, meter)?)),
        other => Err(LlmError::InvalidResponse(format!(
            "Unknown LLM provider: '{other}'. Supported: anthropic, cli"
        ))),
    }
}
