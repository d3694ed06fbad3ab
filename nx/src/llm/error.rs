//! LLM error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during LLM operations
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("LLM CLI binary not found: {0}")]
    CliNotFound(String),

    #[error("LLM CLI failed with exit code {exit_code:?}: {message}")]
    Cli { exit_code: Option<i32>, message: String },
}

impl LlmError {
    /// Check if this is a rate limit error
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }

    /// Check if this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::Network(_) => true,
            LlmError::Timeout(_) => true,
            LlmError::Cli { .. } => true,
            LlmError::Authentication(_) => false,
            LlmError::CliNotFound(_) => false,
            LlmError::InvalidResponse(_) => false,
            LlmError::Json(_) => false,
        }
    }

    /// Get the retry duration if this is a rate limit error
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Actionable hint for configuration problems, if this is one
    pub fn config_hint(&self) -> Option<String> {
        match self {
            LlmError::Authentication(msg) => Some(format!("Set the API key environment variable ({msg})")),
            LlmError::CliNotFound(bin) => Some(format!("Install '{bin}' or point llm.cli-path at the binary")),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(
            LlmError::RateLimited {
                retry_after: Duration::from_secs(60)
            }
            .is_retryable()
        );
        assert!(
            LlmError::Api {
                status: 503,
                message: "overloaded".to_string()
            }
            .is_retryable()
        );
        assert!(LlmError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(
            LlmError::Cli {
                exit_code: Some(1),
                message: "transient".to_string()
            }
            .is_retryable()
        );

        assert!(
            !LlmError::Api {
                status: 400,
                message: "bad request".to_string()
            }
            .is_retryable()
        );
        assert!(!LlmError::Authentication("ANTHROPIC_API_KEY".to_string()).is_retryable());
        assert!(!LlmError::CliNotFound("claude".to_string()).is_retryable());
        assert!(!LlmError::InvalidResponse("garbage".to_string()).is_retryable());
    }

    #[test]
    fn test_retry_after() {
        let err = LlmError::RateLimited {
            retry_after: Duration::from_secs(42),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(42)));
        assert_eq!(LlmError::Timeout(Duration::from_secs(1)).retry_after(), None);
    }

    #[test]
    fn test_config_hint() {
        assert!(LlmError::CliNotFound("claude".to_string()).config_hint().is_some());
        assert!(LlmError::Timeout(Duration::from_secs(1)).config_hint().is_none());
    }
}
