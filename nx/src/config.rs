//! Nexus configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main Nexus configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Agent pool capacities
    pub pool: PoolConfig,

    /// QA loop configuration
    pub qa: QaConfig,

    /// Worktree configuration
    pub worktree: WorktreeSettings,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Interview configuration
    pub interview: InterviewConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config: .nexus.yml
        let local_config = PathBuf::from(".nexus.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User config: ~/.config/nexus/nexus.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("nexus").join("nexus.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "anthropic" or "cli"
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Path to the CLI binary for the "cli" provider
    #[serde(rename = "cli-path")]
    pub cli_path: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 16384,
            timeout_ms: 300_000,
            cli_path: "claude".to_string(),
        }
    }
}

/// Agent pool capacities per kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub planner: usize,
    pub coder: usize,
    pub tester: usize,
    pub reviewer: usize,
    pub merger: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            planner: 1,
            coder: 4,
            tester: 2,
            reviewer: 2,
            merger: 1,
        }
    }
}

impl PoolConfig {
    /// Maximum parallel tasks: the sum of per-kind capacities
    pub fn total(&self) -> usize {
        self.planner + self.coder + self.tester + self.reviewer + self.merger
    }
}

/// QA loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    /// Build command
    #[serde(rename = "build-command")]
    pub build_command: String,

    /// Build timeout in seconds
    #[serde(rename = "build-timeout-secs")]
    pub build_timeout_secs: u64,

    /// Lint command (emits JSON)
    #[serde(rename = "lint-command")]
    pub lint_command: String,

    /// Lint timeout in seconds
    #[serde(rename = "lint-timeout-secs")]
    pub lint_timeout_secs: u64,

    /// Whether the lint runner may auto-fix
    #[serde(rename = "lint-fix")]
    pub lint_fix: bool,

    /// Test command (emits JSON)
    #[serde(rename = "test-command")]
    pub test_command: String,

    /// Test timeout in seconds
    #[serde(rename = "test-timeout-secs")]
    pub test_timeout_secs: u64,

    /// Maximum QA loop iterations before escalation
    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,

    /// Skip the rest of the round after the first failing step
    #[serde(rename = "stop-on-first-failure")]
    pub stop_on_first_failure: bool,

    /// Maximum diff bytes sent to the AI review step
    #[serde(rename = "max-diff-size")]
    pub max_diff_size: usize,

    /// Whether the AI review step is enabled
    #[serde(rename = "review-enabled")]
    pub review_enabled: bool,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            build_command: "tsc --noEmit -p tsconfig.json".to_string(),
            build_timeout_secs: 60,
            lint_command: "eslint . --format=json".to_string(),
            lint_timeout_secs: 120,
            lint_fix: false,
            test_command: "vitest run --reporter=json".to_string(),
            test_timeout_secs: 300,
            max_iterations: 50,
            stop_on_first_failure: true,
            max_diff_size: 50_000,
            review_enabled: true,
        }
    }
}

/// Worktree configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorktreeSettings {
    /// Branch prefix for task branches
    #[serde(rename = "branch-prefix")]
    pub branch_prefix: String,

    /// Age in minutes after which an untouched worktree is reaped
    #[serde(rename = "max-age-minutes")]
    pub max_age_minutes: u64,
}

impl Default for WorktreeSettings {
    fn default() -> Self {
        Self {
            branch_prefix: "nexus/task".to_string(),
            max_age_minutes: 60,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path; empty means the per-user default
    #[serde(rename = "db-path")]
    pub db_path: String,

    /// Checkpoints retained per project
    #[serde(rename = "max-checkpoints")]
    pub max_checkpoints: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: String::new(),
            max_checkpoints: 50,
        }
    }
}

impl StorageConfig {
    /// Resolve the database path, falling back to the per-user default
    pub fn resolved_db_path(&self) -> PathBuf {
        if self.db_path.is_empty() {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("nexus")
                .join("nexus.db")
        } else {
            PathBuf::from(&self.db_path)
        }
    }
}

/// Interview configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterviewConfig {
    /// Minimum extraction confidence to keep a requirement
    #[serde(rename = "confidence-threshold")]
    pub confidence_threshold: f64,

    /// Session auto-save interval in seconds
    #[serde(rename = "autosave-secs")]
    pub autosave_secs: u64,

    /// Sampling temperature for interview turns
    pub temperature: f32,
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            autosave_secs: 30,
            temperature: 0.4,
        }
    }
}
