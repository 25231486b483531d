//! Runtime configuration
//!
//! All tunable parameters in one place. Loaded from TOML at startup,
//! falls back to defaults if no config file exists. The loaded value is
//! passed explicitly into the pipeline, runtime and background manager.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Model id passed to the LLM adapter.
    pub model: String,
    /// Think/act iterations before a forced final answer.
    pub max_iterations: usize,
    /// Output token cap per completion.
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
    /// Upper bound on concurrently executing tool calls in one batch.
    pub tool_concurrency: usize,
    /// Per-call execution timeout unless the tool declares its own.
    pub tool_timeout_secs: u64,
    /// Message window budget in estimated tokens.
    pub context_max_tokens: usize,
    /// Size of each streamed final-answer chunk.
    pub final_answer_chunk_chars: usize,
    /// Require `clarify` before the first action tool when the plan is complex.
    pub clarify_complex_tasks: bool,
    /// Directory for file-backed checkpoints. In-memory when unset.
    pub checkpoint_dir: Option<PathBuf>,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub approval: ApprovalConfig,
    pub background: BackgroundConfig,
    pub llm_retry: LlmRetryConfig,
}

/// Backoff for transient tool failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_factor: f64,
}

/// Per-tool-name circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub enabled: bool,
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Failures older than this no longer count toward the threshold.
    pub window_secs: u64,
    /// How long an open circuit rejects calls before probing.
    pub cooldown_secs: u64,
    /// Successful trial calls needed to close a half-open circuit.
    pub success_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Skip the approver entirely.
    pub auto_approve: bool,
    /// Pending approvals resolve as rejected after this long. Zero waits forever.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Unanswered input requests from delegated units resolve as rejected after this.
    pub input_ttl_secs: u64,
    /// Maximum unfinished tasks per manager. Dispatch beyond this is refused.
    pub max_tasks: usize,
    /// Characters of a result kept in notifications and previews.
    pub preview_chars: usize,
    /// Iteration cap for in-process subagents.
    pub subagent_max_iterations: usize,
}

/// Adapter-boundary retry for opening LLM streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmRetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

// ============================================================
// Defaults
// ============================================================

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_iterations: 20,
            max_tokens: 8192,
            system_prompt: None,
            tool_concurrency: 10,
            tool_timeout_secs: 120,
            context_max_tokens: 128_000,
            final_answer_chunk_chars: 800,
            clarify_complex_tasks: true,
            checkpoint_dir: None,
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            approval: ApprovalConfig::default(),
            background: BackgroundConfig::default(),
            llm_retry: LlmRetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            backoff_factor: 2.0,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            window_secs: 60,
            cooldown_secs: 30,
            success_threshold: 1,
        }
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            auto_approve: false,
            timeout_secs: 300,
        }
    }
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            input_ttl_secs: 300,
            max_tasks: 64,
            preview_chars: 400,
            subagent_max_iterations: 10,
        }
    }
}

impl Default for LlmRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

// ============================================================
// Loading and derived values
// ============================================================

impl RuntimeConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist
    /// or can't be parsed.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Parse config from a TOML string, surfacing parse errors.
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::ConfigError(e.to_string()))
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Concurrency bound, never below one.
    pub fn effective_concurrency(&self) -> usize {
        self.tool_concurrency.max(1)
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (1-based), capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let factor = if self.backoff_factor < 1.0 { 1.0 } else { self.backoff_factor };
        let millis = (self.initial_backoff_ms as f64) * factor.powi(exp);
        let capped = millis.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

impl BreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl ApprovalConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl BackgroundConfig {
    pub fn input_ttl(&self) -> Duration {
        Duration::from_secs(self.input_ttl_secs)
    }
}

impl LlmRetryConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let millis = self.initial_backoff_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(millis.min(self.max_backoff_ms))
    }
}
