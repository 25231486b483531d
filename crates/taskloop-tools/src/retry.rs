//! Retry policy and fault classification for tool attempts.

use crate::registry::ToolError;
use std::time::Duration;
use taskloop_core::{RetryConfig, ToolFailure, ToolFailureKind};

/// Why a single attempt did not produce output.
#[derive(Debug, Clone)]
pub enum AttemptFailure {
    Tool(ToolError),
    Timeout(Duration),
    Panicked(String),
    Cancelled,
}

impl AttemptFailure {
    /// Transient errors and timeouts are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Tool(ToolError::Transient(_)) | Self::Timeout(_))
    }

    /// Tool faults and timeouts share one fault class. Validation errors,
    /// fatal errors and cancellation leave the breaker alone.
    pub fn counts_toward_breaker(&self) -> bool {
        matches!(
            self,
            Self::Tool(ToolError::Transient(_))
                | Self::Tool(ToolError::Failed(_))
                | Self::Timeout(_)
                | Self::Panicked(_)
        )
    }

    pub fn into_failure(self, attempts: u32) -> ToolFailure {
        let suffix = if attempts > 1 {
            format!(" (after {} attempts)", attempts)
        } else {
            String::new()
        };
        match self {
            Self::Tool(ToolError::InvalidArguments(m)) => {
                ToolFailure::new(ToolFailureKind::InvalidArguments, m)
            }
            Self::Tool(ToolError::Transient(m)) => {
                ToolFailure::new(ToolFailureKind::Transient, format!("{}{}", m, suffix))
            }
            Self::Tool(ToolError::Failed(m)) => ToolFailure::new(ToolFailureKind::Execution, m),
            Self::Tool(ToolError::Fatal(m)) => ToolFailure::new(ToolFailureKind::Fatal, m),
            Self::Timeout(after) => ToolFailure::new(
                ToolFailureKind::Timeout,
                format!("timed out after {}ms{}", after.as_millis(), suffix),
            ),
            Self::Panicked(m) => ToolFailure::new(ToolFailureKind::WorkerFault, m),
            Self::Cancelled => ToolFailure::cancelled(),
        }
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries.saturating_add(1)
    }

    /// Delay before the attempt following attempt number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.config.backoff(attempt)
    }

    pub fn should_retry(&self, failure: &AttemptFailure, attempt: u32) -> bool {
        failure.is_retryable() && attempt < self.max_attempts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let transient = AttemptFailure::Tool(ToolError::Transient("503".into()));
        let invalid = AttemptFailure::Tool(ToolError::invalid("bad"));
        let failed = AttemptFailure::Tool(ToolError::failed("exit 1"));
        assert!(transient.is_retryable() && transient.counts_toward_breaker());
        assert!(!invalid.is_retryable() && !invalid.counts_toward_breaker());
        assert!(!failed.is_retryable() && failed.counts_toward_breaker());
        assert!(AttemptFailure::Timeout(Duration::from_secs(1)).counts_toward_breaker());
        assert!(!AttemptFailure::Cancelled.counts_toward_breaker());
    }

    #[test]
    fn retry_budget() {
        let policy = RetryPolicy::new(RetryConfig { max_retries: 2, ..Default::default() });
        let transient = AttemptFailure::Tool(ToolError::Transient("x".into()));
        assert!(policy.should_retry(&transient, 1));
        assert!(policy.should_retry(&transient, 2));
        assert!(!policy.should_retry(&transient, 3));
        assert!(!RetryPolicy::none().should_retry(&transient, 1));
    }

    #[test]
    fn exhausted_transient_mentions_attempts() {
        let failure = AttemptFailure::Tool(ToolError::Transient("503".into())).into_failure(3);
        assert_eq!(failure.kind, ToolFailureKind::Transient);
        assert_eq!(failure.message, "503 (after 3 attempts)");
    }
}
