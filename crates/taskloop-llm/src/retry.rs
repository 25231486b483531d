//! Adapter-boundary retry for recoverable provider errors.
//!
//! Only opening the stream is retried. Once deltas have been delivered a
//! failure is surfaced to the caller, since replaying would duplicate output.

use crate::provider::{LlmError, LlmProvider, LlmResult, LlmStream};
use crate::types::LlmRequest;
use std::sync::Arc;
use taskloop_core::LlmRetryConfig;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct RetryingProvider {
    inner: Arc<dyn LlmProvider>,
    config: LlmRetryConfig,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, config: LlmRetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait::async_trait]
impl LlmProvider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn models(&self) -> &[&str] {
        self.inner.models()
    }

    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self
                .inner
                .complete_stream(request.clone(), cancel.clone())
                .await
            {
                Ok(stream) => return Ok(stream),
                Err(e) if e.is_recoverable() && attempt < max_attempts => {
                    let delay = e
                        .retry_after()
                        .unwrap_or_else(|| self.config.backoff(attempt));
                    warn!(
                        provider = self.inner.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "recoverable llm error, retrying: {}",
                        e
                    );
                    match &cancel {
                        Some(token) => {
                            tokio::select! {
                                _ = token.cancelled() => return Err(LlmError::Cancelled),
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
