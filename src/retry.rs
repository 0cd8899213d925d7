use std::{future::Future, time::Duration};

use crate::{
    consts::{REQUEST_RETRY_STEP_MS, STREAM_BACKOFF_BASE_SECS, STREAM_BACKOFF_MAX_SECS},
    error::SourceError,
    settings::EngineSettings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `step * attempt` after the n-th failed attempt.
    Linear { step: Duration },
    /// `base * 2^(attempt-1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Poll and trigger calls: timeout plus a couple of linear retries.
    pub fn for_requests(settings: &EngineSettings) -> Self {
        Self {
            max_attempts: settings.request_retries.saturating_add(1),
            timeout: settings.request_timeout(),
            backoff: Backoff::Linear {
                step: Duration::from_millis(REQUEST_RETRY_STEP_MS),
            },
        }
    }

    /// Read-state mutations are reported to the caller after one attempt.
    pub fn for_mutations(settings: &EngineSettings) -> Self {
        Self {
            max_attempts: 1,
            timeout: settings.request_timeout(),
            backoff: Backoff::Linear {
                step: Duration::ZERO,
            },
        }
    }

    /// Push reconnects. `timeout` is unused by the transport loop, which
    /// applies its own connect timeout.
    pub fn for_reconnects(settings: &EngineSettings) -> Self {
        Self {
            max_attempts: settings.push_max_reconnect_attempts,
            timeout: settings.request_timeout(),
            backoff: Backoff::Exponential {
                base: Duration::from_secs(STREAM_BACKOFF_BASE_SECS),
                max: Duration::from_secs(STREAM_BACKOFF_MAX_SECS),
            },
        }
    }

    /// Delay to wait after `attempt` (1-based) failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            Backoff::Linear { step } => step.saturating_mul(attempt),
            Backoff::Exponential { base, max } => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                std::cmp::min(base.saturating_mul(factor), max)
            }
        }
    }

    /// Runs `op` under this policy. Each attempt is bounded by `timeout`;
    /// only retryable errors are retried.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout(self.timeout)),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_after(attempt);
                    tracing::debug!(
                        "{label} failed attempt={attempt}/{max_attempts} retry_in={delay:?}: {error}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
