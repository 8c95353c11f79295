//! Bounded, cancellable retry with exponential backoff for provider fetches.
//!
//! Every `FetchError` kind is retried. Rate-limit responses wait for the
//! provider's `Retry-After` (or the configured default) instead of the
//! exponential delay. Both the attempt and the wait race the cancellation
//! token.

use std::future::Future;
use std::time::Duration;

use meteofetch_core::{FetchError, RetrySettings};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_RATE_LIMIT_DELAY_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Initial delay between retries (doubles each attempt)
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Wait after a rate-limit response that names no delay
    pub rate_limit_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            rate_limit_delay: Duration::from_secs(DEFAULT_RATE_LIMIT_DELAY_SECS),
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            rate_limit_delay: Duration::from_secs(settings.rate_limit_delay_secs),
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            ..Self::default()
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            rate_limit_delay: Duration::ZERO,
        }
    }

    /// Exponential backoff: initial_delay * 2^attempt, capped at max_delay
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let delay_ms = (self.initial_delay.as_millis() as u64).saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped)
    }

    /// Wait before retrying after `error` on attempt `attempt` (zero-based).
    pub fn delay_after(&self, error: &FetchError, attempt: u32) -> Duration {
        match error {
            FetchError::RateLimited { retry_after } => retry_after
                .unwrap_or(self.rate_limit_delay)
                .min(self.max_delay),
            _ => self.delay_for_attempt(attempt),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetryError {
    #[error("cancelled")]
    Cancelled,

    #[error("{last} (after {attempts} attempts)")]
    Exhausted { attempts: u32, last: FetchError },
}

/// Run `operation` until it succeeds, the retry budget is spent, or `cancel`
/// fires.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0;

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            result = operation() => result,
        };

        let error = match result {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!("Fetch succeeded after {} retries", attempt);
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if attempt >= config.max_retries {
            tracing::error!("All {} fetch attempts failed: {}", attempt + 1, error);
            return Err(RetryError::Exhausted {
                attempts: attempt + 1,
                last: error,
            });
        }

        let delay = config.delay_after(&error, attempt);
        tracing::warn!(
            "Fetch attempt {} of {} failed: {}; retrying in {:?}",
            attempt + 1,
            config.max_retries + 1,
            error,
            delay
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
