//! Resilience patterns for the OneDrive adapter.
//!
//! Retry with exponential backoff for transient failures, and pacing for
//! rate-limited uploads.

use crate::errors::OneDriveError;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Retry configuration for exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
    /// Whether to add jitter to backoff.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Retry executor with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Creates a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Executes an operation, retrying transient failures.
    ///
    /// Non-transient errors are returned as-is after the first attempt. A
    /// transient error that survives every attempt is wrapped in
    /// [`OneDriveError::RetriesExhausted`].
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, OneDriveError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, OneDriveError>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    attempt += 1;

                    if !is_retryable(&error) {
                        return Err(error);
                    }

                    if attempt >= self.config.max_attempts {
                        warn!(attempts = attempt, error = %error, "Retries exhausted");
                        return Err(OneDriveError::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(error),
                        });
                    }

                    let backoff = error
                        .retry_after()
                        .map(|hint| hint.min(self.config.max_backoff))
                        .unwrap_or_else(|| calculate_backoff(attempt, &self.config));

                    debug!(
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "Retrying after transient failure"
                    );

                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// Keeps an upload's average throughput at or below a KB/s limit.
#[derive(Debug)]
pub struct UploadPacer {
    bytes_per_second: Option<f64>,
    started: Instant,
    sent: u64,
}

impl UploadPacer {
    /// Creates a pacer; a limit of 0 disables pacing.
    pub fn new(rate_limit_kbs: u32) -> Self {
        let bytes_per_second = if rate_limit_kbs == 0 {
            None
        } else {
            Some(rate_limit_kbs as f64 * 1024.0)
        };

        Self {
            bytes_per_second,
            started: Instant::now(),
            sent: 0,
        }
    }

    /// Returns true if a limit is in effect.
    pub fn is_limited(&self) -> bool {
        self.bytes_per_second.is_some()
    }

    /// Total bytes recorded so far.
    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }

    /// How long to wait after `sent` bytes took `elapsed` to transfer.
    pub fn delay_for(&self, sent: u64, elapsed: Duration) -> Duration {
        match self.bytes_per_second {
            Some(rate) => {
                let target = Duration::from_secs_f64(sent as f64 / rate);
                target.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        }
    }

    /// Records sent bytes and sleeps if the transfer is ahead of the limit.
    pub async fn record(&mut self, bytes: usize) {
        self.sent += bytes as u64;
        let delay = self.delay_for(self.sent, self.started.elapsed());
        if !delay.is_zero() {
            debug!(
                bytes_sent = self.sent,
                delay_ms = delay.as_millis() as u64,
                "Pacing upload"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Checks if an error is retryable.
pub fn is_retryable(error: &OneDriveError) -> bool {
    error.is_retryable()
}

/// Calculates backoff duration for a retry attempt.
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let base = config.initial_backoff.as_secs_f64();
    let exp = config.multiplier.powi(attempt.saturating_sub(1) as i32);
    let mut delay = base * exp;

    let max = config.max_backoff.as_secs_f64();
    if delay > max {
        delay = max;
    }

    if config.jitter && delay > 0.0 {
        use rand::Rng;
        let jitter = rand::thread_rng().gen_range(0.0..=delay * 0.1);
        delay += jitter;
    }

    Duration::from_secs_f64(delay)
}
