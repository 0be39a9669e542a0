//! Exponential backoff for idempotent upstream calls
//!
//! Only reads are retried. Publishing a job is never retried here, since a
//! send that timed out may still have reached the broker.
//!
//! ```no_run
//! use job_gateway::config::RetryConfig;
//! use job_gateway::error::Error;
//! use job_gateway::retry::with_retry;
//!
//! # async fn example() -> Result<(), Error> {
//! let config = RetryConfig::default();
//! let body = with_retry(&config, || async { Ok::<_, Error>("artifact") }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, TransportError, UpstreamError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Classifies an error as transient or permanent
pub trait IsRetryable {
    /// Returns true if the failed call may succeed when repeated
    fn is_retryable(&self) -> bool;
}

fn reqwest_is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect()
}

impl IsRetryable for UpstreamError {
    fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Status { status, .. } => *status >= 500 || *status == 429,
            UpstreamError::Request(e) => reqwest_is_transient(e),
        }
    }
}

impl IsRetryable for TransportError {
    fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout { .. } => true,
            TransportError::Connection(e) => reqwest_is_transient(e),
            TransportError::Broker { status, .. } => *status >= 500,
            TransportError::Closed
            | TransportError::LockLost { .. }
            | TransportError::InvalidConnectionString(_) => false,
        }
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_retryable(),
            Error::Upstream(e) => e.is_retryable(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            Error::InvalidInput { .. }
            | Error::MalformedMessage { .. }
            | Error::Config { .. }
            | Error::ShuttingDown
            | Error::Serialization(_)
            | Error::ApiServerError(_) => false,
        }
    }
}

/// Run `operation`, retrying transient failures with exponential backoff
///
/// Makes at most `config.max_attempts + 1` calls and returns the last error
/// once they are used up or a permanent error occurs.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;
                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Call failed, retrying"
                );

                let wait = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                tokio::time::sleep(wait).await;

                delay = next_delay(delay, config);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(error = %e, attempts = attempt + 1, "Retries exhausted");
                } else {
                    tracing::debug!(error = %e, "Permanent failure, not retrying");
                }
                return Err(e);
            }
        }
    }
}

/// Grow `delay` by the backoff multiplier, capped at `max_delay`
///
/// A multiplier that would produce a negative, NaN or overflowing delay
/// yields `max_delay`.
fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

/// Stretch `delay` by a uniform factor in `[1, 2]`
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + factor))
}
