//! Retry with capped exponential backoff and optional jitter.
//!
//! A single policy wraps every rate-limited external call (embedding and
//! generation HTTP requests). Callers above this layer must not add their own
//! retry loops; reads are idempotent and writes rely on insert-or-ignore
//! semantics, so a retried call is safe.

use anyhow::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;

/// Whether a failed attempt is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient (network error, 429, 5xx) — retry with backoff.
    Transient,
    /// Permanent (auth failure, malformed request) — fail immediately.
    Permanent,
}

/// Delay before the given attempt (1-based; attempt 1 has no delay).
/// Doubles from `initial_delay_ms` and is capped at `max_delay_ms`; with
/// jitter enabled the delay is scaled by a random factor in [0.5, 1.0].
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    if attempt <= 1 {
        return Duration::ZERO;
    }
    let exp = (attempt - 2).min(16);
    let base = config
        .initial_delay_ms
        .saturating_mul(1u64 << exp)
        .min(config.max_delay_ms);
    let ms = if config.jitter {
        let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
        (base as f64 * factor) as u64
    } else {
        base
    };
    Duration::from_millis(ms)
}

/// Run `op` up to `config.max_attempts` times, sleeping between attempts.
/// The operation classifies its own error: `Permanent` failures are returned
/// on the spot, `Transient` failures are retried until the budget runs out.
pub async fn with_backoff<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, (RetryClass, anyhow::Error)>>,
{
    let mut last_err = None;

    for attempt in 1..=config.max_attempts {
        let delay = backoff_delay(config, attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err((RetryClass::Permanent, err)) => return Err(err),
            Err((RetryClass::Transient, err)) => {
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("retry budget exhausted")))
}
