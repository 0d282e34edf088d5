// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capped exponential backoff for idempotent requests and downloads
//! (spec §4.4.2).

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::AgentError;

/// Retry budget: doubles the delay after each failed attempt up to
/// `max_retries`, capping the delay at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(max_retries: u32, initial_delay_seconds: u64) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_secs(initial_delay_seconds.max(1)),
            max_delay: Duration::from_secs(60),
        }
    }

    /// A policy with no retries, for callers that must fail fast (e.g. a
    /// single disconnection check).
    pub fn none() -> Self {
        Self { max_retries: 0, initial_delay: Duration::from_secs(1), max_delay: Duration::from_secs(1) }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let scale = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        self.initial_delay.saturating_mul(scale as u32).min(self.max_delay)
    }
}

/// Whether a given failure is worth retrying at all. Authentication and
/// protocol-shape failures are never transient.
fn is_retryable(err: &AgentError) -> bool {
    matches!(err, AgentError::Transport(_) | AgentError::DownloadFailed(_))
}

/// Run `op` under `policy`, retrying retryable failures with exponential
/// backoff. Non-retryable failures return immediately on first occurrence.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, AgentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retries && is_retryable(&err) => {
                let delay = policy.delay_for(attempt);
                warn!(label, attempt, ?delay, error = %err, "retrying after transient failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
