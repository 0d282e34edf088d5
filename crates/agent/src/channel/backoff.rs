// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnect backoff policy (spec §4.5): exponential growth from an initial
//! delay, capped, with uniform jitter added per attempt.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub attempts_max: Option<u32>,
}

impl BackoffPolicy {
    /// The un-jittered delay before the `attempt`-th reconnect (0-indexed).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let scale = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        self.initial.saturating_mul(scale as u32).min(self.max)
    }

    /// `base_delay` plus uniform jitter in `[0, base_delay / 4]`.
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter_bound_ms = (base.as_millis() as u64 / 4).max(1);
        let jitter_ms = rand::thread_rng().gen_range(0..=jitter_bound_ms);
        base + Duration::from_millis(jitter_ms)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        matches!(self.attempts_max, Some(max) if attempt >= max)
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
