// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry policy for activities.
//!
//! Every remote call an execution makes is wrapped in [`retry`]. Errors
//! classify themselves through [`Retryable`]: transient errors are retried
//! with backoff until the policy is exhausted, terminal errors surface on
//! the first occurrence.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Classification of an error for the retry loop.
pub trait Retryable {
    /// Whether another attempt may succeed.
    fn is_retryable(&self) -> bool;
}

/// Retry strategy.
///
/// Determines how delay between retry attempts is calculated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RetryStrategy {
    /// Exponential backoff: delay * 2^(attempt-1)
    #[default]
    ExponentialBackoff,
    /// Same delay before every retry.
    Fixed,
}

/// Configuration for retry behavior of activities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just one attempt).
    pub max_retries: u32,
    /// Base delay between retries in milliseconds.
    pub delay_ms: u64,
    /// Upper bound for a single delay in milliseconds.
    pub max_delay_ms: u64,
    /// Retry strategy for calculating delays.
    pub strategy: RetryStrategy,
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_retries: u32, delay_ms: u64, strategy: RetryStrategy) -> Self {
        Self {
            max_retries,
            delay_ms,
            max_delay_ms: 60_000,
            strategy,
        }
    }

    /// A policy that never retries.
    pub fn no_retries() -> Self {
        Self::new(0, 0, RetryStrategy::Fixed)
    }

    /// Calculate delay for a given retry attempt (1-indexed).
    ///
    /// Attempt 1 is the first retry (after the initial failure).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = match self.strategy {
            RetryStrategy::ExponentialBackoff => 2u64.saturating_pow(attempt.saturating_sub(1)),
            RetryStrategy::Fixed => 1,
        };
        let delay = self.delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5, 1000, RetryStrategy::default())
    }
}

/// Run `op` until it succeeds, fails terminally, or the policy is exhausted.
///
/// `op` receives the 1-indexed attempt number. The last error is returned
/// unchanged so callers keep the original message.
pub async fn retry<T, E, F, Fut>(config: &RetryConfig, operation: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1u32;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => {
                debug!(operation, attempt, error = %e, "Non-retryable error");
                return Err(e);
            }
            Err(e) if attempt > config.max_retries => {
                warn!(operation, attempt, error = %e, "Retries exhausted");
                return Err(e);
            }
            Err(e) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retryable error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
