// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rate limiting and concurrency control for outbound calls.
//!
//! Every generate and verify call goes through one shared
//! [`ConcurrencyGate`]: a semaphore bounding the calls in flight across the
//! whole migration, followed by a token bucket bounding their aggregate
//! rate. The bucket's rate is driven by a [`RateEstimator`] that learns a
//! multiplier from observed throughput.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

/// Lower bound of the estimation multiplier.
pub const MIN_ESTIMATION_MULTIPLIER: f64 = 0.1;

/// Samples kept in a throughput window.
pub const DEFAULT_WINDOW_CAPACITY: usize = 10;

/// Shortest sample span a throughput estimate is derived from.
pub const MIN_WINDOW_SPAN_SECONDS: f64 = 1.0;

/// Longest single wait for a rate token; the bucket is rechecked after it.
pub const MAX_TOKEN_WAIT: Duration = Duration::from_secs(60);

struct BucketState {
    rate: f64,
    burst: f64,
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last_refill = now;
    }
}

fn burst_for(rate: f64) -> f64 {
    rate.ceil().max(1.0)
}

/// Token bucket limiter. A rate of zero or less disables limiting.
pub struct TokenBucket {
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Bucket refilling at `rps` tokens per second, starting full.
    pub fn new(rps: f64) -> Self {
        let burst = burst_for(rps);
        Self {
            state: Mutex::new(BucketState {
                rate: rps,
                burst,
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Current rate.
    pub async fn rate(&self) -> f64 {
        self.state.lock().await.rate
    }

    /// Change the rate. Accumulated tokens are kept up to the new burst.
    pub async fn set_rate(&self, rps: f64) {
        let mut state = self.state.lock().await;
        state.refill(Instant::now());
        state.rate = rps;
        state.burst = burst_for(rps);
        state.tokens = state.tokens.min(state.burst);
    }

    /// Wait for one token.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                if state.rate <= 0.0 {
                    return;
                }
                state.refill(Instant::now());
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::try_from_secs_f64((1.0 - state.tokens) / state.rate)
                    .map_or(MAX_TOKEN_WAIT, |wait| wait.min(MAX_TOKEN_WAIT))
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// Bounds concurrent outbound calls and their aggregate rate.
pub struct ConcurrencyGate {
    permits: Arc<Semaphore>,
    bucket: TokenBucket,
}

/// The gate was closed while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("concurrency gate closed")]
pub struct GateClosed;

impl ConcurrencyGate {
    /// Gate admitting `limit` concurrent calls at `rps` calls per second.
    pub fn new(limit: usize, rps: f64) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit.max(1))),
            bucket: TokenBucket::new(rps),
        }
    }

    /// Calls that could be admitted right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a concurrency slot and a rate token.
    ///
    /// The slot is released when the returned permit is dropped.
    pub async fn admit(&self) -> Result<OwnedSemaphorePermit, GateClosed> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GateClosed)?;
        self.bucket.acquire().await;
        Ok(permit)
    }

    /// Change the aggregate rate.
    pub async fn set_rate(&self, rps: f64) {
        self.bucket.set_rate(rps).await;
    }

    /// Reject every pending and future admission.
    pub fn close(&self) {
        self.permits.close();
    }
}

/// One (replicated count, time) observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSample {
    /// Replicated workflows so far.
    pub count: u64,
    /// When the count was observed.
    pub at: DateTime<Utc>,
}

/// Bounded window of progress samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputWindow {
    capacity: usize,
    samples: VecDeque<ThroughputSample>,
}

impl Default for ThroughputWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

impl ThroughputWindow {
    /// Empty window keeping at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Add a sample, evicting the oldest when full.
    pub fn record(&mut self, count: u64, at: DateTime<Utc>) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(ThroughputSample { count, at });
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the window holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Average rate over the window.
    ///
    /// 0 until the samples span at least [`MIN_WINDOW_SPAN_SECONDS`]; a
    /// burst of completions within a few milliseconds says nothing about
    /// sustained throughput.
    pub fn per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = (last.at - first.at).num_milliseconds() as f64 / 1000.0;
        if elapsed < MIN_WINDOW_SPAN_SECONDS {
            return 0.0;
        }
        last.count.saturating_sub(first.count) as f64 / elapsed
    }
}

/// Adaptive per-call rate budget.
///
/// The overall ceiling is split across the concurrent workers and scaled by
/// a multiplier in `[MIN_ESTIMATION_MULTIPLIER, 1.0]`. Observed throughput
/// above the ceiling tightens the multiplier proportionally; throughput
/// below it relaxes the multiplier back towards 1.
#[derive(Debug, Clone, PartialEq)]
pub struct RateEstimator {
    overall_rps: f64,
    concurrency: usize,
    multiplier: f64,
}

impl RateEstimator {
    /// Estimator starting from a carried multiplier. A multiplier of zero or
    /// less means none was carried and 1.0 is used.
    pub fn new(overall_rps: f64, concurrency: usize, multiplier: f64) -> Self {
        let multiplier = if multiplier > 0.0 {
            multiplier.clamp(MIN_ESTIMATION_MULTIPLIER, 1.0)
        } else {
            1.0
        };
        Self {
            overall_rps,
            concurrency: concurrency.max(1),
            multiplier,
        }
    }

    /// Seed the multiplier from the source cluster's shard count.
    ///
    /// Fewer shards than workers means the workers contend on the same
    /// shards, so each one gets a proportionally smaller budget.
    pub fn seed_from_shards(&mut self, shard_count: i32) {
        if shard_count <= 0 {
            return;
        }
        let ratio = shard_count as f64 / self.concurrency as f64;
        self.multiplier = ratio.clamp(MIN_ESTIMATION_MULTIPLIER, 1.0);
        debug!(shard_count, multiplier = self.multiplier, "Seeded rate estimate");
    }

    /// Current multiplier.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Budget of one generate call.
    pub fn per_call_rps(&self) -> f64 {
        self.overall_rps / self.concurrency as f64 * self.multiplier
    }

    /// Budget of all calls together.
    pub fn aggregate_rps(&self) -> f64 {
        self.overall_rps * self.multiplier
    }

    /// Feed an observed rate and adjust the multiplier.
    pub fn observe(&mut self, observed_rps: f64) {
        if observed_rps <= 0.0 || self.overall_rps <= 0.0 {
            return;
        }
        let next = if observed_rps > self.overall_rps {
            self.multiplier * self.overall_rps / observed_rps
        } else {
            self.multiplier * 1.25
        };
        self.multiplier = next.clamp(MIN_ESTIMATION_MULTIPLIER, 1.0);
    }
}
