//! Concurrent catalog fetching with retry, backoff and adaptive batching.
//!
//! Channels are fetched in successive batches; all requests in a batch run
//! concurrently on the single logical thread and a batch never dispatches
//! before the previous batch has fully settled. Each request carries its own
//! timeout, so one slow channel cannot stall the rest, and a failed channel
//! is marked `Failed` without aborting anything else — there is no global
//! cancellation.
//!
//! Batch size is steered by a rolling window of [`FetchMetric`]s: grow by
//! one while the remote looks healthy, shrink by one when it degrades. The
//! remote gives no explicit congestion signal, so this is a plain
//! additive-increase/additive-decrease controller bounded to `[2, 8]`.

use crate::api::{FetchOptions, RelayApi};
use crate::channel::{CatalogState, Channel, FetchMetric, MetricsWindow};
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use asupersync::time::{sleep, timeout, wall_now};
use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Minimal fetch primitive the orchestrator drives.
///
/// The bulk pass, the prefetch path and single-channel retries all go
/// through this one seam, which keeps tests free of any transport.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_models(&self, channel_id: i64) -> Result<Vec<String>>;
}

/// [`CatalogSource`] backed by the relay server collaborator.
pub struct ApiCatalogSource<'a> {
    api: &'a dyn RelayApi,
    config: &'a ConnectionConfig,
    options: FetchOptions,
}

impl<'a> ApiCatalogSource<'a> {
    #[must_use]
    pub const fn new(
        api: &'a dyn RelayApi,
        config: &'a ConnectionConfig,
        options: FetchOptions,
    ) -> Self {
        Self {
            api,
            config,
            options,
        }
    }
}

#[async_trait]
impl CatalogSource for ApiCatalogSource<'_> {
    async fn fetch_models(&self, channel_id: i64) -> Result<Vec<String>> {
        self.api
            .fetch_channel_models(self.config, channel_id, &self.options)
            .await
    }
}

/// Retry/backoff/timeout policy injected into the fetch primitive.
///
/// Backoff doubles per attempt up to a ceiling; the per-attempt timeout
/// grows geometrically (×1.5) to tolerate transient slowness without
/// abandoning a channel prematurely. `jitter` is a plain function so tests
/// can pin it to zero.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts for the bulk pass. One: a failed channel is marked failed
    /// and left for an explicit retry.
    pub bulk_attempts: u32,
    /// Attempts for an explicit single-channel retry.
    pub retry_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub base_timeout: Duration,
    /// Extra random delay added to each backoff, to avoid synchronized
    /// retry storms.
    pub jitter: fn(Duration) -> Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            bulk_attempts: 1,
            retry_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            base_timeout: Duration::from_secs(10),
            jitter: default_jitter,
        }
    }
}

impl RetryPolicy {
    /// Zero delays and no jitter; for tests.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            bulk_attempts: 1,
            retry_attempts: 3,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            base_timeout: Duration::from_secs(5),
            jitter: |_| Duration::ZERO,
        }
    }

    /// Backoff before retrying after `attempt` (1-based) failed:
    /// `base * 2^(attempt-1)`, capped.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let doubled = self
            .base_backoff
            .checked_mul(1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX))
            .unwrap_or(self.max_backoff);
        doubled.min(self.max_backoff)
    }

    /// Deadline for `attempt` (1-based): `base * 1.5^(attempt-1)`.
    #[must_use]
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let ms = (self.base_timeout.as_millis() as f64
            * 1.5f64.powi(i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX)))
            as u64;
        Duration::from_millis(ms)
    }
}

fn default_jitter(backoff: Duration) -> Duration {
    let max_extra = u64::try_from(backoff.as_millis() / 2).unwrap_or(u64::MAX);
    if max_extra == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_extra))
}

pub const MIN_BATCH_SIZE: usize = 2;
pub const MAX_BATCH_SIZE: usize = 8;
pub const INITIAL_BATCH_SIZE: usize = 5;

const METRICS_WINDOW_CAPACITY: usize = 20;
const GROW_SUCCESS_RATE: f64 = 0.8;
const GROW_MAX_AVG_MS: f64 = 5_000.0;
const SHRINK_SUCCESS_RATE: f64 = 0.5;
const SHRINK_MIN_AVG_MS: f64 = 15_000.0;

/// Additive-increase/additive-decrease batch size controller.
#[derive(Debug, Clone)]
pub struct BatchController {
    size: usize,
    window: MetricsWindow,
}

impl Default for BatchController {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            size: INITIAL_BATCH_SIZE,
            window: MetricsWindow::new(METRICS_WINDOW_CAPACITY),
        }
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    pub fn record(&mut self, metric: FetchMetric) {
        self.window.record(metric);
    }

    /// Re-evaluate the batch size from the current window. Called between
    /// batches; a no-op until at least one metric exists.
    pub fn adjust(&mut self) {
        if self.window.is_empty() {
            return;
        }
        let success_rate = self.window.success_rate();
        let avg_ms = self.window.avg_duration_ms();
        let previous = self.size;
        if success_rate < SHRINK_SUCCESS_RATE || avg_ms > SHRINK_MIN_AVG_MS {
            self.size = (self.size - 1).max(MIN_BATCH_SIZE);
        } else if success_rate > GROW_SUCCESS_RATE && avg_ms < GROW_MAX_AVG_MS {
            self.size = (self.size + 1).min(MAX_BATCH_SIZE);
        }
        if self.size != previous {
            debug!(
                from = previous,
                to = self.size,
                success_rate,
                avg_ms,
                "adjusted fetch batch size"
            );
        }
    }
}

/// Outcome of fetching one channel's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchOutcome {
    pub channel_id: i64,
    pub attempts: u32,
    pub result: FetchResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum FetchResult {
    Fetched { models: usize },
    Failed { reason: String },
}

/// Drives concurrent catalog fetches across many channels.
#[derive(Debug)]
pub struct FetchOrchestrator {
    policy: RetryPolicy,
    controller: BatchController,
    inter_batch_delay: Duration,
    /// Artificial stagger for the prefetch path.
    prefetch_delay: Duration,
}

impl Default for FetchOrchestrator {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl FetchOrchestrator {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            controller: BatchController::new(),
            inter_batch_delay: Duration::from_millis(300),
            prefetch_delay: Duration::from_millis(50),
        }
    }

    /// Zero inter-batch and prefetch delays; for tests.
    #[must_use]
    pub fn with_immediate_policy() -> Self {
        Self {
            policy: RetryPolicy::immediate(),
            controller: BatchController::new(),
            inter_batch_delay: Duration::ZERO,
            prefetch_delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn current_batch_size(&self) -> usize {
        self.controller.size()
    }

    /// Fetch every channel's catalog in adaptive batches.
    ///
    /// Each channel's `catalog_state` is updated the moment its request
    /// settles; cross-channel completion order within a batch is
    /// nondeterministic by design. Batch N+1 never dispatches before batch
    /// N has fully settled.
    pub async fn fetch_all(
        &mut self,
        channels: &mut [Channel],
        source: &dyn CatalogSource,
    ) -> Vec<FetchOutcome> {
        for channel in channels.iter_mut() {
            channel.catalog_state = CatalogState::Pending;
        }

        let total = channels.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut rest: &mut [Channel] = channels;

        while !rest.is_empty() {
            let size = self.controller.size().min(rest.len());
            let (batch, tail) = std::mem::take(&mut rest).split_at_mut(size);
            rest = tail;

            debug!(batch_size = size, remaining = rest.len(), "dispatching fetch batch");
            let attempts = self.policy.bulk_attempts;
            let policy = &self.policy;
            let results = join_all(
                batch
                    .iter_mut()
                    .map(|channel| fetch_channel(policy, channel, source, attempts)),
            )
            .await;

            for (outcome, metrics) in results {
                for metric in metrics {
                    self.controller.record(metric);
                }
                outcomes.push(outcome);
            }
            self.controller.adjust();

            if !rest.is_empty() && !self.inter_batch_delay.is_zero() {
                // Fixed pause between batches so the remote is not saturated.
                sleep(wall_now(), self.inter_batch_delay).await;
            }
        }

        let failed = outcomes
            .iter()
            .filter(|o| matches!(o.result, FetchResult::Failed { .. }))
            .count();
        info!(total, failed, "bulk catalog fetch finished");
        outcomes
    }

    /// Fetch the first `count` channels immediately so early data is
    /// available to show, with a short stagger between dispatches.
    ///
    /// Shares the per-channel fetch primitive but none of the batch/backoff
    /// machinery: a single attempt each, because the aim is responsiveness,
    /// not completeness.
    pub async fn prefetch_top(
        &mut self,
        channels: &mut [Channel],
        source: &dyn CatalogSource,
        count: usize,
    ) -> Vec<FetchOutcome> {
        let count = count.min(channels.len());
        let policy = &self.policy;
        let prefetch_delay = self.prefetch_delay;
        let results = join_all(channels[..count].iter_mut().enumerate().map(
            |(i, channel)| async move {
                if !prefetch_delay.is_zero() {
                    let stagger =
                        prefetch_delay.saturating_mul(u32::try_from(i).unwrap_or(u32::MAX));
                    sleep(wall_now(), stagger).await;
                }
                fetch_channel(policy, channel, source, 1).await
            },
        ))
        .await;

        let mut outcomes = Vec::with_capacity(results.len());
        for (outcome, metrics) in results {
            for metric in metrics {
                self.controller.record(metric);
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Explicit single-channel retry with the full attempt allowance.
    pub async fn retry_channel(
        &mut self,
        channel: &mut Channel,
        source: &dyn CatalogSource,
    ) -> FetchOutcome {
        let attempts = self.policy.retry_attempts;
        let (outcome, metrics) = fetch_channel(&self.policy, channel, source, attempts).await;
        for metric in metrics {
            self.controller.record(metric);
        }
        outcome
    }
}

/// Fetch one channel's catalog with up to `max_attempts` attempts.
///
/// Applies the result to the channel as soon as the request settles. Errors
/// that retrying cannot fix (auth, not-found, malformed responses) terminate
/// the loop immediately.
async fn fetch_channel(
    policy: &RetryPolicy,
    channel: &mut Channel,
    source: &dyn CatalogSource,
    max_attempts: u32,
) -> (FetchOutcome, Vec<FetchMetric>) {
    let max_attempts = max_attempts.max(1);
    // Loading → Loading on a concurrent trigger is harmless.
    channel.catalog_state = CatalogState::Loading;
    let mut metrics = Vec::new();

    for attempt in 1..=max_attempts {
        let deadline = policy.timeout_for(attempt);
        let start = Instant::now();
        let result = timeout(
            wall_now(),
            deadline,
            Box::pin(source.fetch_models(channel.id)),
        )
        .await;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let error = match result {
            Ok(Ok(models)) => {
                metrics.push(metric(channel.id, duration_ms, models.len(), true));
                debug!(
                    channel_id = channel.id,
                    models = models.len(),
                    attempt,
                    duration_ms,
                    "channel catalog fetched"
                );
                channel.catalog = models;
                channel.catalog_state = CatalogState::Fetched;
                return (
                    FetchOutcome {
                        channel_id: channel.id,
                        attempts: attempt,
                        result: FetchResult::Fetched {
                            models: channel.catalog.len(),
                        },
                    },
                    metrics,
                );
            }
            Ok(Err(err)) => err,
            Err(_) => Error::timeout(u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX)),
        };

        metrics.push(metric(channel.id, duration_ms, 0, false));
        let terminal = !error.is_retryable() || attempt == max_attempts;
        if terminal {
            warn!(
                channel_id = channel.id,
                attempt,
                error = %error,
                "channel catalog fetch failed"
            );
            let reason = error.to_string();
            channel.catalog_state = CatalogState::Failed(reason.clone());
            return (
                FetchOutcome {
                    channel_id: channel.id,
                    attempts: attempt,
                    result: FetchResult::Failed { reason },
                },
                metrics,
            );
        }

        let base = policy.backoff_for(attempt);
        let backoff = base.saturating_add((policy.jitter)(base));
        debug!(
            channel_id = channel.id,
            attempt,
            backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "retrying channel catalog fetch"
        );
        if !backoff.is_zero() {
            sleep(wall_now(), backoff).await;
        }
    }

    unreachable!("fetch loop always returns from its final attempt")
}

fn metric(channel_id: i64, duration_ms: u64, count: usize, success: bool) -> FetchMetric {
    FetchMetric {
        channel_id,
        request_duration_ms: duration_ms,
        result_count: count,
        success,
        timestamp: chrono::Utc::now().timestamp_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample(success: bool, duration_ms: u64) -> FetchMetric {
        FetchMetric {
            channel_id: 1,
            request_duration_ms: duration_ms,
            result_count: 0,
            success,
            timestamp: 0,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(10), Duration::from_secs(8));
    }

    #[test]
    fn timeout_grows_geometrically() {
        let policy = RetryPolicy {
            base_timeout: Duration::from_secs(10),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.timeout_for(1), Duration::from_secs(10));
        assert_eq!(policy.timeout_for(2), Duration::from_millis(15_000));
        assert_eq!(policy.timeout_for(3), Duration::from_millis(22_500));
    }

    #[test]
    fn controller_grows_on_healthy_metrics() {
        let mut controller = BatchController::new();
        assert_eq!(controller.size(), INITIAL_BATCH_SIZE);
        for _ in 0..10 {
            controller.record(sample(true, 1_000));
        }
        controller.adjust();
        assert_eq!(controller.size(), INITIAL_BATCH_SIZE + 1);
    }

    #[test]
    fn controller_shrinks_on_failures_or_slowness() {
        let mut controller = BatchController::new();
        for _ in 0..10 {
            controller.record(sample(false, 1_000));
        }
        controller.adjust();
        assert_eq!(controller.size(), INITIAL_BATCH_SIZE - 1);

        let mut slow = BatchController::new();
        for _ in 0..10 {
            slow.record(sample(true, 20_000));
        }
        slow.adjust();
        assert_eq!(slow.size(), INITIAL_BATCH_SIZE - 1);
    }

    #[test]
    fn controller_never_leaves_bounds() {
        let mut controller = BatchController::new();
        for _ in 0..50 {
            controller.record(sample(true, 100));
            controller.adjust();
        }
        assert_eq!(controller.size(), MAX_BATCH_SIZE);

        for _ in 0..50 {
            controller.record(sample(false, 30_000));
            controller.adjust();
        }
        assert_eq!(controller.size(), MIN_BATCH_SIZE);
    }

    #[test]
    fn controller_holds_in_the_middle_band() {
        let mut controller = BatchController::new();
        // 70% success, fast: neither grow nor shrink.
        for i in 0..10 {
            controller.record(sample(i % 10 < 7, 1_000));
        }
        controller.adjust();
        assert_eq!(controller.size(), INITIAL_BATCH_SIZE);
    }

    #[test]
    fn empty_window_does_not_adjust() {
        let mut controller = BatchController::new();
        controller.adjust();
        assert_eq!(controller.size(), INITIAL_BATCH_SIZE);
    }
}
