//! Sample collection from upstream feeds.
//!
//! Every feed is fetched on its own scoped thread with bounded retries. A feed
//! that keeps failing is reported as a failure; the others still complete.

use crate::domain::error::PxiError;
use crate::domain::metric::MetricSample;
use crate::ports::cache_port::CachePort;
use crate::ports::fetcher_port::FetcherPort;
use std::time::Duration;

/// Cache key prefix for fetched samples.
pub const SAMPLE_CACHE_PREFIX: &str = "sample:";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry - 1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

/// Blocking pause between attempts. Swapped out in tests.
pub trait Sleeper: Sync {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Fetch one sample, retrying failures per `policy`.
///
/// The returned error is always `PxiError::Ingestion` carrying the number of
/// attempts made and the last underlying failure.
pub fn fetch_with_retry(
    fetcher: &dyn FetcherPort,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Result<MetricSample, PxiError> {
    let metric = fetcher.metric_id();
    let mut last_error = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            tracing::warn!(
                metric = %metric,
                attempt,
                delay_secs = delay.as_secs_f64(),
                "retrying fetch"
            );
            sleeper.sleep(delay);
        }

        match fetcher.fetch() {
            Ok(sample) => return Ok(sample),
            Err(e) => last_error = Some(e),
        }
    }

    let reason = last_error.map_or_else(|| "no attempts made".to_string(), |e| e.to_string());
    tracing::error!(metric = %metric, reason = %reason, "fetch failed");
    Err(PxiError::Ingestion {
        metric,
        attempts: policy.max_retries + 1,
        reason,
    })
}

#[derive(Debug, Default)]
pub struct IngestionOutcome {
    pub samples: Vec<MetricSample>,
    pub failures: Vec<PxiError>,
}

/// Fetch from every feed concurrently. Samples come back in feed order.
pub fn collect_samples(
    fetchers: &[&dyn FetcherPort],
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
) -> IngestionOutcome {
    let results: Vec<Result<MetricSample, PxiError>> = std::thread::scope(|s| {
        let handles: Vec<_> = fetchers
            .iter()
            .map(|&f| s.spawn(move || fetch_with_retry(f, policy, sleeper)))
            .collect();

        handles
            .into_iter()
            .zip(fetchers)
            .map(|(h, f)| {
                h.join().unwrap_or_else(|_| {
                    Err(PxiError::Ingestion {
                        metric: f.metric_id(),
                        attempts: 0,
                        reason: "fetch thread panicked".into(),
                    })
                })
            })
            .collect()
    });

    let mut outcome = IngestionOutcome::default();
    for r in results {
        match r {
            Ok(sample) => outcome.samples.push(sample),
            Err(e) => outcome.failures.push(e),
        }
    }
    tracing::info!(
        fetched = outcome.samples.len(),
        failed = outcome.failures.len(),
        "ingestion complete"
    );
    outcome
}

/// Serve the sample from `cache` when present, otherwise fetch with retry and
/// store the result for `ttl_seconds`.
pub fn fetch_with_cache(
    fetcher: &dyn FetcherPort,
    cache: &dyn CachePort,
    ttl_seconds: u64,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Result<MetricSample, PxiError> {
    let key = format!("{SAMPLE_CACHE_PREFIX}{}", fetcher.metric_id());

    if let Some(raw) = cache.get(&key) {
        match serde_json::from_str::<MetricSample>(&raw) {
            Ok(sample) => {
                tracing::debug!(key = %key, "cache hit");
                return Ok(sample);
            }
            Err(e) => tracing::warn!(key = %key, error = %e, "discarding unreadable cache entry"),
        }
    }

    let sample = fetch_with_retry(fetcher, policy, sleeper)?;
    let encoded = serde_json::to_string(&sample).map_err(|e| PxiError::Data {
        reason: format!("failed to encode sample: {e}"),
    })?;
    cache.set(&key, encoded, ttl_seconds);
    Ok(sample)
}
