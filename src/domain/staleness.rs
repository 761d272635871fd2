//! Feed staleness monitoring.
//!
//! Staleness is advisory: stale samples are reported and logged but still
//! flow into scoring.

use crate::domain::metric::{MetricId, MetricSample};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;

pub const DEFAULT_STALE_AFTER_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq)]
pub struct StalenessPolicy {
    pub default_threshold: Duration,
    pub overrides: HashMap<MetricId, Duration>,
}

impl StalenessPolicy {
    pub fn new(default_threshold: Duration) -> Self {
        Self {
            default_threshold,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, id: MetricId, threshold: Duration) -> Self {
        self.overrides.insert(id, threshold);
        self
    }

    pub fn threshold_for(&self, id: MetricId) -> Duration {
        self.overrides
            .get(&id)
            .copied()
            .unwrap_or(self.default_threshold)
    }
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::new(Duration::hours(DEFAULT_STALE_AFTER_HOURS))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaleFeed {
    pub metric: MetricId,
    pub source_timestamp: DateTime<Utc>,
    pub age_seconds: i64,
    pub threshold_seconds: i64,
}

pub fn check_staleness(
    samples: &[MetricSample],
    now: DateTime<Utc>,
    policy: &StalenessPolicy,
) -> Vec<StaleFeed> {
    samples
        .iter()
        .filter_map(|sample| {
            let age = now - sample.source_timestamp;
            let threshold = policy.threshold_for(sample.id);
            if age <= threshold {
                return None;
            }
            tracing::warn!(
                metric = %sample.id,
                age_hours = age.num_hours(),
                threshold_hours = threshold.num_hours(),
                "stale feed"
            );
            Some(StaleFeed {
                metric: sample.id,
                source_timestamp: sample.source_timestamp,
                age_seconds: age.num_seconds(),
                threshold_seconds: threshold.num_seconds(),
            })
        })
        .collect()
}
