//! Domain error types.

use crate::domain::metric::MetricId;
use chrono::{DateTime, NaiveDate, Utc};

/// A single hard-rule breach found while validating a sample batch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Violation {
    #[error("{metric} value {value} outside [{min}, {max}]")]
    OutOfRange {
        metric: MetricId,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{metric} value {value} is not a finite number")]
    NonFinite { metric: MetricId, value: f64 },

    #[error("duplicate {metric} sample at {timestamp}")]
    DuplicateSample {
        metric: MetricId,
        timestamp: DateTime<Utc>,
    },

    #[error("hy_spread {hy} must exceed ig_spread {ig}")]
    CreditOrdering { hy: f64, ig: f64 },
}

/// Batch-level validation failure. Carries the first violation in
/// deterministic order and how many were found in total.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{first} ({count} violation(s) in batch)")]
pub struct ValidationError {
    pub first: Violation,
    pub count: usize,
}

/// Top-level error type for pxi.
#[derive(Debug, thiserror::Error)]
pub enum PxiError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("metric {metric} unavailable: {reason}")]
    MetricUnavailable { metric: MetricId, reason: String },

    #[error("ingestion of {metric} failed after {attempts} attempt(s): {reason}")]
    Ingestion {
        metric: MetricId,
        attempts: u32,
        reason: String,
    },

    #[error("no historical data between {start} and {end}")]
    BacktestData { start: NaiveDate, end: NaiveDate },

    #[error("invalid centroid model: {reason}")]
    ModelInvalid { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PxiError {
    pub(crate) fn config_invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        PxiError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Process exit status for this error category.
    pub fn exit_status(&self) -> u8 {
        match self {
            PxiError::Io(_) => 1,
            PxiError::ConfigParse { .. }
            | PxiError::ConfigMissing { .. }
            | PxiError::ConfigInvalid { .. } => 2,
            PxiError::Data { .. } | PxiError::ModelInvalid { .. } => 3,
            PxiError::Validation(_) => 4,
            PxiError::MetricUnavailable { .. } | PxiError::BacktestData { .. } => 5,
            PxiError::Ingestion { .. } => 6,
        }
    }
}

impl From<&PxiError> for std::process::ExitCode {
    fn from(err: &PxiError) -> Self {
        std::process::ExitCode::from(err.exit_status())
    }
}
