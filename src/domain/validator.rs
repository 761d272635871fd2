//! Sample batch validation.
//!
//! Hard ranges are checked per sample in batch order, then the HY/IG credit
//! ordering rule is applied. Every sample is examined; the error reports the
//! first violation in that order along with the total count.

use crate::domain::error::{PxiError, ValidationError, Violation};
use crate::domain::metric::{MetricId, MetricSample, RangeTable};
use std::collections::HashSet;

pub fn validate_samples(samples: &[MetricSample], limits: &RangeTable) -> Result<(), PxiError> {
    let mut violations = Vec::new();
    let mut seen = HashSet::new();

    for sample in samples {
        if let Some(v) = check_range(sample, limits) {
            violations.push(v);
        }
        if !seen.insert((sample.id, sample.source_timestamp)) {
            violations.push(Violation::DuplicateSample {
                metric: sample.id,
                timestamp: sample.source_timestamp,
            });
        }
    }

    if let Some(v) = check_credit_ordering(samples) {
        violations.push(v);
    }

    for v in &violations {
        tracing::warn!(violation = %v, "sample rejected");
    }

    let count = violations.len();
    match violations.into_iter().next() {
        Some(first) => Err(ValidationError { first, count }.into()),
        None => {
            tracing::info!(samples = samples.len(), "sample batch validated");
            Ok(())
        }
    }
}

fn check_range(sample: &MetricSample, limits: &RangeTable) -> Option<Violation> {
    let Some(range) = limits.get(sample.id) else {
        tracing::warn!(metric = %sample.id, value = sample.value, "no hard range configured");
        return None;
    };

    if !sample.value.is_finite() {
        return Some(Violation::NonFinite {
            metric: sample.id,
            value: sample.value,
        });
    }

    if !range.contains(sample.value) {
        return Some(Violation::OutOfRange {
            metric: sample.id,
            value: sample.value,
            min: range.min,
            max: range.max,
        });
    }

    None
}

fn check_credit_ordering(samples: &[MetricSample]) -> Option<Violation> {
    let first_value = |id: MetricId| samples.iter().find(|s| s.id == id).map(|s| s.value);

    match (first_value(MetricId::HySpread), first_value(MetricId::IgSpread)) {
        (Some(hy), Some(ig)) if !(hy > ig) => Some(Violation::CreditOrdering { hy, ig }),
        _ => None,
    }
}
