//! Statistical sanity checks over a single metric's history.
//!
//! Series are ordered oldest to newest; the last element is the value under
//! test. Dispersion uses the sample (n-1) standard deviation.

use crate::domain::metric::MetricId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_OUTLIER_THRESHOLD: f64 = 3.0;
pub const DEFAULT_MIN_POINTS: usize = 5;
pub const DEFAULT_VOLATILITY_WINDOW: usize = 30;

const FLATLINE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SanityCheckResult {
    pub label: String,
    pub latest: Option<f64>,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub z_score: Option<f64>,
    pub is_outlier: bool,
    pub is_flat: bool,
    pub is_invalid: bool,
    pub ok: bool,
    pub reason: Option<String>,
}

impl SanityCheckResult {
    fn failed(label: &str, reason: String) -> Self {
        Self {
            label: label.to_string(),
            latest: None,
            mean: None,
            std_dev: None,
            z_score: None,
            is_outlier: false,
            is_flat: false,
            is_invalid: false,
            ok: false,
            reason: Some(reason),
        }
    }

    /// Too few points to judge; not an outlier, flatline or invalid value.
    pub fn is_insufficient(&self) -> bool {
        !self.ok && !self.is_outlier && !self.is_flat && !self.is_invalid
    }
}

pub fn sanity_check(
    series: &[f64],
    label: &str,
    threshold: f64,
    min_points: usize,
) -> SanityCheckResult {
    if series.len() < min_points || series.is_empty() {
        return SanityCheckResult::failed(
            label,
            format!(
                "insufficient data: {} point(s), need {}",
                series.len(),
                min_points
            ),
        );
    }

    let latest = series[series.len() - 1];
    if !latest.is_finite() {
        return SanityCheckResult {
            latest: Some(latest),
            is_invalid: true,
            ..SanityCheckResult::failed(label, format!("latest value {latest} is not finite"))
        };
    }

    if let Some((idx, v)) = series.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return SanityCheckResult {
            latest: Some(latest),
            is_invalid: true,
            ..SanityCheckResult::failed(label, format!("point {idx} ({v}) is not finite"))
        };
    }

    let (mean, std_dev) = mean_and_sample_std(series);

    if std_dev < FLATLINE_EPSILON {
        return SanityCheckResult {
            label: label.to_string(),
            latest: Some(latest),
            mean: Some(mean),
            std_dev: Some(std_dev),
            z_score: Some(0.0),
            is_outlier: false,
            is_flat: true,
            is_invalid: false,
            ok: false,
            reason: Some(format!(
                "flatline: {} identical point(s) around {mean}",
                series.len()
            )),
        };
    }

    let z = (latest - mean) / std_dev;
    let is_outlier = z.abs() > threshold;

    SanityCheckResult {
        label: label.to_string(),
        latest: Some(latest),
        mean: Some(mean),
        std_dev: Some(std_dev),
        z_score: Some(z),
        is_outlier,
        is_flat: false,
        is_invalid: false,
        ok: !is_outlier,
        reason: is_outlier.then(|| {
            format!("outlier: z={z:.2} exceeds {threshold} (mean {mean:.4}, sd {std_dev:.4})")
        }),
    }
}

/// Mean and sample standard deviation. A single point has zero deviation.
pub fn mean_and_sample_std(series: &[f64]) -> (f64, f64) {
    let n = series.len() as f64;
    let mean = series.iter().sum::<f64>() / n;
    if series.len() < 2 {
        return (mean, 0.0);
    }
    let variance = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

/// Coefficient of variation over the last `window` points, in percent.
pub fn rolling_volatility(series: &[f64], window: usize) -> Option<f64> {
    if window < 2 || series.len() < window {
        return None;
    }
    let tail = &series[series.len() - window..];
    let (mean, std_dev) = mean_and_sample_std(tail);
    if mean == 0.0 || !mean.is_finite() {
        return None;
    }
    Some(std_dev / mean.abs() * 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StabilityRating {
    Stable,
    Moderate,
    Volatile,
    Extreme,
    Unknown,
}

impl fmt::Display for StabilityRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StabilityRating::Stable => "Stable",
            StabilityRating::Moderate => "Moderate",
            StabilityRating::Volatile => "Volatile",
            StabilityRating::Extreme => "Extreme",
            StabilityRating::Unknown => "Unknown",
        };
        f.pad(s)
    }
}

pub fn stability_rating(volatility: Option<f64>) -> StabilityRating {
    match volatility {
        None => StabilityRating::Unknown,
        Some(v) if v < 5.0 => StabilityRating::Stable,
        Some(v) if v < 15.0 => StabilityRating::Moderate,
        Some(v) if v < 30.0 => StabilityRating::Volatile,
        Some(_) => StabilityRating::Extreme,
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSanityReport {
    pub total: usize,
    pub ok: usize,
    pub outliers: usize,
    pub flatlines: usize,
    pub invalid: usize,
    pub insufficient: usize,
    pub failures: Vec<(MetricId, SanityCheckResult)>,
}

pub fn sanity_check_batch(
    series: &BTreeMap<MetricId, Vec<f64>>,
    threshold: f64,
    min_points: usize,
) -> BatchSanityReport {
    let mut report = BatchSanityReport::default();

    for (&id, values) in series {
        let result = sanity_check(values, id.label(), threshold, min_points);
        report.total += 1;

        if result.ok {
            report.ok += 1;
            continue;
        }

        if result.is_outlier {
            report.outliers += 1;
        } else if result.is_flat {
            report.flatlines += 1;
        } else if result.is_invalid {
            report.invalid += 1;
        } else {
            report.insufficient += 1;
        }

        tracing::warn!(
            metric = %id,
            reason = result.reason.as_deref().unwrap_or(""),
            "sanity check failed"
        );
        report.failures.push((id, result));
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn insufficient_data_reports_no_statistics() {
        let r = sanity_check(&[1.0, 2.0, 3.0], "vix", 3.0, 5);
        assert!(!r.ok);
        assert!(r.is_insufficient());
        assert!(r.mean.is_none());
        assert!(r.std_dev.is_none());
        assert!(r.z_score.is_none());
        assert!(r.reason.unwrap().starts_with("insufficient data"));
    }

    #[test]
    fn empty_series_is_insufficient_even_with_zero_minimum() {
        let r = sanity_check(&[], "vix", 3.0, 0);
        assert!(r.is_insufficient());
    }

    #[test]
    fn non_finite_latest_is_invalid() {
        let r = sanity_check(&[1.0, 2.0, 3.0, 4.0, f64::NAN], "vix", 3.0, 5);
        assert!(r.is_invalid);
        assert!(!r.ok);
        assert!(r.mean.is_none());
    }

    #[test]
    fn non_finite_point_inside_history_is_invalid() {
        let r = sanity_check(&[9.0, f64::NAN, 11.0, 9.0, 11.0], "vix", 3.0, 5);
        assert!(r.is_invalid);
        assert!(!r.ok);
        assert!(r.z_score.is_none());
        assert_eq!(r.reason.as_deref(), Some("point 1 (NaN) is not finite"));

        let r = sanity_check(&[9.0, 11.0, f64::INFINITY, 9.0, 11.0], "vix", 3.0, 5);
        assert!(r.is_invalid);
    }

    #[test]
    fn constant_series_is_flat() {
        let r = sanity_check(&[20.0; 6], "vix", 3.0, 5);
        assert!(r.is_flat);
        assert!(!r.ok);
        assert_eq!(r.z_score, Some(0.0));
        assert!(!r.is_outlier);
    }

    #[test]
    fn uses_sample_standard_deviation() {
        let r = sanity_check(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], "x", 3.0, 5);
        assert_relative_eq!(r.mean.unwrap(), 5.0);
        assert_relative_eq!(r.std_dev.unwrap(), (32.0_f64 / 7.0).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(
            r.z_score.unwrap(),
            4.0 / (32.0_f64 / 7.0).sqrt(),
            epsilon = 1e-12
        );
        assert!(r.ok);
    }

    #[test]
    fn spike_beyond_three_sigma_is_outlier() {
        let mut series = vec![10.0, 10.1, 9.9, 10.0, 10.2, 9.8, 10.0, 10.1, 9.9, 10.0];
        series.extend([10.0; 10]);
        series.push(25.0);
        let r = sanity_check(&series, "vix", 3.0, 5);
        assert!(r.z_score.unwrap() > 3.0);
        assert!(r.is_outlier);
        assert!(!r.ok);
        assert!(r.reason.unwrap().starts_with("outlier"));
    }

    #[test]
    fn threshold_is_strict() {
        let r = sanity_check(&[-1.0, 1.0, -1.0, 1.0, 1.0], "x", 10.0, 5);
        let z = r.z_score.unwrap();
        let at_threshold = sanity_check(&[-1.0, 1.0, -1.0, 1.0, 1.0], "x", z, 5);
        assert!(!at_threshold.is_outlier);
        assert!(at_threshold.ok);
    }

    #[test]
    fn rolling_volatility_zero_for_constant_window() {
        assert_eq!(rolling_volatility(&[5.0; 30], 30), Some(0.0));
    }

    #[test]
    fn rolling_volatility_uses_trailing_window() {
        let mut series = vec![1000.0, -500.0];
        series.extend([10.0, 12.0, 8.0, 10.0]);
        let v = rolling_volatility(&series, 4).unwrap();
        let (_, sd) = mean_and_sample_std(&[10.0, 12.0, 8.0, 10.0]);
        assert_relative_eq!(v, sd / 10.0 * 100.0, epsilon = 1e-12);
    }

    #[test]
    fn rolling_volatility_none_when_short_or_zero_mean() {
        assert_eq!(rolling_volatility(&[1.0, 2.0], 30), None);
        assert_eq!(rolling_volatility(&[-1.0, 1.0, -1.0, 1.0], 4), None);
    }

    #[test]
    fn stability_rating_buckets() {
        assert_eq!(stability_rating(None), StabilityRating::Unknown);
        assert_eq!(stability_rating(Some(4.99)), StabilityRating::Stable);
        assert_eq!(stability_rating(Some(5.0)), StabilityRating::Moderate);
        assert_eq!(stability_rating(Some(15.0)), StabilityRating::Volatile);
        assert_eq!(stability_rating(Some(30.0)), StabilityRating::Extreme);
    }

    #[test]
    fn batch_aggregates_counts() {
        let mut series = BTreeMap::new();
        series.insert(MetricId::Vix, vec![15.0, 16.0, 14.0, 15.5, 15.2]);
        series.insert(MetricId::Dxy, vec![100.0; 5]);
        series.insert(MetricId::Nfci, vec![0.1, 0.2]);
        series.insert(MetricId::HySpread, vec![0.04, 0.041, 0.039, 0.04, f64::INFINITY]);
        let mut spike = vec![0.05; 20];
        spike[0] = 0.051;
        spike.push(0.2);
        series.insert(MetricId::BtcReturn, spike);

        let report = sanity_check_batch(&series, 3.0, 5);
        assert_eq!(report.total, 5);
        assert_eq!(report.ok, 1);
        assert_eq!(report.flatlines, 1);
        assert_eq!(report.insufficient, 1);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.outliers, 1);
        assert_eq!(report.failures.len(), 4);
        assert_eq!(report.failures[0].0, MetricId::HySpread);
    }

    proptest! {
        #[test]
        fn volatility_grows_with_spread_at_fixed_mean(
            mean in 1.0f64..100.0,
            spread in 0.01f64..10.0,
            extra in 0.01f64..10.0,
        ) {
            let narrow = [mean - spread, mean + spread, mean - spread, mean + spread];
            let wide_spread = spread + extra;
            let wide = [
                mean - wide_spread,
                mean + wide_spread,
                mean - wide_spread,
                mean + wide_spread,
            ];
            let v_narrow = rolling_volatility(&narrow, 4).unwrap();
            let v_wide = rolling_volatility(&wide, 4).unwrap();
            prop_assert!(v_wide > v_narrow);
        }
    }
}
