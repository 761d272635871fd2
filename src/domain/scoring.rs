//! Normalizer and composite scorer.
//!
//! Each metric's latest sample is z-scored against its history, sign-adjusted
//! by polarity so that positive always means stress-reducing, weighted, and
//! averaged into the composite z. The composite is then mapped onto the
//! 0-100 PXI scale:
//!
//! ```text
//! pxi = clamp(50 + 25 * z, 0, 100)
//! ```

use crate::domain::error::PxiError;
use crate::domain::metric::{MetricDefinition, MetricId, MetricSample, Polarity};
use crate::domain::sanity::{self, DEFAULT_MIN_POINTS, DEFAULT_OUTLIER_THRESHOLD};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const PXI_CENTER: f64 = 50.0;
const PXI_POINTS_PER_SIGMA: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PxiBand {
    pub label: &'static str,
    pub min: f64,
    pub max: f64,
}

/// Contiguous, ascending partition of [0, 100]. The top band includes 100.
pub static PXI_BANDS: [PxiBand; 4] = [
    PxiBand {
        label: "Stress",
        min: 0.0,
        max: 30.0,
    },
    PxiBand {
        label: "Caution",
        min: 30.0,
        max: 50.0,
    },
    PxiBand {
        label: "Stable",
        min: 50.0,
        max: 75.0,
    },
    PxiBand {
        label: "PAMP",
        min: 75.0,
        max: 100.0,
    },
];

impl PxiBand {
    /// Band holding `pxi`. Finite values outside [0, 100] fall into the
    /// nearest end band; non-finite values have no band.
    pub fn classify(pxi: f64) -> Option<&'static PxiBand> {
        if !pxi.is_finite() {
            return None;
        }
        let last = PXI_BANDS.len() - 1;
        let band = PXI_BANDS
            .iter()
            .enumerate()
            .find(|(i, b)| pxi >= b.min && (pxi < b.max || (*i == last && pxi <= b.max)))
            .map(|(_, b)| b)
            .unwrap_or(if pxi < PXI_BANDS[0].min {
                &PXI_BANDS[0]
            } else {
                &PXI_BANDS[last]
            });
        Some(band)
    }
}

pub fn pxi_from_z(z: f64) -> f64 {
    (PXI_CENTER + PXI_POINTS_PER_SIGMA * z).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MetricState {
    #[serde(rename = "PAMP")]
    Pamp,
    Stress,
    Caution,
    Stable,
}

impl fmt::Display for MetricState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricState::Pamp => "PAMP",
            MetricState::Stress => "Stress",
            MetricState::Caution => "Caution",
            MetricState::Stable => "Stable",
        };
        f.pad(s)
    }
}

/// Threshold set for per-metric state classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateThresholds {
    /// z >= 2 PAMP, z <= -2 Stress, |z| >= 1 Caution.
    #[default]
    Symmetric,
    /// z > 2 PAMP, z < -1 Stress, 1 <= z < 2 Caution.
    Asymmetric,
}

impl FromStr for StateThresholds {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "symmetric" => Ok(StateThresholds::Symmetric),
            "asymmetric" => Ok(StateThresholds::Asymmetric),
            other => Err(format!("unknown threshold set '{other}'")),
        }
    }
}

pub fn classify_metric_state(z: f64, thresholds: StateThresholds) -> MetricState {
    match thresholds {
        StateThresholds::Symmetric => {
            if z >= 2.0 {
                MetricState::Pamp
            } else if z <= -2.0 {
                MetricState::Stress
            } else if z.abs() >= 1.0 {
                MetricState::Caution
            } else {
                MetricState::Stable
            }
        }
        StateThresholds::Asymmetric => {
            if z > 2.0 {
                MetricState::Pamp
            } else if z < -1.0 {
                MetricState::Stress
            } else if z >= 1.0 {
                MetricState::Caution
            } else {
                MetricState::Stable
            }
        }
    }
}

/// What to do when a configured metric has no usable sample or history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingMetricPolicy {
    /// Drop the metric and its weight from the denominator.
    #[default]
    Exclude,
    /// Fail the whole composite.
    Abort,
}

impl FromStr for MissingMetricPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exclude" => Ok(MissingMetricPolicy::Exclude),
            "abort" => Ok(MissingMetricPolicy::Abort),
            other => Err(format!("unknown missing-metric policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    pub outlier_threshold: f64,
    pub min_points: usize,
    pub contribution_cap: f64,
    pub missing_policy: MissingMetricPolicy,
    pub state_thresholds: StateThresholds,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            outlier_threshold: DEFAULT_OUTLIER_THRESHOLD,
            min_points: DEFAULT_MIN_POINTS,
            contribution_cap: 3.0,
            missing_policy: MissingMetricPolicy::Exclude,
            state_thresholds: StateThresholds::Symmetric,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricContribution {
    pub id: MetricId,
    pub label: String,
    pub value: f64,
    pub normalized: f64,
    pub weight: f64,
    pub polarity: Polarity,
    pub raw_z: f64,
    pub signed_z: f64,
    pub contribution: f64,
    pub state: MetricState,
    pub is_outlier: bool,
    pub is_flat: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedMetric {
    pub id: MetricId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeSnapshot {
    pub pxi: f64,
    pub status_label: String,
    pub z_score: f64,
    pub calculated_at: DateTime<Utc>,
    pub total_weight: f64,
    pub metrics: Vec<MetricContribution>,
    pub excluded: Vec<ExcludedMetric>,
}

impl CompositeSnapshot {
    pub fn contribution(&self, id: MetricId) -> Option<&MetricContribution> {
        self.metrics.iter().find(|m| m.id == id)
    }
}

pub struct CompositeScorer {
    definitions: Vec<MetricDefinition>,
    config: ScoringConfig,
}

impl CompositeScorer {
    pub fn new(mut definitions: Vec<MetricDefinition>, config: ScoringConfig) -> Self {
        definitions.sort_by_key(|d| d.id);
        Self {
            definitions,
            config,
        }
    }

    pub fn definitions(&self) -> &[MetricDefinition] {
        &self.definitions
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score the latest samples against each metric's persisted history.
    ///
    /// The history for a metric must not already contain the sample being
    /// scored; the sample value is appended before the sanity pass.
    pub fn score(
        &self,
        samples: &[MetricSample],
        history: &BTreeMap<MetricId, Vec<f64>>,
        now: DateTime<Utc>,
    ) -> Result<CompositeSnapshot, PxiError> {
        let mut metrics = Vec::with_capacity(self.definitions.len());
        let mut excluded = Vec::new();

        for def in &self.definitions {
            match self.score_metric(def, samples, history) {
                Ok(c) => metrics.push(c),
                Err(reason) => {
                    if self.config.missing_policy == MissingMetricPolicy::Abort {
                        return Err(PxiError::MetricUnavailable {
                            metric: def.id,
                            reason,
                        });
                    }
                    tracing::warn!(metric = %def.id, %reason, "metric excluded from composite");
                    excluded.push(ExcludedMetric { id: def.id, reason });
                }
            }
        }

        let total_weight: f64 = metrics.iter().map(|m| m.weight).sum();
        if metrics.is_empty() || total_weight <= 0.0 {
            let metric = self
                .definitions
                .first()
                .map(|d| d.id)
                .unwrap_or(MetricId::HySpread);
            return Err(PxiError::MetricUnavailable {
                metric,
                reason: "no metric available for composite".into(),
            });
        }

        let z_score = metrics.iter().map(|m| m.contribution).sum::<f64>() / total_weight;
        let pxi = pxi_from_z(z_score);
        let band = PxiBand::classify(pxi).ok_or_else(|| PxiError::Data {
            reason: format!("composite z-score {z_score} is not finite"),
        })?;

        tracing::info!(
            pxi,
            status = band.label,
            included = metrics.len(),
            excluded = excluded.len(),
            "composite computed"
        );

        Ok(CompositeSnapshot {
            pxi,
            status_label: band.label.to_string(),
            z_score,
            calculated_at: now,
            total_weight,
            metrics,
            excluded,
        })
    }

    fn score_metric(
        &self,
        def: &MetricDefinition,
        samples: &[MetricSample],
        history: &BTreeMap<MetricId, Vec<f64>>,
    ) -> Result<MetricContribution, String> {
        let sample = samples
            .iter()
            .filter(|s| s.id == def.id)
            .max_by_key(|s| s.source_timestamp)
            .ok_or_else(|| "no sample".to_string())?;

        let mut series = history.get(&def.id).cloned().unwrap_or_default();
        series.push(sample.value);

        let check = sanity::sanity_check(
            &series,
            &def.label,
            self.config.outlier_threshold,
            self.config.min_points,
        );
        if check.is_invalid || check.is_insufficient() {
            return Err(check
                .reason
                .unwrap_or_else(|| "sanity check failed".to_string()));
        }

        let raw_z = check.z_score.unwrap_or(0.0);
        let oriented = match def.polarity {
            Polarity::Positive => -raw_z,
            Polarity::Negative => raw_z,
        };
        let cap = self.config.contribution_cap;
        let signed_z = oriented.clamp(-cap, cap);

        Ok(MetricContribution {
            id: def.id,
            label: def.label.clone(),
            value: sample.value,
            normalized: def.normalize(sample.value),
            weight: def.weight,
            polarity: def.polarity,
            raw_z,
            signed_z,
            contribution: def.weight * signed_z,
            state: classify_metric_state(raw_z, self.config.state_thresholds),
            is_outlier: check.is_outlier,
            is_flat: check.is_flat,
        })
    }
}
