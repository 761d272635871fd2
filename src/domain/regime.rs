//! Regime classification against an offline centroid model.
//!
//! Clustering happens elsewhere. This module only validates the model
//! artifact and assigns each snapshot to its nearest centroid.

use crate::domain::error::PxiError;
use crate::domain::metric::MetricId;
use crate::domain::scoring::{classify_metric_state, CompositeSnapshot, MetricState, StateThresholds};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub label: String,
    pub means: Vec<f64>,
}

/// Versioned, immutable output of the offline clustering job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentroidModel {
    pub version: String,
    #[serde(default)]
    pub trained_at: Option<DateTime<Utc>>,
    pub features: Vec<MetricId>,
    pub centroids: Vec<Centroid>,
}

impl CentroidModel {
    pub fn validate(&self) -> Result<(), PxiError> {
        let invalid = |reason: String| Err(PxiError::ModelInvalid { reason });

        if self.features.is_empty() {
            return invalid("model has no features".into());
        }
        if self.centroids.is_empty() {
            return invalid("model has no centroids".into());
        }

        let mut features = HashSet::new();
        for f in &self.features {
            if !features.insert(f) {
                return invalid(format!("duplicate feature {f}"));
            }
        }

        let mut labels = HashSet::new();
        for c in &self.centroids {
            if c.label.trim().is_empty() {
                return invalid("centroid with empty label".into());
            }
            if !labels.insert(c.label.as_str()) {
                return invalid(format!("duplicate centroid label {}", c.label));
            }
            if c.means.len() != self.features.len() {
                return invalid(format!(
                    "centroid {} has {} means, expected {}",
                    c.label,
                    c.means.len(),
                    self.features.len()
                ));
            }
            if c.means.iter().any(|m| !m.is_finite()) {
                return invalid(format!("centroid {} has non-finite means", c.label));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegimeAssignment {
    pub regime: String,
    pub pxi_value: f64,
    pub total_weight: f64,
    pub pamp_count: usize,
    pub stress_count: usize,
    pub timestamp: DateTime<Utc>,
    pub distance: f64,
    pub model_version: String,
}

#[derive(Debug)]
pub struct RegimeClassifier {
    model: CentroidModel,
}

impl RegimeClassifier {
    pub fn new(model: CentroidModel) -> Result<Self, PxiError> {
        model.validate()?;
        Ok(Self { model })
    }

    pub fn model(&self) -> &CentroidModel {
        &self.model
    }

    /// Signed z for each model feature. Features missing from the snapshot
    /// sit at the neutral point.
    pub fn feature_vector(&self, snapshot: &CompositeSnapshot) -> Vec<f64> {
        self.model
            .features
            .iter()
            .map(|&id| snapshot.contribution(id).map_or(0.0, |m| m.signed_z))
            .collect()
    }

    pub fn classify(
        &self,
        snapshot: &CompositeSnapshot,
        thresholds: StateThresholds,
    ) -> Result<RegimeAssignment, PxiError> {
        let features = self.feature_vector(snapshot);

        let (best, distance) = self
            .model
            .centroids
            .iter()
            .map(|c| (c, euclidean(&features, &c.means)))
            .fold(None, |best: Option<(&Centroid, f64)>, (c, d)| match best {
                Some((_, best_d)) if best_d <= d => best,
                _ => Some((c, d)),
            })
            .ok_or_else(|| PxiError::ModelInvalid {
                reason: "model has no centroids".into(),
            })?;

        let states: Vec<MetricState> = snapshot
            .metrics
            .iter()
            .map(|m| classify_metric_state(m.signed_z, thresholds))
            .collect();

        tracing::debug!(regime = %best.label, distance, "regime assigned");

        Ok(RegimeAssignment {
            regime: best.label.clone(),
            pxi_value: snapshot.pxi,
            total_weight: snapshot.total_weight,
            pamp_count: states.iter().filter(|s| **s == MetricState::Pamp).count(),
            stress_count: states.iter().filter(|s| **s == MetricState::Stress).count(),
            timestamp: snapshot.calculated_at,
            distance,
            model_version: self.model.version.clone(),
        })
    }
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metric::Polarity;
    use crate::domain::scoring::MetricContribution;
    use chrono::TimeZone;

    fn model() -> CentroidModel {
        CentroidModel {
            version: "2024-06-01".into(),
            trained_at: None,
            features: vec![MetricId::Vix, MetricId::HySpread],
            centroids: vec![
                Centroid {
                    label: "Calm".into(),
                    means: vec![1.0, 1.0],
                },
                Centroid {
                    label: "Normal".into(),
                    means: vec![0.0, 0.0],
                },
                Centroid {
                    label: "Stress".into(),
                    means: vec![-2.0, -2.0],
                },
            ],
        }
    }

    fn contribution(id: MetricId, signed_z: f64) -> MetricContribution {
        MetricContribution {
            id,
            label: id.label().into(),
            value: 0.0,
            normalized: 0.0,
            weight: 1.0,
            polarity: Polarity::Positive,
            raw_z: -signed_z,
            signed_z,
            contribution: signed_z,
            state: MetricState::Stable,
            is_outlier: false,
            is_flat: false,
        }
    }

    fn snapshot(metrics: Vec<MetricContribution>) -> CompositeSnapshot {
        CompositeSnapshot {
            pxi: 42.0,
            status_label: "Caution".into(),
            z_score: -0.32,
            calculated_at: Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap(),
            total_weight: metrics.len() as f64,
            metrics,
            excluded: vec![],
        }
    }

    #[test]
    fn assigns_nearest_centroid() {
        let clf = RegimeClassifier::new(model()).unwrap();
        let snap = snapshot(vec![
            contribution(MetricId::Vix, -2.5),
            contribution(MetricId::HySpread, -1.5),
        ]);
        let a = clf.classify(&snap, StateThresholds::Symmetric).unwrap();
        assert_eq!(a.regime, "Stress");
        assert_eq!(a.model_version, "2024-06-01");
        assert_eq!(a.pxi_value, 42.0);
        assert!((a.distance - (0.25f64 + 0.25).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn counts_votes_from_signed_z() {
        let clf = RegimeClassifier::new(model()).unwrap();
        let snap = snapshot(vec![
            contribution(MetricId::Vix, -2.5),
            contribution(MetricId::HySpread, 2.0),
            contribution(MetricId::Dxy, -3.0),
        ]);
        let a = clf.classify(&snap, StateThresholds::Symmetric).unwrap();
        assert_eq!(a.pamp_count, 1);
        assert_eq!(a.stress_count, 2);
        assert_eq!(a.total_weight, 3.0);
    }

    #[test]
    fn missing_feature_is_neutral() {
        let clf = RegimeClassifier::new(model()).unwrap();
        let snap = snapshot(vec![contribution(MetricId::Vix, 0.1)]);
        assert_eq!(clf.feature_vector(&snap), vec![0.1, 0.0]);
        assert_eq!(
            clf.classify(&snap, StateThresholds::Symmetric).unwrap().regime,
            "Normal"
        );
    }

    #[test]
    fn tie_resolves_to_earlier_centroid() {
        let clf = RegimeClassifier::new(model()).unwrap();
        let snap = snapshot(vec![
            contribution(MetricId::Vix, 0.5),
            contribution(MetricId::HySpread, 0.5),
        ]);
        assert_eq!(
            clf.classify(&snap, StateThresholds::Symmetric)
                .unwrap()
                .regime,
            "Calm"
        );
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let mut m = model();
        m.centroids[1].means.push(0.0);
        let err = RegimeClassifier::new(m).unwrap_err();
        assert!(matches!(err, PxiError::ModelInvalid { .. }));
    }

    #[test]
    fn rejects_empty_and_duplicate_models() {
        let mut empty = model();
        empty.centroids.clear();
        assert!(RegimeClassifier::new(empty).is_err());

        let mut dup = model();
        dup.centroids[1].label = "Calm".into();
        assert!(RegimeClassifier::new(dup).is_err());

        let mut nan = model();
        nan.centroids[0].means[0] = f64::NAN;
        assert!(RegimeClassifier::new(nan).is_err());
    }
}
