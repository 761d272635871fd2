//! Metric identifiers, samples, and static definitions.
//!
//! Every lookup keyed by metric (hard ranges, default weights, bounds) is an
//! exhaustive `match` over [`MetricId`], so an unknown id cannot reach the
//! scoring pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricId {
    HySpread,
    IgSpread,
    Vix,
    Unemployment,
    Dxy,
    Nfci,
    BtcReturn,
    YieldCurve,
    StlFsi,
    Breakeven,
}

impl MetricId {
    pub const ALL: [MetricId; 10] = [
        MetricId::HySpread,
        MetricId::IgSpread,
        MetricId::Vix,
        MetricId::Unemployment,
        MetricId::Dxy,
        MetricId::Nfci,
        MetricId::BtcReturn,
        MetricId::YieldCurve,
        MetricId::StlFsi,
        MetricId::Breakeven,
    ];

    /// Metrics that make up the default composite.
    pub const CORE: [MetricId; 7] = [
        MetricId::HySpread,
        MetricId::IgSpread,
        MetricId::Vix,
        MetricId::Unemployment,
        MetricId::Dxy,
        MetricId::Nfci,
        MetricId::BtcReturn,
    ];

    pub fn key(self) -> &'static str {
        match self {
            MetricId::HySpread => "hy_spread",
            MetricId::IgSpread => "ig_spread",
            MetricId::Vix => "vix",
            MetricId::Unemployment => "unemployment",
            MetricId::Dxy => "dxy",
            MetricId::Nfci => "nfci",
            MetricId::BtcReturn => "btc_return",
            MetricId::YieldCurve => "yield_curve",
            MetricId::StlFsi => "stl_fsi",
            MetricId::Breakeven => "breakeven",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MetricId::HySpread => "HY OAS",
            MetricId::IgSpread => "IG OAS",
            MetricId::Vix => "VIX",
            MetricId::Unemployment => "Unemployment Rate",
            MetricId::Dxy => "USD Index",
            MetricId::Nfci => "NFCI",
            MetricId::BtcReturn => "BTC Daily Return",
            MetricId::YieldCurve => "10Y-2Y Spread",
            MetricId::StlFsi => "STL Financial Stress",
            MetricId::Breakeven => "10Y Breakeven",
        }
    }

    pub fn is_optional(self) -> bool {
        matches!(
            self,
            MetricId::YieldCurve | MetricId::StlFsi | MetricId::Breakeven
        )
    }

    /// Inclusive sanity range for a raw observation.
    pub fn hard_range(self) -> HardRange {
        let (min, max) = match self {
            MetricId::HySpread => (0.0, 0.25),
            MetricId::IgSpread => (0.0, 0.10),
            MetricId::Vix => (5.0, 120.0),
            MetricId::Unemployment => (0.02, 0.25),
            MetricId::Dxy => (70.0, 130.0),
            MetricId::Nfci => (-2.0, 5.0),
            MetricId::BtcReturn => (-0.5, 0.5),
            MetricId::YieldCurve => (-2.0, 4.0),
            MetricId::StlFsi => (-2.0, 3.0),
            MetricId::Breakeven => (0.0, 0.05),
        };
        HardRange { min, max }
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown metric id: {0}")]
pub struct UnknownMetric(pub String);

impl FromStr for MetricId {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        MetricId::ALL
            .into_iter()
            .find(|id| id.key() == key)
            .ok_or_else(|| UnknownMetric(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HardRange {
    pub min: f64,
    pub max: f64,
}

impl HardRange {
    /// NaN never satisfies the range.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Hard ranges that the validator enforces. Ids without an entry pass
/// validation with a warning.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeTable {
    ranges: HashMap<MetricId, HardRange>,
}

impl RangeTable {
    pub fn empty() -> Self {
        Self {
            ranges: HashMap::new(),
        }
    }

    /// Core metrics only; optional ids stay unchecked until enabled.
    pub fn core() -> Self {
        let mut table = Self::empty();
        for id in MetricId::CORE {
            table.set(id, id.hard_range());
        }
        table
    }

    pub fn with_optional(mut self) -> Self {
        for id in MetricId::ALL.into_iter().filter(|id| id.is_optional()) {
            self.set(id, id.hard_range());
        }
        self
    }

    pub fn set(&mut self, id: MetricId, range: HardRange) {
        self.ranges.insert(id, range);
    }

    pub fn get(&self, id: MetricId) -> Option<HardRange> {
        self.ranges.get(&id).copied()
    }
}

impl Default for RangeTable {
    fn default() -> Self {
        Self::core()
    }
}

/// One observation of one indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub id: MetricId,
    pub label: String,
    pub value: f64,
    pub unit: String,
    pub source_timestamp: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl MetricSample {
    pub fn new(id: MetricId, value: f64, source_timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            label: id.label().to_string(),
            value,
            unit: default_unit(id).to_string(),
            source_timestamp,
            ingested_at: source_timestamp,
            metadata: BTreeMap::new(),
        }
    }
}

fn default_unit(id: MetricId) -> &'static str {
    match id {
        MetricId::HySpread
        | MetricId::IgSpread
        | MetricId::Unemployment
        | MetricId::BtcReturn
        | MetricId::Breakeven => "ratio",
        MetricId::Vix | MetricId::Dxy | MetricId::Nfci | MetricId::StlFsi => "index",
        MetricId::YieldCurve => "pct",
    }
}

/// Direction in which a raw increase moves systemic stress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    /// A raw increase means more stress.
    Positive,
    /// A raw increase means less stress.
    Negative,
}

impl FromStr for Polarity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "positive" => Ok(Polarity::Positive),
            "negative" => Ok(Polarity::Negative),
            other => Err(format!("unknown polarity '{other}'")),
        }
    }
}

/// Static configuration of a metric's role in the composite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDefinition {
    pub id: MetricId,
    pub label: String,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub weight: f64,
    pub polarity: Polarity,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DefinitionError {
    #[error("{0}: lower_bound must be below upper_bound")]
    Bounds(MetricId),
    #[error("{0}: weight must be positive and finite")]
    Weight(MetricId),
}

impl MetricDefinition {
    pub fn new(
        id: MetricId,
        lower_bound: f64,
        upper_bound: f64,
        weight: f64,
        polarity: Polarity,
    ) -> Result<Self, DefinitionError> {
        if !(lower_bound < upper_bound) {
            return Err(DefinitionError::Bounds(id));
        }
        if !(weight > 0.0 && weight.is_finite()) {
            return Err(DefinitionError::Weight(id));
        }
        Ok(Self {
            id,
            label: id.label().to_string(),
            lower_bound,
            upper_bound,
            weight,
            polarity,
        })
    }

    pub fn default_for(id: MetricId) -> Self {
        let (lower_bound, upper_bound, weight, polarity) = match id {
            MetricId::HySpread => (0.025, 0.10, 1.5, Polarity::Positive),
            MetricId::IgSpread => (0.005, 0.03, 1.0, Polarity::Positive),
            MetricId::Vix => (10.0, 40.0, 1.5, Polarity::Positive),
            MetricId::Unemployment => (0.03, 0.10, 1.0, Polarity::Positive),
            MetricId::Dxy => (90.0, 115.0, 0.8, Polarity::Positive),
            MetricId::Nfci => (-1.0, 1.0, 1.2, Polarity::Positive),
            MetricId::BtcReturn => (-0.10, 0.10, 0.5, Polarity::Negative),
            MetricId::YieldCurve => (-1.0, 3.0, 0.8, Polarity::Negative),
            MetricId::StlFsi => (-1.5, 2.0, 1.0, Polarity::Positive),
            MetricId::Breakeven => (0.01, 0.035, 0.5, Polarity::Positive),
        };
        Self {
            id,
            label: id.label().to_string(),
            lower_bound,
            upper_bound,
            weight,
            polarity,
        }
    }

    /// Default definitions for the core metric set, in `MetricId` order.
    pub fn defaults() -> Vec<Self> {
        MetricId::CORE.into_iter().map(Self::default_for).collect()
    }

    /// Position of `value` between the display bounds, clamped to [0, 1].
    pub fn normalize(&self, value: f64) -> f64 {
        ((value - self.lower_bound) / (self.upper_bound - self.lower_bound)).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_id_round_trips_through_key() {
        for id in MetricId::ALL {
            assert_eq!(id.key().parse::<MetricId>().unwrap(), id);
        }
    }

    #[test]
    fn metric_id_parse_is_case_insensitive() {
        assert_eq!("HY_SPREAD".parse::<MetricId>().unwrap(), MetricId::HySpread);
        assert_eq!(" vix ".parse::<MetricId>().unwrap(), MetricId::Vix);
    }

    #[test]
    fn unknown_metric_id_is_rejected() {
        let err = "gold".parse::<MetricId>().unwrap_err();
        assert_eq!(err, UnknownMetric("gold".into()));
    }

    #[test]
    fn hard_range_is_inclusive_and_rejects_nan() {
        let range = MetricId::Vix.hard_range();
        assert!(range.contains(5.0));
        assert!(range.contains(120.0));
        assert!(!range.contains(4.99));
        assert!(!range.contains(f64::NAN));
    }

    #[test]
    fn core_table_leaves_optional_ids_unchecked() {
        let table = RangeTable::core();
        assert!(table.get(MetricId::HySpread).is_some());
        assert!(table.get(MetricId::YieldCurve).is_none());

        let table = table.with_optional();
        assert_eq!(
            table.get(MetricId::Breakeven),
            Some(HardRange { min: 0.0, max: 0.05 })
        );
    }

    #[test]
    fn definition_rejects_inverted_bounds() {
        let err = MetricDefinition::new(MetricId::Vix, 40.0, 10.0, 1.0, Polarity::Positive)
            .unwrap_err();
        assert_eq!(err, DefinitionError::Bounds(MetricId::Vix));
    }

    #[test]
    fn definition_rejects_non_positive_weight() {
        let err =
            MetricDefinition::new(MetricId::Vix, 10.0, 40.0, 0.0, Polarity::Positive).unwrap_err();
        assert_eq!(err, DefinitionError::Weight(MetricId::Vix));
    }

    #[test]
    fn defaults_cover_core_metrics_with_valid_bounds() {
        let defs = MetricDefinition::defaults();
        assert_eq!(defs.len(), MetricId::CORE.len());
        for def in defs {
            assert!(def.lower_bound < def.upper_bound);
            assert!(def.weight > 0.0);
        }
    }

    #[test]
    fn normalize_clamps_to_unit_interval() {
        let def = MetricDefinition::default_for(MetricId::Vix);
        assert!((def.normalize(25.0) - 0.5).abs() < 1e-12);
        assert_eq!(def.normalize(5.0), 0.0);
        assert_eq!(def.normalize(80.0), 1.0);
    }

    #[test]
    fn polarity_parses() {
        assert_eq!("Positive".parse::<Polarity>().unwrap(), Polarity::Positive);
        assert!("sideways".parse::<Polarity>().is_err());
    }
}
