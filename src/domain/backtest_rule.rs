//! Backtest rule model and first-match dispatch.
//!
//! Rules are evaluated in declared order; the first rule whose condition
//! holds decides the day's action. Days no rule matches are `Neutral`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Long,
    Short,
    Neutral,
}

impl Action {
    /// Strategy return for a day given the market's return.
    pub fn apply(self, market_return: f64) -> f64 {
        match self {
            Action::Long => market_return,
            Action::Short => -market_return,
            Action::Neutral => 0.0,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Long => "long",
            Action::Short => "short",
            Action::Neutral => "neutral",
        };
        f.write_str(s)
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "long" => Ok(Action::Long),
            "short" => Ok(Action::Short),
            "neutral" => Ok(Action::Neutral),
            other => Err(format!("unknown action '{other}'")),
        }
    }
}

/// Conjunction of bounds on the composite value. Unset bounds always hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PxiComparison {
    pub gt: Option<f64>,
    pub gte: Option<f64>,
    pub lt: Option<f64>,
    pub lte: Option<f64>,
}

impl PxiComparison {
    pub fn matches(&self, pxi: f64) -> bool {
        self.gt.is_none_or(|b| pxi > b)
            && self.gte.is_none_or(|b| pxi >= b)
            && self.lt.is_none_or(|b| pxi < b)
            && self.lte.is_none_or(|b| pxi <= b)
    }

    /// First bound that is NaN or infinite, with its config key.
    pub fn non_finite_bound(&self) -> Option<(&'static str, f64)> {
        [
            ("pxi_gt", self.gt),
            ("pxi_gte", self.gte),
            ("pxi_lt", self.lt),
            ("pxi_lte", self.lte),
        ]
        .into_iter()
        .find_map(|(key, b)| b.filter(|v| !v.is_finite()).map(|v| (key, v)))
    }

    /// Returns false when no value could satisfy both the lower and upper bounds.
    pub fn is_satisfiable(&self) -> bool {
        let lower = self.gt.into_iter().chain(self.gte).fold(f64::NEG_INFINITY, f64::max);
        let upper = self.lt.into_iter().chain(self.lte).fold(f64::INFINITY, f64::min);
        if lower < upper {
            return true;
        }
        lower == upper && self.gt.is_none_or(|b| b < lower) && self.lt.is_none_or(|b| b > upper)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub pxi: PxiComparison,
    /// Allow-list of regime labels. `None` accepts any regime, including none.
    pub regimes: Option<Vec<String>>,
}

impl RuleCondition {
    pub fn matches(&self, pxi: f64, regime: Option<&str>) -> bool {
        if !self.pxi.matches(pxi) {
            return false;
        }
        match (&self.regimes, regime) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(allowed), Some(r)) => allowed.iter().any(|a| a.eq_ignore_ascii_case(r)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRule {
    pub name: String,
    pub when: RuleCondition,
    pub action: Action,
}

impl fmt::Display for BacktestRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut clauses = Vec::new();
        let p = &self.when.pxi;
        if let Some(b) = p.gt {
            clauses.push(format!("pxi > {b}"));
        }
        if let Some(b) = p.gte {
            clauses.push(format!("pxi >= {b}"));
        }
        if let Some(b) = p.lt {
            clauses.push(format!("pxi < {b}"));
        }
        if let Some(b) = p.lte {
            clauses.push(format!("pxi <= {b}"));
        }
        if let Some(ref regimes) = self.when.regimes {
            clauses.push(format!("regime in [{}]", regimes.join(", ")));
        }
        let when = if clauses.is_empty() {
            "always".to_string()
        } else {
            clauses.join(" AND ")
        };
        write!(f, "{}: {} -> {}", self.name, when, self.action)
    }
}

/// First rule whose condition holds, if any.
pub fn first_match<'a>(
    rules: &'a [BacktestRule],
    pxi: f64,
    regime: Option<&str>,
) -> Option<&'a BacktestRule> {
    rules.iter().find(|r| r.when.matches(pxi, regime))
}

pub fn select_action(rules: &[BacktestRule], pxi: f64, regime: Option<&str>) -> Action {
    first_match(rules, pxi, regime).map_or(Action::Neutral, |r| r.action)
}
