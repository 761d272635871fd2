//! Backtest engine.
//!
//! Replays persisted composite history through an ordered rule set. Each day
//! takes the action of the first matching rule and earns the market return
//! with the action's sign. Metrics are computed for the whole run and per
//! regime label.

use crate::domain::backtest_rule::{first_match, Action, BacktestRule};
use crate::domain::error::PxiError;
use crate::domain::performance::{DailyReturn, PerformanceMetrics};
use crate::ports::history_port::HistoryPort;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Breakdown key for days without a regime label.
pub const UNCLASSIFIED_REGIME: &str = "Unclassified";

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub rules: Vec<BacktestRule>,
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), PxiError> {
        if self.start_date >= self.end_date {
            return Err(PxiError::config_invalid(
                "backtest",
                "start_date",
                "start_date must be before end_date",
            ));
        }
        if !(self.initial_capital > 0.0 && self.initial_capital.is_finite()) {
            return Err(PxiError::config_invalid(
                "backtest",
                "initial_capital",
                "initial_capital must be positive",
            ));
        }

        let mut names = HashSet::new();
        for rule in &self.rules {
            if rule.name.trim().is_empty() {
                return Err(PxiError::config_invalid(
                    "backtest",
                    "rules",
                    "rule names must not be empty",
                ));
            }
            if !names.insert(rule.name.as_str()) {
                return Err(PxiError::config_invalid(
                    "backtest",
                    "rules",
                    format!("duplicate rule {}", rule.name),
                ));
            }
            if let Some((key, value)) = rule.when.pxi.non_finite_bound() {
                return Err(PxiError::config_invalid(
                    &format!("rule.{}", rule.name),
                    key,
                    format!("{key} must be finite, got {value}"),
                ));
            }
            if !rule.when.pxi.is_satisfiable() {
                return Err(PxiError::config_invalid(
                    &format!("rule.{}", rule.name),
                    "pxi",
                    "pxi bounds can never be satisfied",
                ));
            }
        }
        Ok(())
    }
}

/// One persisted composite reading with the market's return for that day.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub date: NaiveDate,
    pub pxi_value: f64,
    pub regime: Option<String>,
    pub actual_return: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub pxi_value: f64,
    pub regime: Option<String>,
    pub rule: Option<String>,
    pub action: Action,
    pub market_return: f64,
    pub strategy_return: f64,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub final_capital: f64,
    #[serde(flatten)]
    pub summary: PerformanceMetrics,
    pub regime_breakdown: BTreeMap<String, PerformanceMetrics>,
    pub days: Vec<DailyRecord>,
}

pub fn run_backtest(
    history: &dyn HistoryPort,
    config: &BacktestConfig,
) -> Result<BacktestResult, PxiError> {
    config.validate()?;
    let rows = history.fetch_history(config.start_date, config.end_date)?;
    simulate(rows, config)
}

/// Run the rule set over `rows`. Rows outside the configured window are
/// ignored; an empty window or a non-finite value inside it is an error.
pub fn simulate(
    mut rows: Vec<HistoryRow>,
    config: &BacktestConfig,
) -> Result<BacktestResult, PxiError> {
    rows.retain(|r| r.date >= config.start_date && r.date <= config.end_date);
    rows.sort_by_key(|r| r.date);
    for row in &rows {
        check_finite(row)?;
    }

    let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
        return Err(PxiError::BacktestData {
            start: config.start_date,
            end: config.end_date,
        });
    };
    let (start_date, end_date) = (first.date, last.date);

    let mut days = Vec::with_capacity(rows.len());
    let mut equity = config.initial_capital;

    for row in rows {
        let matched = first_match(&config.rules, row.pxi_value, row.regime.as_deref());
        let action = matched.map_or(Action::Neutral, |r| r.action);
        let strategy_return = action.apply(row.actual_return);
        equity *= 1.0 + strategy_return;

        days.push(DailyRecord {
            date: row.date,
            pxi_value: row.pxi_value,
            regime: row.regime,
            rule: matched.map(|r| r.name.clone()),
            action,
            market_return: row.actual_return,
            strategy_return,
            equity,
        });
    }

    let summary = PerformanceMetrics::compute(&daily_returns(&days), span_days(&days));

    let mut by_regime: BTreeMap<String, Vec<&DailyRecord>> = BTreeMap::new();
    for d in &days {
        let key = d.regime.as_deref().unwrap_or(UNCLASSIFIED_REGIME).to_string();
        by_regime.entry(key).or_default().push(d);
    }
    let regime_breakdown = by_regime
        .into_iter()
        .map(|(label, group)| {
            let returns: Vec<DailyReturn> = group.iter().map(|d| daily_return(d)).collect();
            let span = (group[group.len() - 1].date - group[0].date).num_days() + 1;
            (label, PerformanceMetrics::compute(&returns, span))
        })
        .collect();

    tracing::info!(
        days = summary.days,
        trades = summary.trades,
        total_return = summary.total_return,
        max_drawdown = summary.max_drawdown,
        "backtest complete"
    );

    Ok(BacktestResult {
        start_date,
        end_date,
        initial_capital: config.initial_capital,
        final_capital: equity,
        summary,
        regime_breakdown,
        days,
    })
}

fn check_finite(row: &HistoryRow) -> Result<(), PxiError> {
    for (column, value) in [("pxi_value", row.pxi_value), ("returns", row.actual_return)] {
        if !value.is_finite() {
            return Err(PxiError::Data {
                reason: format!("{column} on {} is not finite: {value}", row.date),
            });
        }
    }
    Ok(())
}

fn daily_return(d: &DailyRecord) -> DailyReturn {
    DailyReturn {
        action: d.action,
        strategy_return: d.strategy_return,
    }
}

fn daily_returns(days: &[DailyRecord]) -> Vec<DailyReturn> {
    days.iter().map(daily_return).collect()
}

/// Calendar days from the first to the last record, inclusive.
fn span_days(days: &[DailyRecord]) -> i64 {
    match (days.first(), days.last()) {
        (Some(a), Some(b)) => (b.date - a.date).num_days() + 1,
        _ => 0,
    }
}
