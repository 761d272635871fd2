//! Performance metrics over a series of daily strategy returns.

use crate::domain::backtest_rule::Action;
use serde::Serialize;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const CALENDAR_DAYS_PER_YEAR: f64 = 365.0;

/// One simulated day as seen by the metrics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyReturn {
    pub action: Action,
    pub strategy_return: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub days: usize,
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub total_return: f64,
    pub cagr: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub avg_daily_return: f64,
}

impl PerformanceMetrics {
    /// `calendar_days` is the span the returns cover and drives annualization.
    pub fn compute(days: &[DailyReturn], calendar_days: i64) -> Self {
        let returns: Vec<f64> = days.iter().map(|d| d.strategy_return).collect();

        let equity = equity_curve(&returns);
        let total_return = equity.last().copied().unwrap_or(1.0) - 1.0;

        let trades = days.iter().filter(|d| d.action != Action::Neutral).count();
        let wins = days
            .iter()
            .filter(|d| d.action != Action::Neutral && d.strategy_return > 0.0)
            .count();
        let win_rate = if trades > 0 {
            wins as f64 / trades as f64
        } else {
            0.0
        };

        let avg_daily_return = if returns.is_empty() {
            0.0
        } else {
            returns.iter().sum::<f64>() / returns.len() as f64
        };

        PerformanceMetrics {
            days: days.len(),
            trades,
            wins,
            win_rate,
            total_return,
            cagr: cagr(total_return, calendar_days),
            sharpe: sharpe_ratio(&returns),
            max_drawdown: max_drawdown(&equity),
            avg_daily_return,
        }
    }
}

/// Compounded equity starting at 1.0; the result has one more point than
/// `returns`.
pub fn equity_curve(returns: &[f64]) -> Vec<f64> {
    let mut curve = Vec::with_capacity(returns.len() + 1);
    let mut equity = 1.0;
    curve.push(equity);
    for r in returns {
        equity *= 1.0 + r;
        curve.push(equity);
    }
    curve
}

pub fn cagr(total_return: f64, calendar_days: i64) -> f64 {
    if calendar_days <= 0 {
        return 0.0;
    }
    let growth = 1.0 + total_return;
    if growth <= 0.0 {
        return -1.0;
    }
    growth.powf(CALENDAR_DAYS_PER_YEAR / calendar_days as f64) - 1.0
}

/// Annualized mean over population standard deviation, risk-free rate 0.
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    if stddev > 0.0 {
        mean / stddev * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    }
}

/// Largest peak-to-trough decline as a fraction of the peak.
pub fn max_drawdown(equity: &[f64]) -> f64 {
    let Some(&first) = equity.first() else {
        return 0.0;
    };

    let mut peak = first;
    let mut max_dd = 0.0_f64;
    for &value in equity {
        if value > peak {
            peak = value;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - value) / peak);
        }
    }
    max_dd
}
