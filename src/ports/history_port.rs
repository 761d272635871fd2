//! Persisted history access.

use crate::domain::backtest::HistoryRow;
use crate::domain::error::PxiError;
use crate::domain::metric::MetricId;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Composite readings with realized market returns, for backtesting.
pub trait HistoryPort {
    /// Rows dated within `[start_date, end_date]`, sorted by date.
    fn fetch_history(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<HistoryRow>, PxiError>;
}

/// Per-metric value series, oldest first, for sanity checks and z-scores.
pub trait MetricHistoryPort {
    fn fetch_series(&self, id: MetricId) -> Result<Vec<f64>, PxiError>;

    fn list_metrics(&self) -> Result<Vec<MetricId>, PxiError>;

    /// Every stored series keyed by metric.
    fn fetch_all(&self) -> Result<BTreeMap<MetricId, Vec<f64>>, PxiError> {
        self.list_metrics()?
            .into_iter()
            .map(|id| Ok((id, self.fetch_series(id)?)))
            .collect()
    }
}
