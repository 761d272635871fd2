#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use pxi::domain::backtest::HistoryRow;
use pxi::domain::error::PxiError;
use pxi::domain::metric::{MetricId, MetricSample};
use pxi::ports::fetcher_port::FetcherPort;
use pxi::ports::history_port::{HistoryPort, MetricHistoryPort};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

pub struct MockHistoryPort {
    pub rows: Vec<HistoryRow>,
    pub error: Option<String>,
}

impl MockHistoryPort {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            error: None,
        }
    }

    pub fn with_rows(mut self, rows: Vec<HistoryRow>) -> Self {
        self.rows.extend(rows);
        self
    }

    pub fn with_error(mut self, reason: &str) -> Self {
        self.error = Some(reason.to_string());
        self
    }
}

impl HistoryPort for MockHistoryPort {
    fn fetch_history(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<HistoryRow>, PxiError> {
        if let Some(reason) = &self.error {
            return Err(PxiError::Data {
                reason: reason.clone(),
            });
        }
        Ok(self
            .rows
            .iter()
            .filter(|r| r.date >= start_date && r.date <= end_date)
            .cloned()
            .collect())
    }
}

pub struct MockMetricHistory {
    pub series: BTreeMap<MetricId, Vec<f64>>,
}

impl MockMetricHistory {
    pub fn new(series: BTreeMap<MetricId, Vec<f64>>) -> Self {
        Self { series }
    }
}

impl MetricHistoryPort for MockMetricHistory {
    fn fetch_series(&self, id: MetricId) -> Result<Vec<f64>, PxiError> {
        Ok(self.series.get(&id).cloned().unwrap_or_default())
    }

    fn list_metrics(&self) -> Result<Vec<MetricId>, PxiError> {
        Ok(self.series.keys().copied().collect())
    }
}

/// Fetcher that fails a fixed number of times before returning its sample.
pub struct ScriptedFetcher {
    pub sample: MetricSample,
    pub failures: u32,
    pub calls: AtomicU32,
}

impl ScriptedFetcher {
    pub fn new(sample: MetricSample, failures: u32) -> Self {
        Self {
            sample,
            failures,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FetcherPort for ScriptedFetcher {
    fn metric_id(&self) -> MetricId {
        self.sample.id
    }

    fn fetch(&self) -> Result<MetricSample, PxiError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(PxiError::Data {
                reason: format!("{} feed unavailable", self.sample.id),
            });
        }
        Ok(self.sample.clone())
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

/// Typical reading and a small step size for each core metric.
pub fn baseline(id: MetricId) -> (f64, f64) {
    match id {
        MetricId::HySpread => (0.040, 0.002),
        MetricId::IgSpread => (0.012, 0.001),
        MetricId::Vix => (18.0, 1.0),
        MetricId::Unemployment => (0.040, 0.001),
        MetricId::Dxy => (102.0, 0.5),
        MetricId::Nfci => (-0.30, 0.05),
        MetricId::BtcReturn => (0.001, 0.01),
        MetricId::YieldCurve => (0.5, 0.1),
        MetricId::StlFsi => (-0.5, 0.1),
        MetricId::Breakeven => (0.022, 0.001),
    }
}

/// Twenty points oscillating around each core metric's baseline.
pub fn calm_history() -> BTreeMap<MetricId, Vec<f64>> {
    MetricId::CORE
        .into_iter()
        .map(|id| {
            let (center, step) = baseline(id);
            let series = (0..20)
                .map(|i| center + if i % 2 == 0 { step } else { -step })
                .collect();
            (id, series)
        })
        .collect()
}

/// One sample per core metric at `center + sigmas * step`.
pub fn samples_at(sigmas: f64, ts: DateTime<Utc>) -> Vec<MetricSample> {
    MetricId::CORE
        .into_iter()
        .map(|id| {
            let (center, step) = baseline(id);
            MetricSample::new(id, center + sigmas * step, ts)
        })
        .collect()
}

pub fn history_row(d: u32, pxi: f64, regime: Option<&str>, ret: f64) -> HistoryRow {
    HistoryRow {
        date: date(2024, 1, d),
        pxi_value: pxi,
        regime: regime.map(String::from),
        actual_return: ret,
    }
}
