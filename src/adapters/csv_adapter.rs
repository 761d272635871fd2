//! CSV file data adapter.
//!
//! Reads from a data directory holding `composite_history.csv`
//! (`date,pxi_value,regime,returns`) and `metric_history.csv`
//! (`metric,date,value`). Sample batches are separate files loaded with
//! [`load_samples`].

use crate::domain::backtest::HistoryRow;
use crate::domain::error::PxiError;
use crate::domain::metric::{MetricId, MetricSample};
use crate::ports::history_port::{HistoryPort, MetricHistoryPort};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const COMPOSITE_HISTORY_FILE: &str = "composite_history.csv";
pub const METRIC_HISTORY_FILE: &str = "metric_history.csv";

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn read_file(&self, name: &str) -> Result<String, PxiError> {
        let path = self.base_path.join(name);
        fs::read_to_string(&path).map_err(|e| PxiError::Data {
            reason: format!("failed to read {}: {}", path.display(), e),
        })
    }

    /// Every metric's series keyed by id, each sorted by date.
    pub fn load_metric_history(&self) -> Result<BTreeMap<MetricId, Vec<f64>>, PxiError> {
        let content = self.read_file(METRIC_HISTORY_FILE)?;
        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut dated: BTreeMap<MetricId, Vec<(NaiveDate, f64)>> = BTreeMap::new();

        for result in rdr.records() {
            let record = result.map_err(csv_error)?;
            let id: MetricId = field(&record, 0, "metric")?
                .parse()
                .map_err(|e| data_error(format!("{e}")))?;
            let date = parse_date(field(&record, 1, "date")?)?;
            let value = parse_f64(field(&record, 2, "value")?, "value")?;
            dated.entry(id).or_default().push((date, value));
        }

        Ok(dated
            .into_iter()
            .map(|(id, mut points)| {
                points.sort_by_key(|(d, _)| *d);
                (id, points.into_iter().map(|(_, v)| v).collect())
            })
            .collect())
    }
}

impl HistoryPort for CsvAdapter {
    fn fetch_history(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<HistoryRow>, PxiError> {
        let content = self.read_file(COMPOSITE_HISTORY_FILE)?;
        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut rows = Vec::new();

        for result in rdr.records() {
            let record = result.map_err(csv_error)?;

            let date = parse_date(field(&record, 0, "date")?)?;
            if date < start_date || date > end_date {
                continue;
            }

            let pxi_value = parse_f64(field(&record, 1, "pxi_value")?, "pxi_value")?;
            let regime = record
                .get(2)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from);
            let actual_return = parse_f64(field(&record, 3, "returns")?, "returns")?;

            rows.push(HistoryRow {
                date,
                pxi_value,
                regime,
                actual_return,
            });
        }

        rows.sort_by_key(|r| r.date);
        Ok(rows)
    }
}

impl MetricHistoryPort for CsvAdapter {
    fn fetch_series(&self, id: MetricId) -> Result<Vec<f64>, PxiError> {
        Ok(self
            .load_metric_history()?
            .remove(&id)
            .unwrap_or_default())
    }

    fn list_metrics(&self) -> Result<Vec<MetricId>, PxiError> {
        Ok(self.load_metric_history()?.into_keys().collect())
    }

    fn fetch_all(&self) -> Result<BTreeMap<MetricId, Vec<f64>>, PxiError> {
        self.load_metric_history()
    }
}

/// Load a sample batch (`metric,label,value,unit,source_timestamp,ingested_at`).
///
/// Empty `label` or `unit` fall back to the metric's defaults; an empty
/// `ingested_at` uses the source timestamp.
pub fn load_samples(path: &Path) -> Result<Vec<MetricSample>, PxiError> {
    let content = fs::read_to_string(path).map_err(|e| PxiError::Data {
        reason: format!("failed to read {}: {}", path.display(), e),
    })?;
    let mut rdr = csv::Reader::from_reader(content.as_bytes());
    let mut samples = Vec::new();

    for result in rdr.records() {
        let record = result.map_err(csv_error)?;

        let id: MetricId = field(&record, 0, "metric")?
            .parse()
            .map_err(|e| data_error(format!("{e}")))?;
        let value = parse_f64(field(&record, 2, "value")?, "value")?;
        let source_timestamp = parse_timestamp(field(&record, 4, "source_timestamp")?)?;

        let mut sample = MetricSample::new(id, value, source_timestamp);
        if let Some(label) = record.get(1).map(str::trim).filter(|s| !s.is_empty()) {
            sample.label = label.to_string();
        }
        if let Some(unit) = record.get(3).map(str::trim).filter(|s| !s.is_empty()) {
            sample.unit = unit.to_string();
        }
        if let Some(ts) = record.get(5).map(str::trim).filter(|s| !s.is_empty()) {
            sample.ingested_at = parse_timestamp(ts)?;
        }
        samples.push(sample);
    }

    Ok(samples)
}

fn field<'r>(record: &'r csv::StringRecord, idx: usize, name: &str) -> Result<&'r str, PxiError> {
    record
        .get(idx)
        .map(str::trim)
        .ok_or_else(|| data_error(format!("missing {name} column")))
}

/// Non-numeric values are rejected. `NaN` and `inf` parse; the sample
/// validator, the sanity check and the backtest engine reject them downstream.
fn parse_f64(s: &str, name: &str) -> Result<f64, PxiError> {
    s.parse()
        .map_err(|e| data_error(format!("invalid {name} value '{s}': {e}")))
}

fn parse_date(s: &str) -> Result<NaiveDate, PxiError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| data_error(format!("invalid date '{s}': {e}")))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, PxiError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| data_error(format!("invalid timestamp '{s}': {e}")))
}

fn csv_error(e: csv::Error) -> PxiError {
    data_error(format!("CSV parse error: {e}"))
}

fn data_error(reason: String) -> PxiError {
    PxiError::Data { reason }
}
