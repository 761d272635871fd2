//! CSV ledger report implementing ReportPort.
//!
//! One row per simulated day:
//! `date,pxi_value,regime,rule,action,market_return,strategy_return,equity`.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::PxiError;
use crate::ports::report_port::ReportPort;

const HEADER: [&str; 8] = [
    "date",
    "pxi_value",
    "regime",
    "rule",
    "action",
    "market_return",
    "strategy_return",
    "equity",
];

#[derive(Debug, Default)]
pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        Self
    }

    fn to_csv(result: &BacktestResult) -> Result<Vec<u8>, csv::Error> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(HEADER)?;
        for day in &result.days {
            wtr.write_record([
                day.date.format("%Y-%m-%d").to_string(),
                format!("{:.4}", day.pxi_value),
                day.regime.clone().unwrap_or_default(),
                day.rule.clone().unwrap_or_default(),
                day.action.to_string(),
                day.market_return.to_string(),
                day.strategy_return.to_string(),
                format!("{:.6}", day.equity),
            ])?;
        }
        wtr.flush()?;
        wtr.into_inner().map_err(|e| csv::Error::from(e.into_error()))
    }
}

impl ReportPort for CsvReportAdapter {
    fn write(&self, result: &BacktestResult, output_path: &str) -> Result<(), PxiError> {
        let bytes = Self::to_csv(result).map_err(|e| PxiError::Data {
            reason: format!("failed to encode ledger: {e}"),
        })?;
        std::fs::write(output_path, bytes)?;
        tracing::info!(path = output_path, days = result.days.len(), "ledger written");
        Ok(())
    }
}
