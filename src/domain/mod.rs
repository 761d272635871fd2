//! Core domain types and logic.

pub mod metric;
pub mod validator;
pub mod sanity;
pub mod staleness;
pub mod scoring;
pub mod regime;
pub mod backtest_rule;
pub mod backtest;
pub mod performance;
pub mod ingestion;
pub mod config_validation;
pub mod error;
