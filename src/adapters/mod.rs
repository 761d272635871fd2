//! Concrete adapter implementations for ports.

pub mod centroid_model_adapter;
pub mod csv_adapter;
pub mod csv_report_adapter;
pub mod file_config_adapter;
pub mod memory_cache;
