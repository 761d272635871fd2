//! Port traits the core depends on. Adapters implement them.

pub mod cache_port;
pub mod config_port;
pub mod fetcher_port;
pub mod history_port;
pub mod report_port;
