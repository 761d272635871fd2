//! Upstream indicator source.

use crate::domain::error::PxiError;
use crate::domain::metric::{MetricId, MetricSample};

/// One upstream feed producing samples for a single metric.
///
/// Implementations must be `Sync`; ingestion calls every fetcher from its
/// own thread.
pub trait FetcherPort: Sync {
    fn metric_id(&self) -> MetricId;

    fn fetch(&self) -> Result<MetricSample, PxiError>;
}
