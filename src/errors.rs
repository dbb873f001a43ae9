//! Errors surfaced by the storage engine.

use thiserror::Error;
use uuid::Uuid;

use crate::aggregation::Aggregation;
use crate::time::{Duration, format_duration};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("metric {0} does not exist")]
    MetricDoesNotExist(Uuid),

    #[error("aggregation method {0} is not enabled on the archive policy")]
    AggregationDoesNotExist(Aggregation),

    #[error("granularity {} does not exist on the archive policy", format_duration(*.0))]
    GranularityDoesNotExist(Duration),

    #[error("metrics cannot be aggregated together: {0}")]
    MetricUnaggregatable(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
