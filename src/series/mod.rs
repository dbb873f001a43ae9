//! Time series kept by the engine: the unaggregated bound buffer and the
//! per-granularity aggregated series, plus their wire codecs.

pub mod aggregated;
pub mod bound;
pub mod codec;

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

pub use aggregated::AggregatedTimeSerie;
pub use bound::BoundTimeSerie;
pub use codec::{InvalidData, is_compressed, serialize_split, unserialize_split};

/// One raw sample of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    pub timestamp: Timestamp,
    pub value: f64,
}

impl Measure {
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}
