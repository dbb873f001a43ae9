//! Engine configuration.

use serde::Deserialize;

use crate::store::StoreConfig;

/// Tunables of the aggregation engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// When set, every split is compressed on every write instead of leaving
    /// the newest, still-mutable split uncompressed. Backends with cheap
    /// whole-object overwrites want this on.
    pub write_full: bool,
    /// Number of aggregated points per split. The default matches the stored
    /// data of existing deployments; tests shrink it to exercise split
    /// boundaries cheaply.
    pub points_per_split: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            write_full: false,
            points_per_split: crate::time::POINTS_PER_SPLIT,
        }
    }
}

/// Top-level configuration: where splits live and how the engine writes
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_json(document: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(document)
    }
}
