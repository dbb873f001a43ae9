//! Storage of split blobs and unaggregated state.
//!
//! The engine only ever talks to the `SplitStore` capability set; concrete
//! backends are picked at startup from configuration. Two drivers ship with
//! the crate: a directory-per-metric file store and an in-memory store.

pub mod file;
pub mod memory;

use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use crate::aggregation::Aggregation;
use crate::time::{Duration, SplitKey};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Key/value interface over split blobs, keyed by
/// `(metric, aggregation, sampling, window start)`, plus one unaggregated
/// blob per metric.
///
/// Contract:
/// - `put_*` overwrites atomically: a concurrent reader sees the old bytes or
///   the new bytes, never a mix, and no stale partial write survives a
///   successful overwrite of the same key;
/// - `get_*` returns `None` for an absent key;
/// - `delete_*` is idempotent, deleting an absent key succeeds.
///
/// Writer exclusion per metric is the processor's job, not the store's.
pub trait SplitStore: Send + Sync {
    fn put_split(
        &self,
        metric_id: Uuid,
        aggregation: Aggregation,
        key: SplitKey,
        data: &[u8],
    ) -> io::Result<()>;

    fn get_split(
        &self,
        metric_id: Uuid,
        aggregation: Aggregation,
        key: SplitKey,
    ) -> io::Result<Option<Vec<u8>>>;

    fn delete_split(&self, metric_id: Uuid, aggregation: Aggregation, key: SplitKey)
    -> io::Result<()>;

    /// Every split key currently stored for `(metric, aggregation, sampling)`.
    fn list_split_keys(
        &self,
        metric_id: Uuid,
        aggregation: Aggregation,
        sampling: Duration,
    ) -> io::Result<BTreeSet<SplitKey>>;

    fn put_unaggregated(&self, metric_id: Uuid, data: &[u8]) -> io::Result<()>;

    fn get_unaggregated(&self, metric_id: Uuid) -> io::Result<Option<Vec<u8>>>;

    /// Removes every key stored under the metric, unaggregated state
    /// included.
    fn delete_metric(&self, metric_id: Uuid) -> io::Result<()>;
}

/// Driver selection, deserialised from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum StoreConfig {
    File { path: PathBuf },
    Memory,
}

/// Opens the store named by the configuration.
pub fn open(config: &StoreConfig) -> io::Result<Arc<dyn SplitStore>> {
    Ok(match config {
        StoreConfig::File { path } => Arc::new(FileStore::open(path)?),
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
    })
}
