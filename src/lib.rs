//! strata - time-series metric storage engine.
//!
//! For each metric the engine ingests unordered, possibly late-arriving
//! samples and maintains pre-aggregated views at the granularities of the
//! metric's archive policy. Aggregates are stored as fixed-size, versioned,
//! LZ4-compressed "splits" keyed by time window; a bounded buffer of recent
//! raw points lets late samples rewrite aggregates inside the policy's back
//! window. Range queries and cross-metric reaggregation read the splits
//! directly and never block on ingest.

pub mod aggregation;
pub mod config;
pub mod engine;
pub mod errors;
pub mod incoming;
pub mod indexer;
pub mod policy;
pub mod query;
pub mod series;
pub mod store;
pub mod time;
pub mod worker;

pub use aggregation::Aggregation;
pub use config::{Config, EngineConfig};
pub use engine::{MeasureTuple, StorageEngine};
pub use errors::StorageError;
pub use incoming::{IncomingQueue, MeasuresReport, MemoryIncoming};
pub use indexer::{Indexer, IndexerError, MemoryIndexer};
pub use policy::{ArchivePolicy, ArchivePolicyItem, Metric};
pub use query::MeasureQuery;
pub use series::{AggregatedTimeSerie, BoundTimeSerie, Measure};
pub use store::{FileStore, MemoryStore, SplitStore, StoreConfig};
pub use time::{Duration, SplitKey, Timestamp};
pub use worker::{MetricLocks, WorkerPool};
