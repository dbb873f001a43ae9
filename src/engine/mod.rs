//! The storage engine: orchestrates ingest into aggregated splits and
//! answers range queries over them.
//!
//! One engine instance wraps one split store. Metrics and archive policies
//! come from the indexer, raw measures from the incoming queue; the engine
//! owns everything in between.

mod process;


use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::aggregation::Aggregation;
use crate::config::{Config, EngineConfig};
use crate::errors::StorageError;
use crate::incoming::IncomingQueue;
use crate::indexer::Indexer;
use crate::policy::{ArchivePolicyItem, Metric};
use crate::query::MeasureQuery;
use crate::series::{AggregatedTimeSerie, BoundTimeSerie, unserialize_split};
use crate::store::{self, SplitStore};
use crate::time::{Duration, Timestamp, round_timestamp};
use crate::worker::MetricLocks;

/// One aggregated point as returned to callers.
pub type MeasureTuple = (Timestamp, Duration, f64);

pub struct StorageEngine {
    store: Arc<dyn SplitStore>,
    config: EngineConfig,
    locks: MetricLocks,
}

impl StorageEngine {
    pub fn new(store: Arc<dyn SplitStore>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            locks: MetricLocks::new(),
        }
    }

    /// Opens the configured store and builds an engine on top of it.
    pub fn from_config(config: &Config) -> io::Result<Self> {
        Ok(Self::new(store::open(&config.store)?, config.engine.clone()))
    }

    /// Aggregated measures of one metric, coarsest granularity first, then
    /// timestamps ascending.
    ///
    /// Bounds are inclusive; `from` is rounded down to each granularity so a
    /// range starting inside a bucket covers that bucket. `granularity`
    /// restricts the output to one policy item and must exist on the policy.
    /// `resample` re-buckets the aggregated series with the same aggregation
    /// method.
    pub fn get_measures(
        &self,
        metric: &Metric,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
        aggregation: Aggregation,
        granularity: Option<Duration>,
        resample: Option<Duration>,
    ) -> Result<Vec<MeasureTuple>, StorageError> {
        let policy = &metric.archive_policy;
        if !policy.aggregation_methods.contains(&aggregation) {
            return Err(StorageError::AggregationDoesNotExist(aggregation));
        }
        let items: Vec<&ArchivePolicyItem> = match granularity {
            Some(granularity) => match policy.item_for(granularity) {
                Some(item) => vec![item],
                // Resampling an absent granularity is not an error, there is
                // just nothing to resample.
                None if resample.is_some() => return Ok(Vec::new()),
                None => return Err(StorageError::GranularityDoesNotExist(granularity)),
            },
            None => policy.items_coarsest_first().collect(),
        };
        if let (Some(from), Some(to)) = (from, to)
            && from > to
        {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for item in items {
            let serie = self.fetch_series(metric, item, aggregation, from, to)?;
            let (granularity_out, points) = match resample {
                Some(resample) => (resample, serie.resample(resample).into_points()),
                None => (item.granularity, serie.into_points()),
            };
            out.extend(points.into_iter().map(|(ts, v)| (ts, granularity_out, v)));
        }
        Ok(out)
    }

    /// Reaggregates several metrics into one series per shared granularity.
    ///
    /// Only timestamps present in every metric's series contribute; a hole
    /// in one metric is a hole in the result. The metrics must share at
    /// least one granularity and all have `aggregation` enabled.
    pub fn get_cross_metric_measures(
        &self,
        metrics: &[Metric],
        from: Option<Timestamp>,
        to: Option<Timestamp>,
        aggregation: Aggregation,
        reaggregation: Aggregation,
        granularity: Option<Duration>,
    ) -> Result<Vec<MeasureTuple>, StorageError> {
        if metrics.is_empty() {
            return Ok(Vec::new());
        }
        for metric in metrics {
            if !metric.archive_policy.aggregation_methods.contains(&aggregation) {
                return Err(StorageError::AggregationDoesNotExist(aggregation));
            }
        }

        let mut shared: Vec<Duration> = metrics[0]
            .archive_policy
            .items_coarsest_first()
            .map(|item| item.granularity)
            .filter(|&g| {
                metrics[1..]
                    .iter()
                    .all(|m| m.archive_policy.item_for(g).is_some())
            })
            .collect();
        if let Some(granularity) = granularity {
            if !shared.contains(&granularity) {
                return Err(StorageError::GranularityDoesNotExist(granularity));
            }
            shared = vec![granularity];
        } else if shared.is_empty() {
            let ids: Vec<String> = metrics.iter().map(|m| m.id.to_string()).collect();
            return Err(StorageError::MetricUnaggregatable(format!(
                "no granularity shared by {}",
                ids.join(", ")
            )));
        }
        if let (Some(from), Some(to)) = (from, to)
            && from > to
        {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for granularity in shared {
            let mut series: Vec<BTreeMap<Timestamp, f64>> = Vec::with_capacity(metrics.len());
            for metric in metrics {
                let Some(item) = metric.archive_policy.item_for(granularity) else {
                    // Unreachable given the intersection above; skip the
                    // granularity entirely rather than mis-reaggregate.
                    series.clear();
                    break;
                };
                series.push(
                    self.fetch_series(metric, item, aggregation, from, to)?
                        .into_points()
                        .into_iter()
                        .collect(),
                );
            }
            if series.len() != metrics.len() {
                continue;
            }
            let Some((first, rest)) = series.split_first() else {
                continue;
            };
            'timestamps: for (&ts, &first_value) in first {
                // Unlike single-metric reads the upper bound is exclusive
                // here: a bucket starting exactly on `to` is not
                // reaggregated.
                if to.is_some_and(|to| ts >= to) {
                    continue;
                }
                let mut values = Vec::with_capacity(metrics.len());
                values.push(first_value);
                for other in rest {
                    match other.get(&ts) {
                        Some(&value) => values.push(value),
                        None => continue 'timestamps,
                    }
                }
                if let Some(value) = reaggregation.apply(&values) {
                    out.push((ts, granularity, value));
                }
            }
        }
        Ok(out)
    }

    /// Per-metric subset of `get_measures` whose mean value satisfies the
    /// query.
    pub fn search_value(
        &self,
        metrics: &[Metric],
        query: &MeasureQuery,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> Result<HashMap<Uuid, Vec<MeasureTuple>>, StorageError> {
        let mut out = HashMap::with_capacity(metrics.len());
        for metric in metrics {
            let measures = self.get_measures(metric, from, to, Aggregation::Mean, None, None)?;
            out.insert(
                metric.id,
                measures
                    .into_iter()
                    .filter(|(_, _, value)| query.matches(*value))
                    .collect(),
            );
        }
        Ok(out)
    }

    /// The stored unaggregated state of a metric. Diagnostic surface;
    /// processing goes through its own load path with corruption recovery.
    pub fn fetch_unaggregated(&self, metric: &Metric) -> Result<BoundTimeSerie, StorageError> {
        let policy = &metric.archive_policy;
        let blob = self
            .store
            .get_unaggregated(metric.id)?
            .ok_or(StorageError::MetricDoesNotExist(metric.id))?;
        BoundTimeSerie::unserialize(&blob, policy.max_block_size(), policy.back_window)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()).into())
    }

    /// Removes every stored artefact of the metric. Queue entries are left
    /// alone so `expunge_metrics` can account for them explicitly.
    pub fn delete_metric(&self, metric_id: Uuid) -> Result<(), StorageError> {
        let lock = self.locks.acquire(metric_id);
        let _guard = lock.lock();
        self.store.delete_metric(metric_id)?;
        Ok(())
    }

    /// Drops queued measures of metrics the indexer no longer knows.
    pub fn expunge_metrics(&self, incoming: &dyn IncomingQueue, indexer: &dyn Indexer) {
        for metric_id in incoming.list_metrics_with_pending() {
            if indexer.list_metrics(Some(&[metric_id])).is_empty() {
                incoming.purge_metric(metric_id);
            }
        }
    }

    /// Rebuilds the aggregated series of one policy item from its stored
    /// splits, clipped to `[from, to]` and truncated to the item's point
    /// budget.
    fn fetch_series(
        &self,
        metric: &Metric,
        item: &ArchivePolicyItem,
        aggregation: Aggregation,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> Result<AggregatedTimeSerie, StorageError> {
        let sampling = item.granularity;
        let points_per_split = self.config.points_per_split;
        let low = from.map(|from| round_timestamp(from, sampling));

        let mut points = Vec::new();
        for key in self.store.list_split_keys(metric.id, aggregation, sampling)? {
            if low.is_some_and(|low| key.end(points_per_split) <= low)
                || to.is_some_and(|to| key.timestamp > to)
            {
                continue;
            }
            let Some(blob) = self.store.get_split(metric.id, aggregation, key)? else {
                continue;
            };
            match unserialize_split(&blob, key, points_per_split) {
                Ok(split_points) => points.extend(split_points),
                Err(err) => {
                    warn!(metric = %metric.id, %key, %err, "stored split is unreadable, ignoring");
                }
            }
        }

        let mut serie = AggregatedTimeSerie::from_points(sampling, aggregation, points);
        serie.truncate_to(item.points as usize);
        serie.clip(from, to);
        Ok(serie)
    }
}
