//! Ingest path: from queued raw measures to rewritten splits.
//!
//! A processing cycle is reentrant: every artefact it writes is a pure
//! function of the already committed artefacts plus the still-queued batch,
//! and the batch is only acked once everything is stored. A cycle that dies
//! anywhere in between is replayed wholesale by the next one.

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::aggregation::Aggregation;
use crate::errors::StorageError;
use crate::incoming::IncomingQueue;
use crate::indexer::Indexer;
use crate::policy::{ArchivePolicyItem, Metric};
use crate::series::aggregated::merge_points;
use crate::series::{AggregatedTimeSerie, BoundTimeSerie, serialize_split, unserialize_split};
use crate::time::{SplitKey, Timestamp, format_timestamp, round_timestamp};

use super::StorageEngine;

impl StorageEngine {
    /// Runs one synchronous processing cycle for the given metrics. Ids the
    /// indexer does not know are skipped and their queue entries kept for
    /// `expunge_metrics`; a metric that fails is logged and does not stop
    /// the others.
    pub fn process_background_tasks(
        &self,
        indexer: &dyn Indexer,
        incoming: &dyn IncomingQueue,
        metric_ids: &[Uuid],
    ) {
        for metric in indexer.list_metrics(Some(metric_ids)) {
            if let Err(err) = self.process_metric(incoming, &metric) {
                error!(metric = %metric.id, %err, "failed to process metric");
            }
        }
    }

    /// Processes everything currently queued for one metric.
    pub fn process_metric(
        &self,
        incoming: &dyn IncomingQueue,
        metric: &Metric,
    ) -> Result<(), StorageError> {
        let lock = self.locks.acquire(metric.id);
        let _guard = lock.lock();

        let mut batch = incoming.pending_measures(metric.id);
        if batch.is_empty() {
            return Ok(());
        }
        let batch_len = batch.len();
        batch.sort_by_key(|m| m.timestamp);

        let policy = &metric.archive_policy;
        let block_size = policy.max_block_size();
        let (mut bound, previous_oldest_mutable) = match self.store.get_unaggregated(metric.id)? {
            None => {
                debug!(metric = %metric.id, "no unaggregated state yet, starting fresh");
                (BoundTimeSerie::new(block_size, policy.back_window), None)
            }
            Some(blob) => {
                match BoundTimeSerie::unserialize(&blob, block_size, policy.back_window) {
                    Ok(serie) => {
                        let first_block = serie.first_block_timestamp();
                        (serie, first_block)
                    }
                    Err(err) => {
                        warn!(
                            metric = %metric.id, %err,
                            "unaggregated state is unreadable, rebuilding from stored splits"
                        );
                        (BoundTimeSerie::new(block_size, policy.back_window), None)
                    }
                }
            }
        };

        let batch_first = batch[0].timestamp;
        bound.set_values(&batch, |merged| {
            let Some(buffer_first) = merged.first() else {
                return Ok::<(), StorageError>(());
            };
            let Some(oldest_mutable) = merged.first_block_timestamp() else {
                return Ok::<(), StorageError>(());
            };
            // Everything from the oldest bucket a new point landed in up to
            // the end of the buffer gets resampled. Points older than the
            // buffer cannot be affected, they are immutable.
            let resample_from = buffer_first.max(batch_first);
            for item in &policy.items {
                let grouped = merged.group(
                    item.granularity,
                    round_timestamp(resample_from, item.granularity),
                );
                for &aggregation in &policy.aggregation_methods {
                    let serie =
                        AggregatedTimeSerie::from_grouped(&grouped, item.granularity, aggregation);
                    self.update_aggregates(
                        metric,
                        item,
                        &serie,
                        previous_oldest_mutable,
                        oldest_mutable,
                    )?;
                }
            }
            Ok(())
        })?;

        self.store.put_unaggregated(metric.id, &bound.serialize())?;
        incoming.finish_measures(metric.id, batch_len);
        debug!(
            metric = %metric.id,
            measures = batch_len,
            newest = %bound.last().map(format_timestamp).unwrap_or_default(),
            "processed measures"
        );
        Ok(())
    }

    /// Applies one freshly resampled series to the stored splits of its
    /// `(granularity, aggregation)` pair.
    fn update_aggregates(
        &self,
        metric: &Metric,
        item: &ArchivePolicyItem,
        serie: &AggregatedTimeSerie,
        previous_oldest_mutable: Option<Timestamp>,
        oldest_mutable: Timestamp,
    ) -> Result<(), StorageError> {
        let Some(last) = serie.last() else {
            return Ok(());
        };
        let points_per_split = self.config.points_per_split;
        let sampling = item.granularity;
        let aggregation = serie.aggregation();

        let mut existing = self
            .store
            .list_split_keys(metric.id, aggregation, sampling)?;

        // Retention works on whole splits: only keys strictly before the
        // split holding the oldest point to keep are dropped.
        let oldest_key_to_keep = SplitKey::of(last - item.timespan(), sampling, points_per_split);
        let expired: Vec<SplitKey> = existing.range(..oldest_key_to_keep).copied().collect();
        for key in expired {
            debug!(metric = %metric.id, %key, "deleting split past retention");
            self.store.delete_split(metric.id, aggregation, key)?;
            existing.remove(&key);
        }

        // Splits the advancing back window closed since the previous cycle
        // are rewritten once so they end up compressed, even when no new
        // point touches them.
        if !self.config.write_full
            && let Some(previous) = previous_oldest_mutable
        {
            let previous_key = SplitKey::of(previous, sampling, points_per_split);
            let current_key = SplitKey::of(oldest_mutable, sampling, points_per_split);
            if previous_key != current_key {
                let to_compact: Vec<SplitKey> =
                    existing.range(previous_key..current_key).copied().collect();
                for key in to_compact {
                    self.write_split(metric, aggregation, key, None, oldest_mutable)?;
                }
            }
        }

        for (key, points) in serie.split(points_per_split) {
            if key >= oldest_key_to_keep {
                self.write_split(metric, aggregation, key, Some(points), oldest_mutable)?;
            }
        }
        Ok(())
    }

    /// Read-merge-overwrite of one split. `new_points` is `None` for a pure
    /// compaction rewrite. An existing blob that fails to decode is treated
    /// as absent; its data is rebuilt from whatever still reaches this
    /// split.
    fn write_split(
        &self,
        metric: &Metric,
        aggregation: Aggregation,
        key: SplitKey,
        new_points: Option<Vec<(Timestamp, f64)>>,
        oldest_mutable: Timestamp,
    ) -> Result<(), StorageError> {
        let points_per_split = self.config.points_per_split;
        let compress =
            self.config.write_full || key.end(points_per_split) <= oldest_mutable;

        let existing = match self.store.get_split(metric.id, aggregation, key)? {
            Some(blob) => match unserialize_split(&blob, key, points_per_split) {
                Ok(points) => Some(points),
                Err(err) => {
                    warn!(metric = %metric.id, %key, %err, "stored split is unreadable, discarding");
                    None
                }
            },
            None => None,
        };

        let merged = match (existing, new_points) {
            // Compaction of a split that no longer holds readable data.
            (None, None) => return Ok(()),
            (Some(old), None) => old,
            (None, Some(new)) => new,
            (Some(old), Some(new)) => merge_points(old, new),
        };

        let blob = serialize_split(key, &merged, compress)?;
        self.store.put_split(metric.id, aggregation, key, &blob)?;
        Ok(())
    }
}
