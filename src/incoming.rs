//! Incoming measure queue: the buffer between producers and the processing
//! workers, and the durability boundary for raw measures.
//!
//! Measures stay queued until a processing cycle completes; a cycle that
//! dies mid-flight leaves its batch in place and the next run replays it
//! (at-least-once, made safe by the engine's idempotent rewrites).

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::series::Measure;

/// Backlog summary: how many metrics have pending measures and how many
/// measures are waiting overall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub metrics: usize,
    pub measures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeasuresReport {
    pub summary: ReportSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, usize>>,
}

/// Capability set of an incoming queue.
pub trait IncomingQueue: Send + Sync {
    fn add_measures(&self, metric_id: Uuid, measures: &[Measure]);

    /// Snapshot of the queued measures for a metric, oldest first. Does not
    /// consume anything; the caller acks with `finish_measures` once the
    /// batch is fully processed.
    fn pending_measures(&self, metric_id: Uuid) -> Vec<Measure>;

    /// Drops the first `count` queued measures of the metric, the batch a
    /// completed processing cycle started from. Measures queued after the
    /// snapshot stay pending.
    fn finish_measures(&self, metric_id: Uuid, count: usize);

    /// Drops everything queued for the metric. Used when expunging metrics
    /// that no longer exist in the indexer.
    fn purge_metric(&self, metric_id: Uuid);

    fn list_metrics_with_pending(&self) -> Vec<Uuid>;

    /// `(metrics, measures, per-metric counts when details requested)`.
    fn build_report(&self, details: bool) -> (usize, usize, Option<HashMap<Uuid, usize>>);

    fn measures_report(&self, details: bool) -> MeasuresReport {
        let (metrics, measures, per_metric) = self.build_report(details);
        MeasuresReport {
            summary: ReportSummary { metrics, measures },
            details: per_metric.map(|counts| {
                counts
                    .into_iter()
                    .map(|(id, count)| (id.to_string(), count))
                    .collect()
            }),
        }
    }
}

/// Queue held in process memory.
#[derive(Default)]
pub struct MemoryIncoming {
    pending: Mutex<HashMap<Uuid, Vec<Measure>>>,
}

impl MemoryIncoming {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IncomingQueue for MemoryIncoming {
    fn add_measures(&self, metric_id: Uuid, measures: &[Measure]) {
        if measures.is_empty() {
            return;
        }
        self.pending
            .lock()
            .entry(metric_id)
            .or_default()
            .extend_from_slice(measures);
    }

    fn pending_measures(&self, metric_id: Uuid) -> Vec<Measure> {
        self.pending
            .lock()
            .get(&metric_id)
            .cloned()
            .unwrap_or_default()
    }

    fn finish_measures(&self, metric_id: Uuid, count: usize) {
        let mut pending = self.pending.lock();
        if let Some(queue) = pending.get_mut(&metric_id) {
            queue.drain(..count.min(queue.len()));
            if queue.is_empty() {
                pending.remove(&metric_id);
            }
        }
    }

    fn purge_metric(&self, metric_id: Uuid) {
        self.pending.lock().remove(&metric_id);
    }

    fn list_metrics_with_pending(&self) -> Vec<Uuid> {
        self.pending.lock().keys().copied().collect()
    }

    fn build_report(&self, details: bool) -> (usize, usize, Option<HashMap<Uuid, usize>>) {
        let pending = self.pending.lock();
        let measures = pending.values().map(Vec::len).sum();
        let per_metric = details.then(|| {
            pending
                .iter()
                .map(|(id, queue)| (*id, queue.len()))
                .collect()
        });
        (pending.len(), measures, per_metric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SECOND;

    #[test]
    fn test_pending_and_finish() {
        let incoming = MemoryIncoming::new();
        let metric = Uuid::new_v4();

        assert!(incoming.list_metrics_with_pending().is_empty());
        incoming.add_measures(metric, &[Measure::new(SECOND, 69.0)]);
        assert_eq!(vec![metric], incoming.list_metrics_with_pending());

        // A measure arriving while the first batch is in flight survives the
        // ack of that batch.
        let batch = incoming.pending_measures(metric);
        incoming.add_measures(metric, &[Measure::new(2 * SECOND, 42.0)]);
        incoming.finish_measures(metric, batch.len());

        assert_eq!(
            vec![Measure::new(2 * SECOND, 42.0)],
            incoming.pending_measures(metric)
        );
        incoming.finish_measures(metric, 1);
        assert!(incoming.list_metrics_with_pending().is_empty());
    }

    #[test]
    fn test_report_counts_and_shape() {
        let incoming = MemoryIncoming::new();
        let m1 = Uuid::new_v4();
        let m2 = Uuid::new_v4();
        for i in 0..60 {
            incoming.add_measures(m1, &[Measure::new(i * SECOND, 69.0)]);
            incoming.add_measures(m2, &[Measure::new(i * SECOND, 69.0)]);
        }

        let report = incoming.measures_report(true);
        assert_eq!(2, report.summary.metrics);
        assert_eq!(120, report.summary.measures);
        let details = report.details.unwrap();
        assert_eq!(Some(&60), details.get(&m1.to_string()));

        let report = incoming.measures_report(false);
        assert_eq!(2, report.summary.metrics);
        assert_eq!(120, report.summary.measures);
        assert!(report.details.is_none());
    }

    #[test]
    fn test_purge_metric() {
        let incoming = MemoryIncoming::new();
        let metric = Uuid::new_v4();
        incoming.add_measures(metric, &[Measure::new(0, 1.0)]);
        incoming.purge_metric(metric);
        assert!(incoming.pending_measures(metric).is_empty());
        // Idempotent.
        incoming.purge_metric(metric);
    }
}
