//! Background processing: per-metric advisory locks and the worker pool.
//!
//! Work is sharded by metric: one metric is processed by at most one worker
//! at a time, different metrics proceed in parallel. Readers never take the
//! lock; they rely on the store's atomic per-key overwrites.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

use crate::engine::StorageEngine;
use crate::incoming::IncomingQueue;
use crate::indexer::Indexer;

/// Registry of advisory per-metric locks.
///
/// Lock entries are created on first use and kept for the lifetime of the
/// registry; the set of live metrics is small compared to the data.
#[derive(Default)]
pub struct MetricLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl MetricLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for a metric; callers hold it for one whole
    /// processing cycle.
    pub fn acquire(&self, metric_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.lock().entry(metric_id).or_default().clone()
    }
}

/// Fixed pool of worker threads draining a channel of metric ids.
pub struct WorkerPool {
    sender: Option<Sender<Uuid>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        threads: usize,
        engine: Arc<StorageEngine>,
        indexer: Arc<dyn Indexer>,
        incoming: Arc<dyn IncomingQueue>,
    ) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded::<Uuid>();
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let receiver = receiver.clone();
            let engine = Arc::clone(&engine);
            let indexer = Arc::clone(&indexer);
            let incoming = Arc::clone(&incoming);
            let handle = std::thread::Builder::new()
                .name(format!("metric-worker-{i}"))
                .spawn(move || worker_loop(receiver, engine, indexer, incoming))?;
            handles.push(handle);
        }
        Ok(Self {
            sender: Some(sender),
            handles,
        })
    }

    /// Queues one metric for processing. A metric already queued is simply
    /// processed twice; the second cycle finds nothing pending.
    pub fn submit(&self, metric_id: Uuid) {
        if let Some(sender) = &self.sender {
            // Send only fails when every worker is gone.
            let _ = sender.send(metric_id);
        }
    }

    /// Closes the queue and waits for the workers to drain it.
    pub fn shutdown(mut self) {
        self.sender = None;
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender = None;
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    receiver: Receiver<Uuid>,
    engine: Arc<StorageEngine>,
    indexer: Arc<dyn Indexer>,
    incoming: Arc<dyn IncomingQueue>,
) {
    for metric_id in receiver {
        let Some(metric) = indexer.list_metrics(Some(&[metric_id])).pop() else {
            // Unknown to the indexer: leave the queue entry for expunge.
            debug!(metric = %metric_id, "skipping metric unknown to the indexer");
            continue;
        };
        if let Err(err) = engine.process_metric(&*incoming, &metric) {
            error!(metric = %metric_id, %err, "failed to process metric");
        }
    }
}
