//! Metric and archive-policy catalogue.
//!
//! The engine consumes this as a capability set; the in-memory variant backs
//! the test suite and embedded deployments.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::policy::{ArchivePolicy, ArchivePolicyItem, Metric};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexerError {
    #[error("metric {0} does not exist")]
    NoSuchMetric(Uuid),
    #[error("archive policy {0:?} does not exist")]
    NoSuchArchivePolicy(String),
    #[error("archive policy {0:?} already exists")]
    ArchivePolicyAlreadyExists(String),
}

pub trait Indexer: Send + Sync {
    fn create_archive_policy(&self, policy: ArchivePolicy) -> Result<(), IndexerError>;

    /// Replaces the item list of an existing policy. Back window and
    /// aggregation methods are untouched; metrics pick the change up the
    /// next time they are fetched.
    fn update_archive_policy(
        &self,
        name: &str,
        items: Vec<ArchivePolicyItem>,
    ) -> Result<(), IndexerError>;

    fn create_metric(&self, id: Uuid, archive_policy_name: &str) -> Result<Metric, IndexerError>;

    fn delete_metric(&self, id: Uuid) -> Result<(), IndexerError>;

    /// Metrics known to the indexer; restricted to `ids` when given. Unknown
    /// ids are skipped, not an error.
    fn list_metrics(&self, ids: Option<&[Uuid]>) -> Vec<Metric>;
}

#[derive(Default)]
struct Catalogue {
    policies: HashMap<String, ArchivePolicy>,
    metrics: HashMap<Uuid, String>,
}

#[derive(Default)]
pub struct MemoryIndexer {
    inner: RwLock<Catalogue>,
}

impl MemoryIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// An indexer pre-loaded with the low/medium/high policy ladder.
    pub fn with_default_policies() -> Self {
        let indexer = Self::new();
        for policy in [
            ArchivePolicy::low(),
            ArchivePolicy::medium(),
            ArchivePolicy::high(),
        ] {
            let _ = indexer.create_archive_policy(policy);
        }
        indexer
    }
}

impl Indexer for MemoryIndexer {
    fn create_archive_policy(&self, policy: ArchivePolicy) -> Result<(), IndexerError> {
        let mut inner = self.inner.write();
        if inner.policies.contains_key(&policy.name) {
            return Err(IndexerError::ArchivePolicyAlreadyExists(policy.name));
        }
        inner.policies.insert(policy.name.clone(), policy);
        Ok(())
    }

    fn update_archive_policy(
        &self,
        name: &str,
        mut items: Vec<ArchivePolicyItem>,
    ) -> Result<(), IndexerError> {
        let mut inner = self.inner.write();
        let policy = inner
            .policies
            .get_mut(name)
            .ok_or_else(|| IndexerError::NoSuchArchivePolicy(name.to_string()))?;
        items.sort_by_key(|item| item.granularity);
        policy.items = items;
        Ok(())
    }

    fn create_metric(&self, id: Uuid, archive_policy_name: &str) -> Result<Metric, IndexerError> {
        let mut inner = self.inner.write();
        let policy = inner
            .policies
            .get(archive_policy_name)
            .cloned()
            .ok_or_else(|| IndexerError::NoSuchArchivePolicy(archive_policy_name.to_string()))?;
        inner.metrics.insert(id, archive_policy_name.to_string());
        Ok(Metric::new(id, policy))
    }

    fn delete_metric(&self, id: Uuid) -> Result<(), IndexerError> {
        self.inner
            .write()
            .metrics
            .remove(&id)
            .map(|_| ())
            .ok_or(IndexerError::NoSuchMetric(id))
    }

    fn list_metrics(&self, ids: Option<&[Uuid]>) -> Vec<Metric> {
        let inner = self.inner.read();
        let materialise = |id: &Uuid, policy_name: &String| {
            inner
                .policies
                .get(policy_name)
                .map(|policy| Metric::new(*id, policy.clone()))
        };
        match ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| {
                    inner
                        .metrics
                        .get(id)
                        .and_then(|policy_name| materialise(id, policy_name))
                })
                .collect(),
            None => inner
                .metrics
                .iter()
                .filter_map(|(id, policy_name)| materialise(id, policy_name))
                .collect(),
        }
    }
}
