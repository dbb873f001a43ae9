//! In-memory split store, the kv-cache flavour of the storage capability.
//! Also what the engine test suite runs against.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::aggregation::Aggregation;
use crate::time::{Duration, SplitKey, Timestamp};

use super::SplitStore;

#[derive(Default)]
struct MetricData {
    unaggregated: Option<Vec<u8>>,
    splits: BTreeMap<(Aggregation, Duration, Timestamp), Vec<u8>>,
}

#[derive(Default)]
pub struct MemoryStore {
    metrics: RwLock<HashMap<Uuid, MetricData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SplitStore for MemoryStore {
    fn put_split(
        &self,
        metric_id: Uuid,
        aggregation: Aggregation,
        key: SplitKey,
        data: &[u8],
    ) -> io::Result<()> {
        self.metrics
            .write()
            .entry(metric_id)
            .or_default()
            .splits
            .insert((aggregation, key.sampling, key.timestamp), data.to_vec());
        Ok(())
    }

    fn get_split(
        &self,
        metric_id: Uuid,
        aggregation: Aggregation,
        key: SplitKey,
    ) -> io::Result<Option<Vec<u8>>> {
        Ok(self.metrics.read().get(&metric_id).and_then(|m| {
            m.splits
                .get(&(aggregation, key.sampling, key.timestamp))
                .cloned()
        }))
    }

    fn delete_split(
        &self,
        metric_id: Uuid,
        aggregation: Aggregation,
        key: SplitKey,
    ) -> io::Result<()> {
        if let Some(metric) = self.metrics.write().get_mut(&metric_id) {
            metric
                .splits
                .remove(&(aggregation, key.sampling, key.timestamp));
        }
        Ok(())
    }

    fn list_split_keys(
        &self,
        metric_id: Uuid,
        aggregation: Aggregation,
        sampling: Duration,
    ) -> io::Result<BTreeSet<SplitKey>> {
        Ok(self
            .metrics
            .read()
            .get(&metric_id)
            .map(|metric| {
                metric
                    .splits
                    .range(
                        (aggregation, sampling, Timestamp::MIN)
                            ..=(aggregation, sampling, Timestamp::MAX),
                    )
                    .map(|(&(_, sampling, timestamp), _)| SplitKey {
                        timestamp,
                        sampling,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn put_unaggregated(&self, metric_id: Uuid, data: &[u8]) -> io::Result<()> {
        self.metrics.write().entry(metric_id).or_default().unaggregated = Some(data.to_vec());
        Ok(())
    }

    fn get_unaggregated(&self, metric_id: Uuid) -> io::Result<Option<Vec<u8>>> {
        Ok(self
            .metrics
            .read()
            .get(&metric_id)
            .and_then(|m| m.unaggregated.clone()))
    }

    fn delete_metric(&self, metric_id: Uuid) -> io::Result<()> {
        self.metrics.write().remove(&metric_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{MINUTE, POINTS_PER_SPLIT, SECOND};

    #[test]
    fn test_round_trip_and_listing() {
        let store = MemoryStore::new();
        let metric = Uuid::new_v4();
        let key = SplitKey::of(1451520000 * SECOND, MINUTE, POINTS_PER_SPLIT);

        store.put_split(metric, Aggregation::Mean, key, b"x").unwrap();
        store.put_unaggregated(metric, b"raw").unwrap();

        assert_eq!(
            Some(b"x".to_vec()),
            store.get_split(metric, Aggregation::Mean, key).unwrap()
        );
        assert_eq!(Some(b"raw".to_vec()), store.get_unaggregated(metric).unwrap());
        assert_eq!(
            BTreeSet::from([key]),
            store
                .list_split_keys(metric, Aggregation::Mean, MINUTE)
                .unwrap()
        );
        assert!(
            store
                .list_split_keys(metric, Aggregation::Max, MINUTE)
                .unwrap()
                .is_empty()
        );

        store.delete_metric(metric).unwrap();
        assert_eq!(None, store.get_unaggregated(metric).unwrap());
        assert_eq!(None, store.get_split(metric, Aggregation::Mean, key).unwrap());
    }
}
