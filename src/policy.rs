//! Archive policies: how long, how coarse and under which aggregation
//! methods a metric keeps its history.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregation::Aggregation;
use crate::time::{DAY, Duration, HOUR, MINUTE, SECOND};

/// One granularity of an archive policy: keep `points` buckets of width
/// `granularity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivePolicyItem {
    pub granularity: Duration,
    pub points: u32,
}

impl ArchivePolicyItem {
    pub fn new(granularity: Duration, points: u32) -> Self {
        Self {
            granularity,
            points,
        }
    }

    /// Total duration covered by this item.
    pub fn timespan(&self) -> Duration {
        self.granularity * self.points as i64
    }
}

/// Named retention and aggregation schedule attached to metrics.
///
/// `back_window` is expressed in units of the largest granularity and bounds
/// how far back a late measure may still rewrite aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivePolicy {
    pub name: String,
    pub back_window: u32,
    pub items: Vec<ArchivePolicyItem>,
    pub aggregation_methods: Vec<Aggregation>,
}

impl ArchivePolicy {
    /// Builds a policy with the default aggregation methods. Items are kept
    /// sorted by granularity, finest first.
    pub fn new(name: impl Into<String>, back_window: u32, items: Vec<ArchivePolicyItem>) -> Self {
        Self::with_aggregations(name, back_window, items, Aggregation::DEFAULT.to_vec())
    }

    pub fn with_aggregations(
        name: impl Into<String>,
        back_window: u32,
        mut items: Vec<ArchivePolicyItem>,
        aggregation_methods: Vec<Aggregation>,
    ) -> Self {
        items.sort_by_key(|item| item.granularity);
        Self {
            name: name.into(),
            back_window,
            items,
            aggregation_methods,
        }
    }

    /// The largest granularity; block size of the unaggregated buffer.
    pub fn max_block_size(&self) -> Duration {
        self.items
            .iter()
            .map(|item| item.granularity)
            .max()
            .unwrap_or(SECOND)
    }

    pub fn item_for(&self, granularity: Duration) -> Option<&ArchivePolicyItem> {
        self.items
            .iter()
            .find(|item| item.granularity == granularity)
    }

    /// Items from the coarsest granularity down to the finest, the order
    /// range-query results are reported in.
    pub fn items_coarsest_first(&self) -> impl Iterator<Item = &ArchivePolicyItem> {
        self.items.iter().rev()
    }

    /// 5 minutes for an hour, hourly for a day, daily for a year.
    pub fn low() -> Self {
        Self::new(
            "low",
            0,
            vec![
                ArchivePolicyItem::new(5 * MINUTE, 12),
                ArchivePolicyItem::new(HOUR, 24),
                ArchivePolicyItem::new(DAY, 365),
            ],
        )
    }

    /// `low` plus a minutely series for an hour.
    pub fn medium() -> Self {
        let mut policy = Self::low();
        policy.name = "medium".to_string();
        policy.items.insert(0, ArchivePolicyItem::new(MINUTE, 60));
        policy
    }

    /// `medium` plus a one-second series for an hour.
    pub fn high() -> Self {
        let mut policy = Self::medium();
        policy.name = "high".to_string();
        policy.items.insert(0, ArchivePolicyItem::new(SECOND, 3600));
        policy
    }
}

/// A metric: an id and the archive policy it was created with.
///
/// The policy snapshot is taken when the metric is materialised by the
/// indexer; callers re-fetch the metric to observe policy resizes.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub id: Uuid,
    pub archive_policy: ArchivePolicy,
}

impl Metric {
    pub fn new(id: Uuid, archive_policy: ArchivePolicy) -> Self {
        Self { id, archive_policy }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_timespan() {
        assert_eq!(HOUR, ArchivePolicyItem::new(5 * MINUTE, 12).timespan());
        assert_eq!(365 * DAY, ArchivePolicyItem::new(DAY, 365).timespan());
    }

    #[test]
    fn test_items_sorted_finest_first() {
        let policy = ArchivePolicy::new(
            "p",
            0,
            vec![
                ArchivePolicyItem::new(DAY, 30),
                ArchivePolicyItem::new(MINUTE, 60),
                ArchivePolicyItem::new(HOUR, 24),
            ],
        );
        let granularities: Vec<_> = policy.items.iter().map(|i| i.granularity).collect();
        assert_eq!(vec![MINUTE, HOUR, DAY], granularities);
        let coarsest: Vec<_> = policy
            .items_coarsest_first()
            .map(|i| i.granularity)
            .collect();
        assert_eq!(vec![DAY, HOUR, MINUTE], coarsest);
    }

    #[test]
    fn test_ladder_defaults() {
        let low = ArchivePolicy::low();
        assert_eq!(3, low.items.len());
        assert_eq!(DAY, low.max_block_size());
        assert_eq!(0, low.back_window);
        assert_eq!(
            vec![Aggregation::Mean, Aggregation::Max, Aggregation::Min],
            low.aggregation_methods
        );

        let medium = ArchivePolicy::medium();
        assert!(medium.item_for(MINUTE).is_some());
        assert_eq!(4, medium.items.len());

        let high = ArchivePolicy::high();
        assert_eq!(3600, high.item_for(SECOND).unwrap().points);
        assert_eq!(5, high.items.len());
    }

    #[test]
    fn test_item_lookup() {
        let policy = ArchivePolicy::low();
        assert_eq!(12, policy.item_for(5 * MINUTE).unwrap().points);
        assert!(policy.item_for(42 * SECOND).is_none());
    }
}
