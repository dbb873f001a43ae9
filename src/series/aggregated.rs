//! One aggregated series: a metric's buckets at a single granularity under a
//! single aggregation method.
//!
//! Instances are short-lived: the processing path builds one from freshly
//! grouped raw points, the read path rebuilds one from stored splits. Nothing
//! is cached between requests.

use crate::aggregation::Aggregation;
use crate::time::{Duration, SplitKey, Timestamp, round_timestamp};

#[derive(Debug, Clone)]
pub struct AggregatedTimeSerie {
    sampling: Duration,
    aggregation: Aggregation,
    points: Vec<(Timestamp, f64)>,
}

impl AggregatedTimeSerie {
    pub fn new(sampling: Duration, aggregation: Aggregation) -> Self {
        Self {
            sampling,
            aggregation,
            points: Vec::new(),
        }
    }

    /// Builds a series from pre-grouped buckets by folding each bucket with
    /// the aggregation method. Buckets the method is undefined for are
    /// skipped.
    pub fn from_grouped(
        grouped: &[(Timestamp, Vec<f64>)],
        sampling: Duration,
        aggregation: Aggregation,
    ) -> Self {
        let points = grouped
            .iter()
            .filter_map(|(ts, values)| aggregation.apply(values).map(|v| (*ts, v)))
            .collect();
        Self {
            sampling,
            aggregation,
            points,
        }
    }

    /// Builds a series from already aggregated points, typically decoded
    /// splits. Points are sorted; a later duplicate wins.
    pub fn from_points(
        sampling: Duration,
        aggregation: Aggregation,
        mut points: Vec<(Timestamp, f64)>,
    ) -> Self {
        points.sort_by_key(|(ts, _)| *ts);
        points.reverse();
        points.dedup_by_key(|(ts, _)| *ts);
        points.reverse();
        Self {
            sampling,
            aggregation,
            points,
        }
    }

    pub fn sampling(&self) -> Duration {
        self.sampling
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    pub fn points(&self) -> &[(Timestamp, f64)] {
        &self.points
    }

    pub fn into_points(self) -> Vec<(Timestamp, f64)> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<Timestamp> {
        self.points.first().map(|(ts, _)| *ts)
    }

    pub fn last(&self) -> Option<Timestamp> {
        self.points.last().map(|(ts, _)| *ts)
    }

    /// Partitions the series by split key. Keys come out in time order and
    /// only non-empty splits are produced.
    pub fn split(&self, points_per_split: u32) -> Vec<(SplitKey, Vec<(Timestamp, f64)>)> {
        let mut out: Vec<(SplitKey, Vec<(Timestamp, f64)>)> = Vec::new();
        for &(ts, value) in &self.points {
            let key = SplitKey::of(ts, self.sampling, points_per_split);
            match out.last_mut() {
                Some((last_key, points)) if *last_key == key => points.push((ts, value)),
                _ => out.push((key, vec![(ts, value)])),
            }
        }
        out
    }

    /// Keeps only the newest `max_points` buckets. This is what a shrunk
    /// archive-policy item applies to reads before any new ingest happens.
    pub fn truncate_to(&mut self, max_points: usize) {
        if self.points.len() > max_points {
            self.points.drain(..self.points.len() - max_points);
        }
    }

    /// Clips to `[from, to]`, both inclusive, with `from` rounded down to the
    /// sampling so a range starting inside a bucket still covers it.
    pub fn clip(&mut self, from: Option<Timestamp>, to: Option<Timestamp>) {
        if let Some(from) = from {
            let low = round_timestamp(from, self.sampling);
            let start = self.points.partition_point(|(ts, _)| *ts < low);
            self.points.drain(..start);
        }
        if let Some(to) = to {
            let end = self.points.partition_point(|(ts, _)| *ts <= to);
            self.points.truncate(end);
        }
    }

    /// Re-buckets the aggregated points at a coarser (or any) granularity
    /// using the same aggregation method.
    pub fn resample(&self, sampling: Duration) -> AggregatedTimeSerie {
        let mut grouped: Vec<(Timestamp, Vec<f64>)> = Vec::new();
        for &(ts, value) in &self.points {
            let bucket = round_timestamp(ts, sampling);
            match grouped.last_mut() {
                Some((last, values)) if *last == bucket => values.push(value),
                _ => grouped.push((bucket, vec![value])),
            }
        }
        AggregatedTimeSerie::from_grouped(&grouped, sampling, self.aggregation)
    }
}

/// Merges freshly aggregated buckets over the previous content of a split.
/// New buckets win on collision; the result is sorted and unique.
pub(crate) fn merge_points(
    old: Vec<(Timestamp, f64)>,
    new: Vec<(Timestamp, f64)>,
) -> Vec<(Timestamp, f64)> {
    let mut merged: std::collections::BTreeMap<Timestamp, f64> = old.into_iter().collect();
    merged.extend(new);
    merged.into_iter().collect()
}
