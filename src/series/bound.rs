//! Buffer of recent raw measures, bounded by the archive policy's back
//! window.
//!
//! The buffer is what makes late-arriving measures able to rewrite already
//! computed aggregates: every point still inside the back window is kept
//! verbatim and re-resampled on the next processing cycle. Points that fall
//! out of the window are final and silently dropped.

use crate::series::Measure;
use crate::series::codec::InvalidData;
use crate::time::{Duration, Timestamp, round_timestamp};

/// Unaggregated recent points of one metric.
///
/// Points are sorted by timestamp and timestamp-unique; on conflict the most
/// recently written value wins.
#[derive(Debug, Clone)]
pub struct BoundTimeSerie {
    points: Vec<Measure>,
    block_size: Duration,
    back_window: u32,
}

impl BoundTimeSerie {
    pub fn new(block_size: Duration, back_window: u32) -> Self {
        Self {
            points: Vec::new(),
            block_size,
            back_window,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Measure] {
        &self.points
    }

    pub fn first(&self) -> Option<Timestamp> {
        self.points.first().map(|m| m.timestamp)
    }

    pub fn last(&self) -> Option<Timestamp> {
        self.points.last().map(|m| m.timestamp)
    }

    /// Start of the oldest block that may still be rewritten, derived from
    /// the newest point: everything before
    /// `round(last, block_size) - back_window * block_size` is immutable.
    pub fn first_block_timestamp(&self) -> Option<Timestamp> {
        self.points.last().map(|m| {
            round_timestamp(m.timestamp, self.block_size)
                - self.block_size * self.back_window as i64
        })
    }

    /// Merges `measures` into the buffer.
    ///
    /// Incoming points older than the current back window are dropped without
    /// error. `before_truncate` runs on the merged, not yet truncated series
    /// so the caller can resample every bucket the new points touched; an
    /// error from the callback aborts the merge commit.
    pub fn set_values<E>(
        &mut self,
        measures: &[Measure],
        before_truncate: impl FnOnce(&Self) -> Result<(), E>,
    ) -> Result<(), E> {
        let cutoff = if self.points.is_empty() {
            None
        } else {
            self.first_block_timestamp()
        };
        let mut incoming: Vec<Measure> = match cutoff {
            Some(cutoff) => measures
                .iter()
                .filter(|m| m.timestamp >= cutoff)
                .copied()
                .collect(),
            None => measures.to_vec(),
        };
        incoming.sort_by_key(|m| m.timestamp);

        let mut merged = std::mem::take(&mut self.points);
        merged.extend(incoming);
        merged.sort_by_key(|m| m.timestamp);
        // Stable sort keeps insertion order within one timestamp; keep the
        // last occurrence.
        merged.reverse();
        merged.dedup_by_key(|m| m.timestamp);
        merged.reverse();
        self.points = merged;

        before_truncate(&*self)?;
        self.truncate();
        Ok(())
    }

    fn truncate(&mut self) {
        if let Some(cutoff) = self.first_block_timestamp() {
            let start = self.points.partition_point(|m| m.timestamp < cutoff);
            self.points.drain(..start);
        }
    }

    /// Buckets every point with `timestamp >= from` by
    /// `round(timestamp, granularity)`, in timestamp order.
    pub fn group(&self, granularity: Duration, from: Timestamp) -> Vec<(Timestamp, Vec<f64>)> {
        let start = self.points.partition_point(|m| m.timestamp < from);
        let mut buckets: Vec<(Timestamp, Vec<f64>)> = Vec::new();
        for measure in &self.points[start..] {
            let bucket = round_timestamp(measure.timestamp, granularity);
            match buckets.last_mut() {
                Some((ts, values)) if *ts == bucket => values.push(measure.value),
                _ => buckets.push((bucket, vec![measure.value])),
            }
        }
        buckets
    }

    /// Wire format: point count, timestamps, then values, all little endian.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.points.len() * 16);
        out.extend_from_slice(&(self.points.len() as u64).to_le_bytes());
        for measure in &self.points {
            out.extend_from_slice(&measure.timestamp.to_le_bytes());
        }
        for measure in &self.points {
            out.extend_from_slice(&measure.value.to_le_bytes());
        }
        out
    }

    pub fn unserialize(
        data: &[u8],
        block_size: Duration,
        back_window: u32,
    ) -> Result<Self, InvalidData> {
        if data.len() < 8 {
            return Err(InvalidData(format!(
                "unaggregated blob of {} bytes",
                data.len()
            )));
        }
        let count = u64::from_le_bytes(data[..8].try_into().unwrap()) as usize;
        let expected = 8 + count.checked_mul(16).unwrap_or(usize::MAX);
        if data.len() != expected {
            return Err(InvalidData(format!(
                "unaggregated blob length {} does not match {} points",
                data.len(),
                count
            )));
        }

        let mut points = Vec::with_capacity(count);
        for i in 0..count {
            let ts_bytes = &data[8 + i * 8..16 + i * 8];
            let value_bytes = &data[8 + count * 8 + i * 8..16 + count * 8 + i * 8];
            let timestamp = i64::from_le_bytes(ts_bytes.try_into().unwrap());
            let value = f64::from_le_bytes(value_bytes.try_into().unwrap());
            if value.is_nan() {
                return Err(InvalidData("NaN value in unaggregated blob".to_string()));
            }
            if points
                .last()
                .is_some_and(|prev: &Measure| prev.timestamp >= timestamp)
            {
                return Err(InvalidData(
                    "unaggregated timestamps not increasing".to_string(),
                ));
            }
            points.push(Measure::new(timestamp, value));
        }
        Ok(Self {
            points,
            block_size,
            back_window,
        })
    }
}
