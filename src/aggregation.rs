//! Aggregation methods applied to buckets of raw values.

use serde::{Deserialize, Serialize};

/// A bucket fold. The same methods are used for resampling raw measures,
/// re-bucketing an already aggregated series and reaggregating across
/// metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Mean,
    Min,
    Max,
    Sum,
    Count,
    Std,
}

impl Aggregation {
    /// Methods enabled on an archive policy that does not name any.
    pub const DEFAULT: [Aggregation; 3] = [Aggregation::Mean, Aggregation::Max, Aggregation::Min];

    pub fn name(self) -> &'static str {
        match self {
            Aggregation::Mean => "mean",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Sum => "sum",
            Aggregation::Count => "count",
            Aggregation::Std => "std",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "mean" => Some(Aggregation::Mean),
            "min" => Some(Aggregation::Min),
            "max" => Some(Aggregation::Max),
            "sum" => Some(Aggregation::Sum),
            "count" => Some(Aggregation::Count),
            "std" => Some(Aggregation::Std),
            _ => None,
        }
    }

    /// Folds one bucket of values. Returns `None` when the method is
    /// undefined for the bucket (empty bucket, or standard deviation of a
    /// single sample); such buckets are not stored.
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            Aggregation::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
            Aggregation::Min => values.iter().copied().reduce(f64::min),
            Aggregation::Max => values.iter().copied().reduce(f64::max),
            Aggregation::Sum => Some(values.iter().sum()),
            Aggregation::Count => Some(values.len() as f64),
            Aggregation::Std => {
                if values.len() < 2 {
                    return None;
                }
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
                    / (values.len() - 1) as f64;
                Some(var.sqrt())
            }
        }
    }
}

impl std::fmt::Display for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Aggregation::parse(s).ok_or_else(|| format!("unknown aggregation method {s:?}"))
    }
}
