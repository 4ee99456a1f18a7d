//! Merging of already-summarized statistics.
//!
//! Every input carries `(count, min, max, avg, std)` but never the raw
//! samples, so the merged standard deviation is rebuilt with the pooled
//! variance of two partitions and folded pairwise over the members.

use serde::Serialize;

use super::metric::Metric;
use super::record::{CounterRecord, StatFields};
use super::HeatmapError;

/// Combined statistics of a set of records sharing one group key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MergedStat {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub std: Option<f64>,
}

impl MergedStat {
    /// Returns the requested statistic, if present.
    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Count => Some(self.count as f64),
            Metric::Min => self.min,
            Metric::Max => self.max,
            Metric::Avg => self.avg,
            Metric::Std => self.std,
        }
    }

    /// Returns the requested statistic or signals that the data never carried it.
    pub fn require(&self, metric: Metric) -> Result<f64, HeatmapError> {
        self.value(metric)
            .ok_or(HeatmapError::MetricNotPresent { metric })
    }
}

impl From<&StatFields> for MergedStat {
    /// Normalizes raw fields: a zero count carries no statistics and a
    /// count of one has no spread.
    fn from(fields: &StatFields) -> Self {
        match fields.count {
            0 => Self::default(),
            1 => Self {
                count: 1,
                min: fields.min,
                max: fields.max,
                avg: fields.avg,
                std: fields.std.map(|_| 0.0),
            },
            count => Self {
                count,
                min: fields.min,
                max: fields.max,
                avg: fields.avg,
                std: fields.std,
            },
        }
    }
}

/// Sample size, mean and standard deviation of one partition.
#[derive(Debug, Clone, Copy)]
struct Moments {
    n: f64,
    mean: f64,
    std: f64,
}

impl Moments {
    fn of(stat: &MergedStat) -> Option<Self> {
        if stat.count == 0 {
            return None;
        }
        let mean = stat.avg?;
        let std = if stat.count == 1 {
            0.0
        } else {
            stat.std.unwrap_or(0.0)
        };
        Some(Self {
            n: stat.count as f64,
            mean,
            std,
        })
    }

    /// Pooled combination of two partitions.
    fn combine(self, other: Self) -> Self {
        let combined_n = self.n + other.n;
        let mean = (self.n * self.mean + other.n * other.mean) / combined_n;

        if combined_n - 1.0 <= 0.0 {
            return Self {
                n: combined_n,
                mean,
                std: 0.0,
            };
        }

        let term1 = (self.n - 1.0) * self.std.powi(2) + (other.n - 1.0) * other.std.powi(2);
        let term2 = self.n * other.n;
        let term3 = (self.mean - other.mean).powi(2);
        let term4 = combined_n;
        let term5 = combined_n - 1.0;
        let variance = term1 / term5 + (term2 * term3) / (term5 * term4);

        Self {
            n: combined_n,
            mean,
            std: variance.max(0.0).sqrt(),
        }
    }
}

/// Reduces adjacent pairs level by level, so every member is combined with
/// partitions of similar size.
fn tree_fold(mut level: Vec<Moments>) -> Option<Moments> {
    while level.len() > 1 {
        level = level
            .chunks(2)
            .filter_map(|pair| pair.iter().copied().reduce(Moments::combine))
            .collect();
    }
    level.pop()
}

/// Merges statistics in the order given.
pub fn merge<'a, I>(members: I) -> MergedStat
where
    I: IntoIterator<Item = &'a MergedStat>,
{
    let mut count: u64 = 0;
    let mut min: Option<f64> = None;
    let mut max: Option<f64> = None;
    let mut has_avg = false;
    let mut has_std = false;
    let mut weighted_sum = 0.0;
    let mut weighted_count: u64 = 0;
    let mut moments = Vec::new();

    for stat in members {
        count = count.saturating_add(stat.count);
        has_avg |= stat.avg.is_some();
        has_std |= stat.std.is_some();

        if stat.count == 0 {
            continue;
        }

        if let Some(v) = stat.min {
            min = Some(min.map_or(v, |m| m.min(v)));
        }
        if let Some(v) = stat.max {
            max = Some(max.map_or(v, |m| m.max(v)));
        }
        if let Some(avg) = stat.avg {
            weighted_sum += stat.count as f64 * avg;
            weighted_count = weighted_count.saturating_add(stat.count);
        }
        if let Some(m) = Moments::of(stat) {
            moments.push(m);
        }
    }

    let avg = has_avg.then(|| {
        if weighted_count == 0 {
            0.0
        } else {
            weighted_sum / weighted_count as f64
        }
    });

    let std = has_std.then(|| {
        if count <= 1 {
            return 0.0;
        }
        tree_fold(moments).map_or(0.0, |m| m.std)
    });

    MergedStat {
        count,
        min,
        max,
        avg,
        std,
    }
}

/// Merges raw records of one series in chronological order.
///
/// Records are stably sorted by timestamp first, so ties keep their input
/// position and the fold order never depends on how the caller collected them.
pub fn merge_records<'a, I>(records: I) -> MergedStat
where
    I: IntoIterator<Item = &'a CounterRecord>,
{
    let mut ordered: Vec<&CounterRecord> = records.into_iter().collect();
    ordered.sort_by_key(|r| r.timestamp_ms);

    let stats: Vec<MergedStat> = ordered
        .iter()
        .map(|r| MergedStat::from(&r.stats))
        .collect();
    merge(&stats)
}
