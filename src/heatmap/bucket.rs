use std::collections::BTreeMap;

use super::aggregate::{merge_records, MergedStat};
use super::dimension::GroupKey;
use super::record::{CounterRecord, TimeWindow};

/// Merged statistics of one interval, keyed by series.
pub type BucketStats = BTreeMap<GroupKey, MergedStat>;

/// Records falling into one interval of the window.
#[derive(Debug, Clone)]
pub struct Bucket<'a> {
    /// Lower bound. Exclusive, except for the earliest bucket where it is the
    /// window start and inclusive.
    pub start_ms: i64,
    /// Inclusive upper bound.
    pub end_ms: i64,
    pub records: Vec<&'a CounterRecord>,
}

impl<'a> Bucket<'a> {
    /// One bucket spanning the whole window.
    pub fn whole_window<I>(window: &TimeWindow, records: I) -> Self
    where
        I: IntoIterator<Item = &'a CounterRecord>,
    {
        Self {
            start_ms: window.start_ms(),
            end_ms: window.end_ms(),
            records: records
                .into_iter()
                .filter(|r| window.contains(r.timestamp_ms))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Partitions the records by series and merges each series.
    pub fn merge(&self) -> BucketStats {
        let mut series: BTreeMap<&GroupKey, Vec<&CounterRecord>> = BTreeMap::new();
        for record in &self.records {
            series.entry(&record.key).or_default().push(record);
        }

        series
            .into_iter()
            .map(|(key, members)| (key.clone(), merge_records(members)))
            .collect()
    }
}

/// Splits records into right-aligned buckets, ascending by end time.
///
/// The last bucket ends at the window end and earlier ones are tiled
/// backwards `bucket_minutes` at a time; the earliest may be shorter. Every
/// bucket is returned, including empty ones.
pub fn bucketize<'a, I>(window: &TimeWindow, records: I) -> Vec<Bucket<'a>>
where
    I: IntoIterator<Item = &'a CounterRecord>,
{
    let count = window.bucket_count();
    let width = window.bucket_ms();
    let end = window.end_ms();

    let mut buckets: Vec<Bucket<'a>> = (0..count)
        .map(|idx| {
            // idx 0 is the earliest bucket.
            let from_end = (count - 1 - idx) as i64;
            let end_ms = end - from_end * width;
            Bucket {
                start_ms: (end_ms - width).max(window.start_ms()),
                end_ms,
                records: Vec::new(),
            }
        })
        .collect();

    for record in records {
        if !window.contains(record.timestamp_ms) {
            continue;
        }
        let from_end = usize::try_from((end - record.timestamp_ms) / width)
            .unwrap_or(usize::MAX)
            .min(count - 1);
        if let Some(bucket) = buckets.get_mut(count - 1 - from_end) {
            bucket.records.push(record);
        }
    }

    buckets
}
