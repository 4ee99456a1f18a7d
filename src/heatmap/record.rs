use super::dimension::GroupKey;
use super::metric::{Metric, MetricSet};
use super::HeatmapError;

/// Milliseconds in one minute.
pub const MINUTE_MS: i64 = 60_000;

/// Summary statistics as recorded by the producer for one series at one
/// timestamp. Latency fields are optional: count-one groups only carry `count`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatFields {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub std: Option<f64>,
}

impl StatFields {
    /// Fields for a group that only reported a call count.
    pub fn count_only(count: u64) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }

    /// Statistics carried by this record's schema.
    pub fn present(&self) -> MetricSet {
        let mut set = MetricSet::empty();
        set.insert(Metric::Count);
        if self.min.is_some() {
            set.insert(Metric::Min);
        }
        if self.max.is_some() {
            set.insert(Metric::Max);
        }
        if self.avg.is_some() {
            set.insert(Metric::Avg);
        }
        if self.std.is_some() {
            set.insert(Metric::Std);
        }
        set
    }
}

/// One observation unit.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterRecord {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub key: GroupKey,
    pub stats: StatFields,
}

/// Bounds and bucket width of one aggregation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start_ms: i64,
    end_ms: i64,
    bucket_minutes: u32,
}

impl TimeWindow {
    /// Creates a window, rejecting inverted bounds and zero-width buckets.
    pub fn new(start_ms: i64, end_ms: i64, bucket_minutes: u32) -> Result<Self, HeatmapError> {
        if start_ms > end_ms {
            return Err(HeatmapError::InvalidWindow(format!(
                "start {start_ms} is after end {end_ms}"
            )));
        }
        if bucket_minutes < 1 {
            return Err(HeatmapError::InvalidWindow(
                "bucket_minutes must be >= 1".to_string(),
            ));
        }

        Ok(Self {
            start_ms,
            end_ms,
            bucket_minutes,
        })
    }

    pub const fn start_ms(&self) -> i64 {
        self.start_ms
    }

    pub const fn end_ms(&self) -> i64 {
        self.end_ms
    }

    pub const fn bucket_minutes(&self) -> u32 {
        self.bucket_minutes
    }

    /// Bucket width in milliseconds.
    pub const fn bucket_ms(&self) -> i64 {
        self.bucket_minutes as i64 * MINUTE_MS
    }

    /// Whether `timestamp_ms` lies in `[start_ms, end_ms]`.
    pub const fn contains(&self, timestamp_ms: i64) -> bool {
        timestamp_ms >= self.start_ms && timestamp_ms <= self.end_ms
    }

    /// Number of right-aligned buckets covering the window.
    pub fn bucket_count(&self) -> usize {
        let span = self.end_ms - self.start_ms;
        let width = self.bucket_ms();
        let count = (span + width - 1) / width;
        usize::try_from(count.max(1)).unwrap_or(usize::MAX)
    }
}
