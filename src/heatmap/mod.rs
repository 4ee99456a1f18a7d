pub mod aggregate;
pub mod bucket;
pub mod dimension;
pub mod frame;
pub mod grid;
pub mod metric;
pub mod record;
pub mod store;

use thiserror::Error;

pub use self::aggregate::{merge, merge_records, MergedStat};
pub use self::bucket::{bucketize, Bucket, BucketStats};
pub use self::dimension::{CellKey, DimensionType, GroupKey};
pub use self::frame::{sequence, Frame, FrameSequence, AGGREGATED_LABEL};
pub use self::grid::{project, Grid, GridAxes, ProjectError, Projection};
pub use self::metric::{Metric, MetricSet, RangeMode, ValueMode, ViewParams};
pub use self::record::{CounterRecord, StatFields, TimeWindow, MINUTE_MS};
pub use self::store::RecordStore;

/// Errors raised while re-aggregating a window.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HeatmapError {
    /// The requested statistic is not carried by the data of the dimension.
    #[error("Metric not found for the given data")]
    MetricNotFound {
        metric: Metric,
        dimension: DimensionType,
    },

    #[error("statistic {metric} is absent from every merged member")]
    MetricNotPresent { metric: Metric },

    #[error("no records between {start_ms} and {end_ms}")]
    EmptyWindow { start_ms: i64, end_ms: i64 },

    #[error("invalid time window: {0}")]
    InvalidWindow(String),

    #[error("invalid view parameters: {0}")]
    InvalidView(String),
}
