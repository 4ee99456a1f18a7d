use std::fmt::Display;
use std::sync::Arc;

use chrono::TimeZone;
use serde::Serialize;
use tracing::debug;

use super::bucket::{bucketize, Bucket};
use super::grid::{project, Grid, GridAxes, ProjectError, Projection};
use super::metric::{RangeMode, ViewParams};
use super::record::{CounterRecord, TimeWindow};
use super::store::RecordStore;
use super::HeatmapError;

/// Label of the whole-window frame.
pub const AGGREGATED_LABEL: &str = "Aggregated View";

/// Format of bucket frame labels.
pub const LABEL_FORMAT: &str = "%a, %d %b %Y %H:%M:%S";

/// One heatmap frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub label: String,
    pub color_min: f64,
    pub color_max: f64,
    #[serde(rename = "z")]
    pub grid: Grid,
}

impl Frame {
    fn new(label: String, projection: Projection) -> Self {
        Self {
            label,
            color_min: projection.color_min,
            color_max: projection.color_max,
            grid: projection.grid,
        }
    }
}

/// Everything a renderer needs to animate one request.
#[derive(Debug, Clone, Serialize)]
pub struct FrameSequence {
    pub title: String,
    pub x_axis_label: String,
    pub y_axis_label: String,
    pub range_mode: RangeMode,
    pub axes: Arc<GridAxes>,
    /// The aggregated frame first, then bucket frames ascending by end time.
    pub frames: Vec<Frame>,
}

impl FrameSequence {
    /// A sequence without frames, carrying the metadata of `view`.
    pub fn empty(view: &ViewParams, axes: Arc<GridAxes>) -> Self {
        let (y_axis_label, x_axis_label) = view.dimension.axis_labels();
        Self {
            title: view.title(),
            x_axis_label,
            y_axis_label,
            range_mode: view.range_mode,
            axes,
            frames: Vec::new(),
        }
    }

    pub fn aggregated(&self) -> Option<&Frame> {
        self.frames.first()
    }

    /// Frames of the individual buckets.
    pub fn bucket_frames(&self) -> &[Frame] {
        self.frames.get(1..).unwrap_or(&[])
    }
}

/// Builds the frame sequence for one request.
///
/// The whole window is projected first as the aggregated frame; a failure
/// there fails the request. Buckets that hold no data or lose every cell to
/// the thresholds are left out. Bucket labels are rendered in `tz`.
pub fn sequence<Tz>(
    store: &RecordStore,
    window: &TimeWindow,
    view: &ViewParams,
    tz: &Tz,
) -> Result<FrameSequence, HeatmapError>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    view.validate()?;

    let not_found = || HeatmapError::MetricNotFound {
        metric: view.metric,
        dimension: view.dimension,
    };

    if !store.metrics(view.dimension).contains(view.metric) {
        return Err(not_found());
    }

    let axes = store.axes(view.dimension);
    let records: Vec<&CounterRecord> = store.records_for(view.dimension).collect();

    let whole = Bucket::whole_window(window, records.iter().copied());
    let aggregated = project(&whole.merge(), &axes, view).map_err(|e| {
        debug!(error = %e, "Aggregated view failed");
        not_found()
    })?;

    let mut frames = vec![Frame::new(AGGREGATED_LABEL.to_string(), aggregated)];
    let mut bucket_maxes: Vec<f64> = Vec::new();
    let mut skipped = 0usize;

    let buckets = bucketize(window, records.iter().copied());
    let bucket_total = buckets.len();

    for bucket in buckets.iter().filter(|b| !b.is_empty()) {
        match project(&bucket.merge(), &axes, view) {
            Ok(projection) => {
                bucket_maxes.push(projection.color_max);
                frames.push(Frame::new(label(tz, bucket.end_ms), projection));
            }
            Err(ProjectError::EmptyFrame { color_max }) => {
                bucket_maxes.push(color_max);
                skipped += 1;
            }
            Err(e) => {
                debug!(bucket_end_ms = bucket.end_ms, error = %e, "Bucket skipped");
                skipped += 1;
            }
        }
    }

    if view.range_mode == RangeMode::Constant {
        if let Some(shared) = bucket_maxes.into_iter().reduce(f64::max) {
            for frame in frames.iter_mut().skip(1) {
                frame.color_max = shared;
            }
        }
    }

    debug!(
        dimension = %view.dimension,
        metric = %view.metric,
        buckets = bucket_total,
        frames = frames.len(),
        skipped,
        "Frame sequence computed"
    );

    Ok(FrameSequence {
        frames,
        ..FrameSequence::empty(view, axes)
    })
}

fn label<Tz>(tz: &Tz, timestamp_ms: i64) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    tz.timestamp_millis_opt(timestamp_ms)
        .earliest()
        .map(|t| t.format(LABEL_FORMAT).to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{FixedOffset, Utc};
    use proptest::prelude::*;

    use super::*;
    use crate::heatmap::aggregate::merge_records;
    use crate::heatmap::dimension::{DimensionType, GroupKey};
    use crate::heatmap::metric::{Metric, ValueMode};
    use crate::heatmap::record::{StatFields, MINUTE_MS};

    const HOUR_MS: i64 = 60 * MINUTE_MS;
    // 2024-01-01T00:00:00Z, a Monday.
    const BASE_MS: i64 = 1_704_067_200_000;

    fn record(offset_ms: i64, row: &str, col: &str, status: &str, count: u64) -> CounterRecord {
        CounterRecord {
            timestamp_ms: BASE_MS + offset_ms,
            key: GroupKey {
                dimension: DimensionType::DatacenterServices,
                row: Arc::from(row),
                col: Arc::from(col),
                status_code: Arc::from(status),
            },
            stats: StatFields::count_only(count),
        }
    }

    fn window(hours: i64, bucket_minutes: u32) -> TimeWindow {
        TimeWindow::new(BASE_MS, BASE_MS + hours * HOUR_MS, bucket_minutes).expect("valid window")
    }

    fn two_hour_store() -> RecordStore {
        RecordStore::new(
            window(2, 60),
            vec![
                record(10 * MINUTE_MS, "dc1", "auth", "200", 4),
                record(20 * MINUTE_MS, "dc2", "search", "500", 1),
                record(70 * MINUTE_MS, "dc1", "auth", "200", 9),
                record(80 * MINUTE_MS, "dc1", "auth", "500", 3),
            ],
        )
        .expect("non-empty")
    }

    fn labels(seq: &FrameSequence) -> Vec<&str> {
        seq.frames.iter().map(|f| f.label.as_str()).collect()
    }

    #[test]
    fn test_sequence_hourly_buckets() {
        let store = two_hour_store();
        let seq = sequence(&store, &window(2, 60), &ViewParams::default(), &Utc).expect("frames");

        assert_eq!(
            labels(&seq),
            vec![
                AGGREGATED_LABEL,
                "Mon, 01 Jan 2024 01:00:00",
                "Mon, 01 Jan 2024 02:00:00",
            ]
        );
        assert_eq!(seq.title, "Call Volume (All Kinds)");
        assert_eq!(seq.y_axis_label, "DATACENTER");
        assert_eq!(seq.x_axis_label, "SERVICES");

        let aggregated = seq.aggregated().expect("aggregated frame");
        assert_eq!(aggregated.grid.get("dc1", "auth"), Some(16.0));
        assert_eq!(seq.bucket_frames()[0].grid.get("dc1", "auth"), Some(4.0));
        assert_eq!(seq.bucket_frames()[1].grid.get("dc1", "auth"), Some(12.0));
    }

    #[test]
    fn test_sequence_labels_follow_time_zone() {
        let store = two_hour_store();
        let tz = FixedOffset::east_opt(2 * 3600).expect("valid offset");
        let seq = sequence(&store, &window(2, 60), &ViewParams::default(), &tz).expect("frames");
        assert_eq!(seq.frames[1].label, "Mon, 01 Jan 2024 03:00:00");
    }

    #[test]
    fn test_sequence_metric_not_found() {
        let store = two_hour_store();
        let view = ViewParams {
            metric: Metric::Std,
            ..ViewParams::default()
        };

        let err = sequence(&store, &window(2, 60), &view, &Utc).expect_err("no std data");
        assert!(matches!(err, HeatmapError::MetricNotFound { .. }));
        assert_eq!(err.to_string(), "Metric not found for the given data");
    }

    #[test]
    fn test_sequence_rejects_percentage_with_select_all() {
        let store = two_hour_store();
        let view = ViewParams {
            status_codes: ["500".to_string()].into_iter().collect(),
            select_all: true,
            value_mode: ValueMode::Percentage,
            ..ViewParams::default()
        };

        let err = sequence(&store, &window(2, 60), &view, &Utc).expect_err("rejected");
        assert!(matches!(err, HeatmapError::InvalidView(_)));
    }

    #[test]
    fn test_sequence_grid_shape_is_stable() {
        let store = two_hour_store();
        let seq = sequence(&store, &window(2, 60), &ViewParams::default(), &Utc).expect("frames");

        assert_eq!(seq.axes.rows().len(), 2);
        assert_eq!(seq.axes.cols().len(), 2);
        for frame in &seq.frames {
            assert!(Arc::ptr_eq(frame.grid.axes(), &seq.axes));
        }
        // dc2 only reports in the first hour but keeps its row.
        assert_eq!(seq.bucket_frames()[1].grid.get("dc2", "search"), None);
    }

    #[test]
    fn test_sequence_single_bucket_matches_aggregated() {
        let store = two_hour_store();
        let seq = sequence(&store, &window(2, 120), &ViewParams::default(), &Utc).expect("frames");

        assert_eq!(seq.frames.len(), 2);
        assert_eq!(seq.frames[0].grid, seq.frames[1].grid);

        let mut cells: BTreeMap<(&str, &str), Vec<&CounterRecord>> = BTreeMap::new();
        for r in store.records() {
            cells
                .entry((r.key.row.as_ref(), r.key.col.as_ref()))
                .or_default()
                .push(r);
        }
        for ((row, col), members) in cells {
            let direct = merge_records(members).value(Metric::Count);
            assert_eq!(seq.frames[1].grid.get(row, col), direct, "{row}/{col}");
        }
    }

    #[test]
    fn test_sequence_omits_empty_buckets() {
        let store = RecordStore::new(
            window(3, 60),
            vec![
                record(30 * MINUTE_MS, "dc1", "auth", "200", 1),
                record(150 * MINUTE_MS, "dc1", "auth", "200", 2),
            ],
        )
        .expect("non-empty");

        let seq = sequence(&store, &window(3, 60), &ViewParams::default(), &Utc).expect("frames");
        assert_eq!(
            labels(&seq),
            vec![
                AGGREGATED_LABEL,
                "Mon, 01 Jan 2024 01:00:00",
                "Mon, 01 Jan 2024 03:00:00",
            ]
        );
    }

    #[test]
    fn test_sequence_constant_range_shares_max() {
        let store = two_hour_store();
        let seq = sequence(&store, &window(2, 60), &ViewParams::default(), &Utc).expect("frames");

        assert_eq!(seq.frames[0].color_max, 16.0);
        for frame in seq.bucket_frames() {
            assert_eq!(frame.color_max, 12.0);
        }
    }

    #[test]
    fn test_sequence_variable_range_keeps_bounds() {
        let store = two_hour_store();
        let view = ViewParams {
            range_mode: RangeMode::Variable,
            ..ViewParams::default()
        };
        let seq = sequence(&store, &window(2, 60), &view, &Utc).expect("frames");

        let maxes: Vec<f64> = seq.frames.iter().map(|f| f.color_max).collect();
        assert_eq!(maxes, vec![16.0, 4.0, 12.0]);
    }

    #[test]
    fn test_sequence_threshold_drops_bucket() {
        let store = two_hour_store();
        let view = ViewParams {
            lower: 5.0,
            ..ViewParams::default()
        };
        let seq = sequence(&store, &window(2, 60), &view, &Utc).expect("frames");

        assert_eq!(seq.frames.len(), 2);
        assert_eq!(seq.frames[1].label, "Mon, 01 Jan 2024 02:00:00");
        assert_eq!(seq.frames[1].color_min, 5.0);
    }

    #[test]
    fn test_sequence_serializes_for_renderer() {
        let store = two_hour_store();
        let seq = sequence(&store, &window(2, 60), &ViewParams::default(), &Utc).expect("frames");

        let json = serde_json::to_value(&seq).expect("serialize");
        assert_eq!(json["range_mode"], "constant");
        assert_eq!(json["axes"]["rows"][0], "dc2");
        assert_eq!(json["frames"][0]["label"], AGGREGATED_LABEL);
        assert_eq!(json["frames"][0]["z"][1][1], 16.0);
    }

    const ROWS: [&str; 3] = ["dc1", "dc2", "dc3"];
    const COLS: [&str; 3] = ["auth", "search", "billing"];
    const CODES: [&str; 3] = ["200", "404", "500"];

    fn random_records() -> impl Strategy<Value = Vec<CounterRecord>> {
        prop::collection::vec((0..2 * HOUR_MS, 0usize..3, 0usize..3, 0usize..3, 0u64..50), 1..40)
            .prop_map(|parts| {
                parts
                    .into_iter()
                    .map(|(offset, row, col, code, count)| {
                        record(offset, ROWS[row], COLS[col], CODES[code], count)
                    })
                    .collect()
            })
    }

    proptest! {
        #[test]
        fn percentage_frames_stay_within_bounds(
            records in random_records(),
            subset in prop::sample::subsequence(CODES.to_vec(), 1..=3),
            bucket_minutes in prop::sample::select(vec![15u32, 30, 60, 120]),
        ) {
            let window = window(2, bucket_minutes);
            let store = RecordStore::new(window, records).expect("non-empty");
            let view = ViewParams {
                status_codes: subset.iter().map(|c| c.to_string()).collect(),
                value_mode: ValueMode::Percentage,
                range_mode: RangeMode::Variable,
                ..ViewParams::default()
            };

            if let Ok(seq) = sequence(&store, &window, &view, &Utc) {
                for frame in &seq.frames {
                    for v in frame.grid.values() {
                        prop_assert!((0.0..=100.0).contains(&v), "{} out of range", v);
                    }
                }
            }
        }
    }
}
