use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;

use heatgrid::export::{render, write_json, LabelZone};
use heatgrid::heatmap::{
    sequence, DimensionType, HeatmapError, Metric, RangeMode, TimeWindow, ValueMode, ViewParams,
    AGGREGATED_LABEL, MINUTE_MS,
};
use heatgrid::loader::load_dir;

// 2024-03-04T10:00:00Z, a Monday.
const BASE_MS: i64 = 1_709_546_400_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;

fn write_snapshot(dir: &Path, name: &str, value: &serde_json::Value) {
    let file = File::create(dir.join(name)).expect("create snapshot");
    let mut encoder = GzEncoder::new(file, Compression::fast());
    encoder
        .write_all(value.to_string().as_bytes())
        .expect("write snapshot");
    encoder.finish().expect("finish snapshot");
}

fn ts(offset_minutes: i64) -> String {
    (BASE_MS + offset_minutes * MINUTE_MS).to_string()
}

/// Two hours of data across two files, with latency statistics on the
/// caller/callee dimension and bare counts on the data center dimension.
fn fixture_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");

    let mut first = serde_json::Map::new();
    first.insert(
        ts(15),
        json!({
            "datacenter_services": {
                "dc-east": { "auth": { "200": 40, "500": 10 }, "search": { "200": 5 } },
                "dc-west": { "auth": { "200": 20 } }
            },
            "caller_callee_pairs": {
                "web": { "auth": {
                    "200": { "count": 2, "min": 8.0, "max": 12.0, "avg": 10.0, "std": 2.0 }
                } }
            }
        }),
    );
    first.insert(
        format!("{}.partial", ts(45)),
        json!({
            "caller_callee_pairs": {
                "web": { "auth": {
                    "200": { "count": 3, "min": 15.0, "max": 25.0, "avg": 20.0, "std": 4.0 }
                } }
            }
        }),
    );
    write_snapshot(dir.path(), "2024-03-04T10.json.gzip", &serde_json::Value::Object(first));

    let mut second = serde_json::Map::new();
    second.insert(
        ts(90),
        json!({
            "datacenter_services": {
                "dc-east": { "auth": { "200": 30, "500": 30 } },
                "dc-north": { "billing": { "404": 1 } }
            },
            "caller_callee_pairs": {
                "web": { "auth": { "200": 1 } }
            }
        }),
    );
    // Outside the window.
    second.insert(
        ts(600),
        json!({ "datacenter_services": { "dc-south": { "auth": { "200": 99 } } } }),
    );
    write_snapshot(dir.path(), "2024-03-04T11.json.gz", &serde_json::Value::Object(second));

    std::fs::write(dir.path().join("2024-03-04T12.json.gzip"), b"\x1f\x8bcorrupt")
        .expect("write corrupt snapshot");

    dir
}

fn window(bucket_minutes: u32) -> TimeWindow {
    TimeWindow::new(BASE_MS, BASE_MS + 2 * HOUR_MS, bucket_minutes).expect("valid window")
}

#[test]
fn loads_snapshots_and_skips_corrupt_files() {
    let dir = fixture_dir();
    let (store, report) = load_dir(dir.path(), window(60)).expect("load");

    assert_eq!(report.files_loaded, 2);
    assert_eq!(report.files_skipped, 1);
    assert_eq!(report.timestamps, 3);

    let codes: Vec<&str> = store.status_codes().iter().map(|c| c.as_ref()).collect();
    assert_eq!(codes, vec!["200", "404", "500"]);

    let axes = store.axes(DimensionType::DatacenterServices);
    let rows: Vec<&str> = axes
        .rows()
        .iter()
        .map(|r| r.as_ref())
        .collect();
    assert_eq!(rows, vec!["dc-west", "dc-north", "dc-east"]);
}

#[test]
fn hourly_call_volume_frames() {
    let dir = fixture_dir();
    let (store, _) = load_dir(dir.path(), window(60)).expect("load");

    let seq = sequence(&store, store.window(), &ViewParams::default(), &Utc).expect("frames");

    let labels: Vec<&str> = seq.frames.iter().map(|f| f.label.as_str()).collect();
    assert_eq!(
        labels,
        vec![
            AGGREGATED_LABEL,
            "Mon, 04 Mar 2024 11:00:00",
            "Mon, 04 Mar 2024 12:00:00",
        ]
    );

    let aggregated = &seq.frames[0];
    assert_eq!(aggregated.grid.get("dc-east", "auth"), Some(110.0));
    assert_eq!(aggregated.grid.get("dc-north", "billing"), Some(1.0));
    assert_eq!(aggregated.color_max, 110.0);

    // Constant range: both bucket frames share the largest bucket maximum.
    assert_eq!(seq.frames[1].grid.get("dc-east", "auth"), Some(50.0));
    assert_eq!(seq.frames[2].grid.get("dc-east", "auth"), Some(60.0));
    assert!(seq.frames[1..].iter().all(|f| f.color_max == 60.0));
}

#[test]
fn pooled_latency_statistics() {
    let dir = fixture_dir();
    let (store, _) = load_dir(dir.path(), window(120)).expect("load");

    let view = ViewParams {
        dimension: DimensionType::CallerCalleePairs,
        metric: Metric::Std,
        ..ViewParams::default()
    };
    let seq = sequence(&store, store.window(), &view, &Utc).expect("frames");

    // (2, 10, 2) + (3, 20, 4) pooled, then a count-only record that carries
    // no moments.
    let std = seq.frames[0].grid.get("web", "auth").expect("std cell");
    assert!((std - 39f64.sqrt()).abs() < 1e-9, "std = {std}");
    assert_eq!(seq.frames.len(), 2);
    assert_eq!(seq.frames[0].grid, seq.frames[1].grid);

    let avg_view = ViewParams {
        metric: Metric::Avg,
        ..view
    };
    let seq = sequence(&store, store.window(), &avg_view, &Utc).expect("frames");
    assert_eq!(seq.frames[0].grid.get("web", "auth"), Some(16.0));
}

#[test]
fn missing_statistic_yields_no_frames() {
    let dir = fixture_dir();
    let (store, _) = load_dir(dir.path(), window(60)).expect("load");

    let view = ViewParams {
        metric: Metric::Max,
        ..ViewParams::default()
    };
    let err = sequence(&store, store.window(), &view, &Utc).expect_err("no max data");
    assert!(matches!(err, HeatmapError::MetricNotFound { .. }));
}

#[test]
fn percentage_of_failing_calls() {
    let dir = fixture_dir();
    let (store, _) = load_dir(dir.path(), window(60)).expect("load");

    let view = ViewParams {
        status_codes: ["500".to_string()].into_iter().collect(),
        value_mode: ValueMode::Percentage,
        range_mode: RangeMode::Variable,
        ..ViewParams::default()
    };
    let seq = sequence(&store, store.window(), &view, &Utc).expect("frames");

    assert_eq!(seq.title, "Call Volume (Status code(s) [500]) in percentage value");
    assert_eq!(seq.frames[0].grid.get("dc-east", "auth"), Some(100.0 * 40.0 / 110.0));
    assert_eq!(seq.frames[1].grid.get("dc-east", "auth"), Some(20.0));
    assert_eq!(seq.frames[2].grid.get("dc-east", "auth"), Some(50.0));
    assert_eq!(seq.frames[0].grid.get("dc-west", "auth"), None);
    for frame in &seq.frames {
        assert!(frame.grid.values().all(|v| (0.0..=100.0).contains(&v)));
    }
}

#[test]
fn lower_threshold_filters_cells() {
    let dir = fixture_dir();
    let (store, _) = load_dir(dir.path(), window(60)).expect("load");

    let view = ViewParams {
        lower: 5.0,
        range_mode: RangeMode::Variable,
        ..ViewParams::default()
    };
    let seq = sequence(&store, store.window(), &view, &Utc).expect("frames");

    for frame in &seq.frames {
        assert_eq!(frame.color_min, 5.0);
        assert!(frame.grid.values().all(|v| v >= 5.0));
    }
    assert_eq!(seq.frames[0].color_max, 110.0);
    assert_eq!(seq.frames[0].grid.get("dc-north", "billing"), None);
    assert_eq!(seq.frames[0].grid.get("dc-east", "search"), Some(5.0));
}

#[test]
fn renders_json_document() {
    let dir = fixture_dir();
    let (store, _) = load_dir(dir.path(), window(60)).expect("load");

    let seq = render(&store, &ViewParams::default(), LabelZone::Local).expect("frames");
    let out = dir.path().join("frames.json");
    write_json(&seq, Some(&out)).expect("write");

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).expect("read")).expect("json");
    assert_eq!(json["y_axis_label"], "DATACENTER");
    assert_eq!(json["x_axis_label"], "SERVICES");
    assert_eq!(json["axes"]["rows"].as_array().map(Vec::len), Some(3));
    assert_eq!(json["frames"].as_array().map(Vec::len), Some(3));
}
