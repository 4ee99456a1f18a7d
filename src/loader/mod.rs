//! Snapshot loader.
//!
//! A snapshot directory holds gzip-compressed JSON files shaped as
//! `timestamp -> dimension -> row -> col -> status code -> leaf`. Files are
//! read in name order and a later file replaces an earlier entry for the same
//! timestamp.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use serde::de::{Error as _, IgnoredAny};
use serde::{Deserialize, Deserializer};
use tracing::{debug, info, warn};

use crate::heatmap::{CounterRecord, DimensionType, GroupKey, RecordStore, StatFields, TimeWindow};

/// File suffixes recognized as snapshots.
pub const SNAPSHOT_SUFFIXES: [&str; 2] = [".json.gzip", ".json.gz"];

/// Leaf of a snapshot: full statistics or a bare call count.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawLeaf {
    Stats {
        #[serde(deserialize_with = "de_count")]
        count: u64,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        #[serde(default)]
        avg: Option<f64>,
        #[serde(default)]
        std: Option<f64>,
    },
    Count(#[serde(deserialize_with = "de_count")] u64),
    /// Anything else; dropped without failing the file.
    Unreadable(IgnoredAny),
}

impl RawLeaf {
    fn into_stats(self) -> Option<StatFields> {
        match self {
            RawLeaf::Stats {
                count,
                min,
                max,
                avg,
                std,
            } => Some(StatFields {
                count,
                min,
                max,
                avg,
                std,
            }),
            RawLeaf::Count(count) => Some(StatFields::count_only(count)),
            RawLeaf::Unreadable(_) => None,
        }
    }
}

/// Call count written either as an integer or as an integral float (`3.0`).
#[derive(Deserialize)]
#[serde(untagged)]
enum RawCount {
    Int(u64),
    Float(f64),
}

fn de_count<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match RawCount::deserialize(deserializer)? {
        RawCount::Int(n) => Ok(n),
        RawCount::Float(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => {
            Ok(f as u64)
        }
        RawCount::Float(f) => Err(D::Error::custom(format!(
            "count must be a non-negative whole number, got {f}"
        ))),
    }
}

type RawStatuses = BTreeMap<String, RawLeaf>;
type RawDimension = BTreeMap<String, BTreeMap<String, RawStatuses>>;
type RawSnapshot = BTreeMap<String, BTreeMap<String, RawDimension>>;

/// Outcome counters of one directory load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub files_loaded: usize,
    /// Files that could not be opened, decompressed or parsed.
    pub files_skipped: usize,
    /// Distinct timestamp keys kept inside the window.
    pub timestamps: usize,
    pub records: usize,
    /// Timestamp keys, dimension names or leaves that were not understood.
    pub entries_ignored: usize,
}

/// Deduplicates key strings so records share allocations.
#[derive(Default)]
struct Interner(HashSet<Arc<str>>);

impl Interner {
    fn intern(&mut self, s: &str) -> Arc<str> {
        if let Some(existing) = self.0.get(s) {
            return Arc::clone(existing);
        }
        let value: Arc<str> = Arc::from(s);
        self.0.insert(Arc::clone(&value));
        value
    }
}

/// Loads every snapshot file of `dir` and builds the record store for `window`.
///
/// Malformed files are skipped with a warning. Fails when the directory
/// cannot be listed or no record falls inside the window.
pub fn load_dir(dir: &Path, window: TimeWindow) -> Result<(RecordStore, LoadReport)> {
    let files = snapshot_files(dir)?;
    let mut report = LoadReport::default();

    // Keyed by the parsed timestamp so later files replace earlier entries.
    let mut merged: BTreeMap<i64, BTreeMap<String, RawDimension>> = BTreeMap::new();

    for path in &files {
        let snapshot = match read_snapshot(path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{e:#}"), "Skipping malformed snapshot");
                report.files_skipped += 1;
                continue;
            }
        };
        report.files_loaded += 1;

        for (key, dimensions) in snapshot {
            let Some(ts) = parse_timestamp(&key) else {
                debug!(path = %path.display(), key = %key, "Ignoring unparsable timestamp key");
                report.entries_ignored += 1;
                continue;
            };
            if window.contains(ts) {
                merged.insert(ts, dimensions);
            }
        }
    }

    report.timestamps = merged.len();

    let mut interner = Interner::default();
    let mut records = Vec::new();

    for (ts, dimensions) in merged {
        for (name, rows) in dimensions {
            let Ok(dimension) = name.parse::<DimensionType>() else {
                debug!(dimension = %name, "Ignoring unknown dimension type");
                report.entries_ignored += 1;
                continue;
            };
            for (row, cols) in rows {
                let row = interner.intern(&row);
                for (col, statuses) in cols {
                    let col = interner.intern(&col);
                    for (status, leaf) in statuses {
                        let Some(stats) = leaf.into_stats() else {
                            debug!(
                                row = %row,
                                col = %col,
                                status = %status,
                                "Ignoring unreadable leaf"
                            );
                            report.entries_ignored += 1;
                            continue;
                        };
                        records.push(CounterRecord {
                            timestamp_ms: ts,
                            key: GroupKey {
                                dimension,
                                row: Arc::clone(&row),
                                col: Arc::clone(&col),
                                status_code: interner.intern(&status),
                            },
                            stats,
                        });
                    }
                }
            }
        }
    }

    report.records = records.len();

    let store = RecordStore::new(window, records)
        .with_context(|| format!("loading snapshots from {}", dir.display()))?;

    info!(
        dir = %dir.display(),
        files = report.files_loaded,
        skipped = report.files_skipped,
        timestamps = report.timestamps,
        records = report.records,
        "Snapshots loaded"
    );

    Ok((store, report))
}

/// Lists snapshot files of `dir` in name order.
fn snapshot_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("reading snapshot directory {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
        let path = entry.path();
        let is_snapshot = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| SNAPSHOT_SUFFIXES.iter().any(|s| n.ends_with(s)));
        if is_snapshot && path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    Ok(files)
}

fn read_snapshot(path: &Path) -> Result<RawSnapshot> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let decoder = GzDecoder::new(BufReader::new(file));
    serde_json::from_reader(BufReader::new(decoder))
        .with_context(|| format!("decoding {}", path.display()))
}

/// Parses a timestamp key, ignoring anything after the first `.`.
pub fn parse_timestamp(key: &str) -> Option<i64> {
    key.split('.').next()?.trim().parse().ok()
}
