use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::dimension::DimensionType;
use super::grid::GridAxes;
use super::metric::MetricSet;
use super::record::{CounterRecord, TimeWindow};
use super::HeatmapError;

/// Immutable set of counter records for one time window.
///
/// Built once by the loader and shared read-only between recomputations;
/// grid axes and the statistics present per dimension are derived here so
/// every request sees the same shape.
#[derive(Debug)]
pub struct RecordStore {
    window: TimeWindow,
    /// Sorted by timestamp; equal timestamps keep load order.
    records: Vec<CounterRecord>,
    axes: HashMap<DimensionType, Arc<GridAxes>>,
    metrics: HashMap<DimensionType, MetricSet>,
    status_codes: Vec<Arc<str>>,
}

impl RecordStore {
    /// Builds a store from records, dropping those outside the window.
    pub fn new<I>(window: TimeWindow, records: I) -> Result<Self, HeatmapError>
    where
        I: IntoIterator<Item = CounterRecord>,
    {
        let mut records: Vec<CounterRecord> = records
            .into_iter()
            .filter(|r| window.contains(r.timestamp_ms))
            .collect();

        if records.is_empty() {
            return Err(HeatmapError::EmptyWindow {
                start_ms: window.start_ms(),
                end_ms: window.end_ms(),
            });
        }

        records.sort_by_key(|r| r.timestamp_ms);

        let mut rows: HashMap<DimensionType, BTreeSet<Arc<str>>> = HashMap::new();
        let mut cols: HashMap<DimensionType, BTreeSet<Arc<str>>> = HashMap::new();
        let mut metrics: HashMap<DimensionType, MetricSet> = HashMap::new();
        let mut status_codes: BTreeSet<Arc<str>> = BTreeSet::new();

        for record in &records {
            let dim = record.key.dimension;
            rows.entry(dim)
                .or_default()
                .insert(Arc::clone(&record.key.row));
            cols.entry(dim)
                .or_default()
                .insert(Arc::clone(&record.key.col));
            let set = metrics.entry(dim).or_default();
            *set = set.union(record.stats.present());
            status_codes.insert(Arc::clone(&record.key.status_code));
        }

        let axes = DimensionType::ALL
            .into_iter()
            .filter_map(|dim| {
                let row_keys = rows.remove(&dim)?;
                let col_keys = cols.remove(&dim).unwrap_or_default();
                Some((dim, Arc::new(GridAxes::new(row_keys, col_keys))))
            })
            .collect();

        Ok(Self {
            window,
            records,
            axes,
            metrics,
            status_codes: status_codes.into_iter().collect(),
        })
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    /// All records in chronological order.
    pub fn records(&self) -> &[CounterRecord] {
        &self.records
    }

    /// Records of one dimension type in chronological order.
    pub fn records_for(&self, dimension: DimensionType) -> impl Iterator<Item = &CounterRecord> {
        self.records
            .iter()
            .filter(move |r| r.key.dimension == dimension)
    }

    /// Fixed grid axes for a dimension type; empty if the window never saw it.
    pub fn axes(&self, dimension: DimensionType) -> Arc<GridAxes> {
        self.axes
            .get(&dimension)
            .cloned()
            .unwrap_or_else(|| Arc::new(GridAxes::default()))
    }

    /// Statistics present anywhere in the window for a dimension type.
    pub fn metrics(&self, dimension: DimensionType) -> MetricSet {
        self.metrics.get(&dimension).copied().unwrap_or_default()
    }

    /// Distinct status codes, ascending.
    pub fn status_codes(&self) -> &[Arc<str>] {
        &self.status_codes
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
