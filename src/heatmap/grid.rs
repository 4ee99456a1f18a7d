use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;
use thiserror::Error;

use super::aggregate::{merge, MergedStat};
use super::bucket::BucketStats;
use super::dimension::{CellKey, DimensionType, GroupKey};
use super::metric::{Metric, ValueMode, ViewParams};
use super::HeatmapError;

/// Slack allowed above 100% before a percentage is treated as real data.
const PERCENT_EPSILON: f64 = 1e-9;

/// Row and column labels shared by every frame of a request.
#[derive(Debug, Default, PartialEq, Serialize)]
pub struct GridAxes {
    rows: Vec<Arc<str>>,
    cols: Vec<Arc<str>>,
    #[serde(skip)]
    row_index: HashMap<Arc<str>, usize>,
    #[serde(skip)]
    col_index: HashMap<Arc<str>, usize>,
}

impl GridAxes {
    /// Builds axes sorted descending.
    pub fn new(rows: BTreeSet<Arc<str>>, cols: BTreeSet<Arc<str>>) -> Self {
        let rows: Vec<Arc<str>> = rows.into_iter().rev().collect();
        let cols: Vec<Arc<str>> = cols.into_iter().rev().collect();
        let row_index = index_of(&rows);
        let col_index = index_of(&cols);
        Self {
            rows,
            cols,
            row_index,
            col_index,
        }
    }

    pub fn rows(&self) -> &[Arc<str>] {
        &self.rows
    }

    pub fn cols(&self) -> &[Arc<str>] {
        &self.cols
    }

    /// Row-major offset of a cell.
    fn offset(&self, row: &str, col: &str) -> Option<usize> {
        let r = *self.row_index.get(row)?;
        let c = *self.col_index.get(col)?;
        Some(r * self.cols.len() + c)
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.rows.len() * self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn index_of(labels: &[Arc<str>]) -> HashMap<Arc<str>, usize> {
    labels
        .iter()
        .enumerate()
        .map(|(i, label)| (Arc::clone(label), i))
        .collect()
}

/// Dense row-major matrix over fixed axes. Absent cells are not drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    axes: Arc<GridAxes>,
    cells: Vec<Option<f64>>,
}

impl Grid {
    /// An all-absent grid.
    pub fn empty(axes: Arc<GridAxes>) -> Self {
        let cells = vec![None; axes.len()];
        Self { axes, cells }
    }

    pub fn axes(&self) -> &Arc<GridAxes> {
        &self.axes
    }

    /// Value at `(row, col)`, if drawn.
    pub fn get(&self, row: &str, col: &str) -> Option<f64> {
        let offset = self.axes.offset(row, col)?;
        self.cells.get(offset).copied().flatten()
    }

    /// Writes a cell; returns false when the labels are not on the axes.
    pub fn set(&mut self, cell: &CellKey, value: f64) -> bool {
        let Some(offset) = self.axes.offset(&cell.row, &cell.col) else {
            return false;
        };
        match self.cells.get_mut(offset) {
            Some(slot) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }

    /// Number of drawn cells.
    pub fn filled(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// Drawn values in row-major order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.cells.iter().filter_map(|c| *c)
    }
}

impl Serialize for Grid {
    /// Serialized as a row-major matrix of `number | null`.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let width = self.axes.cols.len();
        let mut seq = serializer.serialize_seq(Some(self.axes.rows.len()))?;
        for r in 0..self.axes.rows.len() {
            let row = self.cells.get(r * width..(r + 1) * width).unwrap_or(&[]);
            seq.serialize_element(row)?;
        }
        seq.end()
    }
}

/// Grid for one interval together with its color bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub grid: Grid,
    pub color_min: f64,
    pub color_max: f64,
}

/// Why an interval produced no drawable frame.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectError {
    #[error("{source} for {dimension}")]
    MetricNotPresent {
        dimension: DimensionType,
        #[source]
        source: HeatmapError,
    },

    #[error("no cells left after value filtering")]
    EmptyFrame { color_max: f64 },

    #[error("percentage values require an explicit subset of status codes")]
    PercentageRequiresSubset,
}

/// Projects the merged statistics of one interval onto the grid.
pub fn project(
    stats: &BucketStats,
    axes: &Arc<GridAxes>,
    view: &ViewParams,
) -> Result<Projection, ProjectError> {
    if view.value_mode == ValueMode::Percentage && view.shows_all_codes() {
        return Err(ProjectError::PercentageRequiresSubset);
    }

    let metric = view.metric;
    let series: Vec<(&GroupKey, &MergedStat)> = stats
        .iter()
        .filter(|(key, _)| key.dimension == view.dimension)
        .collect();

    if let Err(source) = first_present(&series, metric) {
        return Err(ProjectError::MetricNotPresent {
            dimension: view.dimension,
            source,
        });
    }

    let total = merge_cells(series.iter().copied());

    let result: BTreeMap<CellKey, f64> = if view.shows_all_codes() {
        total
            .iter()
            .filter_map(|(cell, stat)| Some((cell.clone(), stat.value(metric)?)))
            .collect()
    } else {
        let filtered = merge_cells(
            series
                .iter()
                .copied()
                .filter(|(key, _)| view.status_codes.contains(key.status_code.as_ref())),
        );

        match view.value_mode {
            ValueMode::Absolute => filtered
                .into_iter()
                .filter_map(|(cell, stat)| Some((cell, stat.value(metric)?)))
                .collect(),
            ValueMode::Percentage => filtered
                .into_iter()
                .filter_map(|(cell, stat)| {
                    let part = stat.value(metric)?;
                    let whole = total.get(&cell)?.value(metric)?;
                    if whole == 0.0 {
                        return None;
                    }
                    Some((cell, clamp_percentage(100.0 * part / whole)))
                })
                .collect(),
        }
    };

    let result_max = result.values().copied().fold(None, |acc: Option<f64>, v| {
        Some(acc.map_or(v, |m| m.max(v)))
    });

    let lower = view.lower_bound();
    let upper = view.upper_bound();
    let keep = |v: f64| lower.map_or(true, |l| v >= l) && upper.map_or(true, |u| v <= u);
    let color_min = lower.unwrap_or(0.0);
    let color_max = upper.unwrap_or_else(|| result_max.unwrap_or(0.0));

    let mut grid = Grid::empty(Arc::clone(axes));
    let mut drawn = 0usize;
    for (cell, value) in &result {
        if keep(*value) && grid.set(cell, *value) {
            drawn += 1;
        }
    }

    if drawn == 0 {
        return Err(ProjectError::EmptyFrame { color_max });
    }

    Ok(Projection {
        grid,
        color_min,
        color_max,
    })
}

/// First value of `metric` carried by the series, or the aggregator's
/// "metric not present" error when no member has it.
fn first_present(
    series: &[(&GroupKey, &MergedStat)],
    metric: Metric,
) -> Result<f64, HeatmapError> {
    let mut found = Err(HeatmapError::MetricNotPresent { metric });
    for (_, stat) in series {
        found = stat.require(metric);
        if found.is_ok() {
            break;
        }
    }
    found
}

/// Re-merges series into grid cells, ignoring status codes.
fn merge_cells<'a, I>(series: I) -> BTreeMap<CellKey, MergedStat>
where
    I: Iterator<Item = (&'a GroupKey, &'a MergedStat)>,
{
    let mut by_cell: BTreeMap<CellKey, Vec<&MergedStat>> = BTreeMap::new();
    for (key, stat) in series {
        by_cell.entry(key.cell()).or_default().push(stat);
    }
    by_cell
        .into_iter()
        .map(|(cell, members)| (cell, merge(members)))
        .collect()
}

fn clamp_percentage(value: f64) -> f64 {
    if value > 100.0 && value - 100.0 <= PERCENT_EPSILON {
        100.0
    } else if value < 0.0 && value >= -PERCENT_EPSILON {
        0.0
    } else {
        value
    }
}
