use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Pairing of row/column semantics for a heatmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionType {
    /// Rows are data centers, columns are services.
    DatacenterServices,
    /// Rows are callers, columns are callees.
    CallerCalleePairs,
}

impl DimensionType {
    /// All known dimension types.
    pub const ALL: [DimensionType; 2] = [Self::DatacenterServices, Self::CallerCalleePairs];

    /// Returns the canonical name used in snapshot files and requests.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DatacenterServices => "datacenter_services",
            Self::CallerCalleePairs => "caller_callee_pairs",
        }
    }

    /// Human-readable name.
    pub const fn label(self) -> &'static str {
        match self {
            Self::DatacenterServices => "Data Center vs Services",
            Self::CallerCalleePairs => "Caller-Callee Pairs",
        }
    }

    /// Returns `(y_axis, x_axis)` labels: the first two `_`-separated tokens
    /// of the canonical name, uppercased.
    pub fn axis_labels(self) -> (String, String) {
        let mut parts = self.as_str().split('_');
        let rows = parts.next().unwrap_or_default().to_uppercase();
        let cols = parts.next().unwrap_or_default().to_uppercase();
        (rows, cols)
    }
}

impl fmt::Display for DimensionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DimensionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| format!("unknown dimension type: {s}"))
    }
}

/// Identity of one mergeable series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub dimension: DimensionType,
    pub row: Arc<str>,
    pub col: Arc<str>,
    pub status_code: Arc<str>,
}

impl GroupKey {
    /// Returns the grid cell this series lands in, ignoring status code.
    pub fn cell(&self) -> CellKey {
        CellKey {
            row: Arc::clone(&self.row),
            col: Arc::clone(&self.col),
        }
    }
}

/// Dimension key once status codes are merged away.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub row: Arc<str>,
    pub col: Arc<str>,
}
