use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::dimension::DimensionType;
use super::HeatmapError;

/// Statistic projected onto the heatmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Count,
    Avg,
    Max,
    Min,
    Std,
}

impl Metric {
    pub const ALL: [Metric; 5] = [Self::Count, Self::Avg, Self::Max, Self::Min, Self::Std];

    /// Returns the canonical field name used in snapshot files and requests.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Avg => "avg",
            Self::Max => "max",
            Self::Min => "min",
            Self::Std => "std",
        }
    }

    /// Returns the display label used in frame titles.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Count => "Call Volume",
            Self::Avg => "Average Response Time",
            Self::Max => "Max Response Time",
            Self::Min => "Min Response Time",
            Self::Std => "Standard Deviation of Response Times",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Self::Count => 1,
            Self::Avg => 1 << 1,
            Self::Max => 1 << 2,
            Self::Min => 1 << 3,
            Self::Std => 1 << 4,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown metric: {s}"))
    }
}

/// Set of statistics present in the data of one dimension type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricSet(u8);

impl MetricSet {
    /// Empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, metric: Metric) {
        self.0 |= metric.bit();
    }

    pub const fn contains(self, metric: Metric) -> bool {
        self.0 & metric.bit() != 0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates the contained metrics in canonical order.
    pub fn iter(self) -> impl Iterator<Item = Metric> {
        Metric::ALL.into_iter().filter(move |m| self.contains(*m))
    }
}

impl FromIterator<Metric> for MetricSet {
    fn from_iter<I: IntoIterator<Item = Metric>>(iter: I) -> Self {
        let mut set = Self::empty();
        for metric in iter {
            set.insert(metric);
        }
        set
    }
}

/// How filtered cells are expressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueMode {
    #[default]
    Absolute,
    /// Share of the all-status total, in percent.
    Percentage,
}

impl ValueMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Absolute => "absolute",
            Self::Percentage => "percentage",
        }
    }
}

impl FromStr for ValueMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "absolute" | "absolute_value" => Ok(Self::Absolute),
            "percentage" | "percentage_value" => Ok(Self::Percentage),
            other => Err(format!("unknown value mode: {other}")),
        }
    }
}

/// Color-scale policy across bucket frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeMode {
    /// Every bucket frame shares the largest bucket `color_max`.
    #[default]
    Constant,
    /// Each frame keeps its own bounds.
    Variable,
}

impl FromStr for RangeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "constant" | "constant_range" => Ok(Self::Constant),
            "variable" | "variable_range" => Ok(Self::Variable),
            other => Err(format!("unknown range mode: {other}")),
        }
    }
}

/// Parameters of one frame-sequence request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewParams {
    #[serde(default = "default_dimension")]
    pub dimension: DimensionType,
    #[serde(default = "default_metric")]
    pub metric: Metric,
    /// Selected status codes. Empty means all.
    #[serde(default)]
    pub status_codes: BTreeSet<String>,
    #[serde(default)]
    pub select_all: bool,
    #[serde(default)]
    pub value_mode: ValueMode,
    #[serde(default)]
    pub range_mode: RangeMode,
    /// Keep cells `>= lower`. Inactive unless positive.
    #[serde(default)]
    pub lower: f64,
    /// Keep cells `<= upper`. Inactive unless positive.
    #[serde(default)]
    pub upper: f64,
}

fn default_dimension() -> DimensionType {
    DimensionType::DatacenterServices
}

fn default_metric() -> Metric {
    Metric::Count
}

impl Default for ViewParams {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            metric: default_metric(),
            status_codes: BTreeSet::new(),
            select_all: false,
            value_mode: ValueMode::default(),
            range_mode: RangeMode::default(),
            lower: 0.0,
            upper: 0.0,
        }
    }
}

impl ViewParams {
    /// Whether every status code is shown (nothing selected, or select-all).
    pub fn shows_all_codes(&self) -> bool {
        self.status_codes.is_empty() || self.select_all
    }

    /// Active lower threshold.
    pub fn lower_bound(&self) -> Option<f64> {
        (self.lower > 0.0).then_some(self.lower)
    }

    /// Active upper threshold.
    pub fn upper_bound(&self) -> Option<f64> {
        (self.upper > 0.0).then_some(self.upper)
    }

    /// Rejects parameter combinations the projector cannot honor.
    pub fn validate(&self) -> Result<(), HeatmapError> {
        if !self.lower.is_finite() || !self.upper.is_finite() {
            return Err(HeatmapError::InvalidView(
                "thresholds must be finite numbers".to_string(),
            ));
        }

        if self.value_mode == ValueMode::Percentage {
            if self.shows_all_codes() {
                return Err(HeatmapError::InvalidView(
                    "percentage values require an explicit subset of status codes".to_string(),
                ));
            }
            if self.metric != Metric::Count {
                return Err(HeatmapError::InvalidView(format!(
                    "percentage values are only defined for {}, not {}",
                    Metric::Count,
                    self.metric
                )));
            }
        }

        Ok(())
    }

    /// Title assembled from the metric label and the active status filter.
    pub fn title(&self) -> String {
        if self.shows_all_codes() {
            return format!("{} (All Kinds)", self.metric.label());
        }

        let codes: Vec<&str> = self.status_codes.iter().map(String::as_str).collect();
        format!(
            "{} (Status code(s) [{}]) in {} value",
            self.metric.label(),
            codes.join(", "),
            self.value_mode.as_str()
        )
    }
}
