use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;

use crate::export::LabelZone;
use crate::heatmap::{TimeWindow, ViewParams};

/// Top-level configuration for heatgrid.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory holding `*.json.gzip` snapshot files. Default: "data".
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Time window to load and its bucket width.
    #[serde(default)]
    pub window: WindowConfig,

    /// View used when a request leaves parameters out.
    #[serde(default)]
    pub view: ViewParams,

    /// Frame label formatting.
    #[serde(default)]
    pub labels: LabelConfig,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// One-shot render configuration.
    #[serde(default)]
    pub render: RenderConfig,
}

/// Time window configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    /// Inclusive window start (RFC 3339).
    #[serde(default)]
    pub start: Option<DateTime<FixedOffset>>,

    /// Inclusive window end (RFC 3339).
    #[serde(default)]
    pub end: Option<DateTime<FixedOffset>>,

    /// Bucket width, whole minutes. Default: 60m.
    #[serde(default = "default_bucket_interval", with = "humantime_serde")]
    pub bucket_interval: Duration,
}

/// Frame label configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabelConfig {
    /// Fixed UTC offset for bucket labels, in minutes. Unset uses the host
    /// time zone.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address. Default: ":8050".
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

/// One-shot render configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenderConfig {
    /// Output file for the frame sequence JSON. Unset writes to stdout.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_bucket_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_server_addr() -> String {
    ":8050".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            window: WindowConfig::default(),
            view: ViewParams::default(),
            labels: LabelConfig::default(),
            server: ServerConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            bucket_interval: default_bucket_interval(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        let (Some(start), Some(end)) = (self.window.start, self.window.end) else {
            bail!("window.start and window.end are required");
        };

        if start > end {
            bail!("window.start must not be after window.end");
        }

        self.bucket_minutes()?;

        if let Some(offset) = self.labels.utc_offset_minutes {
            if offset.abs() >= 24 * 60 {
                bail!("labels.utc_offset_minutes must be within +/-24h, got {offset}");
            }
        }

        if self.data_dir.as_os_str().is_empty() {
            bail!("data_dir is required");
        }

        if self.server.addr.is_empty() {
            bail!("server.addr is required");
        }

        self.view.validate().context("invalid view")?;

        Ok(())
    }

    /// Bucket width in whole minutes.
    pub fn bucket_minutes(&self) -> Result<u32> {
        let interval = self.window.bucket_interval;
        if interval.subsec_nanos() != 0 || interval.as_secs() % 60 != 0 {
            bail!("window.bucket_interval must be whole minutes, got {interval:?}");
        }

        let minutes = interval.as_secs() / 60;
        if minutes == 0 {
            bail!("window.bucket_interval must be at least 1m");
        }

        u32::try_from(minutes).context("window.bucket_interval is too large")
    }

    /// The configured window in epoch milliseconds.
    pub fn time_window(&self) -> Result<TimeWindow> {
        let (Some(start), Some(end)) = (self.window.start, self.window.end) else {
            bail!("window.start and window.end are required");
        };

        let window = TimeWindow::new(
            start.timestamp_millis(),
            end.timestamp_millis(),
            self.bucket_minutes()?,
        )?;

        Ok(window)
    }

    /// Time zone used to label bucket frames.
    pub fn label_zone(&self) -> Result<LabelZone> {
        match self.labels.utc_offset_minutes {
            None => Ok(LabelZone::Local),
            Some(minutes) => FixedOffset::east_opt(minutes * 60)
                .map(LabelZone::Fixed)
                .with_context(|| format!("invalid UTC offset: {minutes} minutes")),
        }
    }

    /// Log filter to install: the command-line flag when given, else `log_level`.
    pub fn effective_log_level<'a>(&'a self, flag: Option<&'a str>) -> &'a str {
        flag.unwrap_or(&self.log_level)
    }
}
