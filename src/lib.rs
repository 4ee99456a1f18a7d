//! Re-aggregation of pre-summarized call telemetry into heatmap frames.
//!
//! Snapshot files are loaded once into an immutable [`heatmap::RecordStore`];
//! every request then merges the records of each time bucket, projects them
//! onto a fixed grid and returns the frame sequence.

pub mod config;
pub mod export;
pub mod heatmap;
pub mod loader;
