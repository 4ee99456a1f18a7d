pub mod api;
pub mod health;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{FixedOffset, Local};

use crate::heatmap::{sequence, FrameSequence, HeatmapError, RecordStore, ViewParams};

/// Time zone used for bucket frame labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelZone {
    /// The host's local time zone.
    Local,
    Fixed(FixedOffset),
}

/// Recomputes the frame sequence for `view` over the store's window.
pub fn render(
    store: &RecordStore,
    view: &ViewParams,
    zone: LabelZone,
) -> Result<FrameSequence, HeatmapError> {
    match zone {
        LabelZone::Local => sequence(store, store.window(), view, &Local),
        LabelZone::Fixed(offset) => sequence(store, store.window(), view, &offset),
    }
}

/// Writes the frame sequence as JSON to `output`, or to stdout when unset.
pub fn write_json(seq: &FrameSequence, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating output file {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, seq)
                .with_context(|| format!("writing frames to {}", path.display()))?;
            writer.flush().context("flushing output file")?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            serde_json::to_writer_pretty(&mut writer, seq).context("writing frames to stdout")?;
            writeln!(writer).context("writing frames to stdout")?;
            writer.flush().context("flushing stdout")?;
        }
    }

    Ok(())
}
