use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use heatgrid::config::Config;
use heatgrid::export::api::{self, ApiState};
use heatgrid::export::health::HealthMetrics;
use heatgrid::export::{render, write_json};
use heatgrid::heatmap::{FrameSequence, HeatmapError, RecordStore};
use heatgrid::loader::{self, LoadReport};

/// Re-aggregates call telemetry snapshots into heatmap frames.
#[derive(Parser)]
#[command(name = "heatgrid", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error). Overrides
    /// `log_level` from the config file.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve frames over HTTP (default).
    Serve,
    /// Compute the default view once and write it as JSON.
    Render {
        /// Output file; overrides `render.output`. Stdout when neither is set.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the status codes present in the window.
    StatusCodes,
    /// Print version information and exit.
    Version,
}

/// Build-time version info, injected via env at build time.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("heatgrid {}", version::full());
        return Ok(());
    }

    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;

    let cfg = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    // Initialize tracing.
    let level = cfg.effective_log_level(cli.log_level.as_deref());
    let filter =
        EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting heatgrid",
    );

    let window = cfg.time_window()?;
    let (store, report) = loader::load_dir(&cfg.data_dir, window)?;

    match cli.command {
        Some(Command::Render { output }) => {
            let output = output.or_else(|| cfg.render.output.clone());
            render_once(&cfg, &store, output)
        }
        Some(Command::StatusCodes) => {
            for code in store.status_codes() {
                println!("{code}");
            }
            Ok(())
        }
        Some(Command::Serve) | None => {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("building tokio runtime")?;

            rt.block_on(serve(cfg, store, report))
        }
        Some(Command::Version) => Ok(()),
    }
}

/// Renders the configured view once. A view the data cannot satisfy is
/// reported and written as an empty sequence.
fn render_once(cfg: &Config, store: &RecordStore, output: Option<PathBuf>) -> Result<()> {
    let seq = match render(store, &cfg.view, cfg.label_zone()?) {
        Ok(seq) => seq,
        Err(e @ HeatmapError::MetricNotFound { .. }) => {
            tracing::warn!(
                dimension = %cfg.view.dimension,
                metric = %cfg.view.metric,
                "{e}"
            );
            eprintln!("{e}");
            FrameSequence::empty(&cfg.view, store.axes(cfg.view.dimension))
        }
        Err(e) => return Err(e).context("rendering frames"),
    };

    write_json(&seq, output.as_deref())?;

    tracing::info!(frames = seq.frames.len(), "frames rendered");

    Ok(())
}

async fn serve(cfg: Config, store: RecordStore, report: LoadReport) -> Result<()> {
    // Set up signal handling.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("registering SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        let _ = shutdown_tx.send(());
    });

    let metrics = Arc::new(HealthMetrics::new(&cfg.server.addr)?);
    metrics.record_load(&report);

    let state = Arc::new(ApiState {
        store: Arc::new(store),
        defaults: cfg.view.clone(),
        zone: cfg.label_zone()?,
        metrics: Arc::clone(&metrics),
    });

    metrics.start(api::router(state)).await?;

    // Wait for shutdown signal.
    let _ = shutdown_rx.await;

    metrics.stop().await?;

    tracing::info!("heatgrid stopped");

    Ok(())
}
