//! flowline - Command-line entry point
//!
//! Scans directories for files with a given extension and prints the size
//! of every match. Each directory is one unit of work flowing through a
//! three-stage pipeline: find files, open them, measure them.

use clap::Parser;
use flowline::{
    config::FlowConfig,
    error::{Result, ResultExt},
    pipeline::{Pipeline, Stage},
    stages::fs::{all_files, file_sizes, open_files, FsPayload},
    Unit,
};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "flowline")]
#[command(version)]
#[command(about = "Print the size of every file with a given extension", long_about = None)]
struct Args {
    /// Pipeline configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// File extension to match, with or without the leading dot
    suffix: String,

    /// Directories to scan recursively
    #[arg(required = true)]
    dirs: Vec<PathBuf>,
}

fn scan(args: Args) -> Result<usize> {
    let config = match &args.config {
        Some(path) => FlowConfig::load(path)?,
        None => FlowConfig::default(),
    };
    tracing::debug!("Using {:?}", config);

    let mut pipeline: Pipeline<FsPayload> = Pipeline::new(config.buffer_size);
    pipeline
        .then_stage(Stage::named("find", all_files(args.suffix.clone())))
        .then_stage(Stage::named("open", open_files(OpenOptions::new().read(true).clone())))
        .then_stage(Stage::named("measure", file_sizes()));

    let failures = Arc::new(AtomicUsize::new(0));
    let callback = {
        let failures = Arc::clone(&failures);
        move |unit: Unit<FsPayload>| {
            if let Some(err) = unit.err() {
                failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(unit = %unit.id(), "Scan failed: {:#}", err);
                return;
            }
            if let FsPayload::Sizes(sizes) = unit.payload() {
                for size in sizes {
                    println!("{}\t{}", size.size, size.path.display());
                }
            }
        }
    };

    pipeline
        .run(callback, config.run_options())
        .context("Failed to start pipeline")?;
    for dir in args.dirs {
        pipeline
            .feed(FsPayload::Path(dir.clone()))
            .with_context(|| format!("Failed to queue {:?}", dir))?;
    }
    pipeline.wait();

    let stats = pipeline.stats();
    tracing::info!(
        "Scanned {} directories ({} ok, {} failed)",
        stats.fed,
        stats.completed,
        stats.failed
    );
    Ok(failures.load(Ordering::Relaxed))
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,flowline=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match scan(args) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            tracing::warn!("{} directories could not be scanned", failed);
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
