mod pipeline;

pub use pipeline::{Pipeline, WatchHandle};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use radar_capture::FileCapture;
use radar_data::{DeploymentConfig, DistrictCatalog};
use radar_report::{build_report, ReportQuery};
use radar_state::{records_for_run, RunArchive};
use radar_vision::{run_cycle_with, CycleOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "radar-watch", about = "District precipitation levels from weather radar screenshots")]
struct Cli {
    /// Directory holding deployment.json; relative paths in it resolve here
    #[arg(long, global = true, default_value = ".")]
    data_dir: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture, classify and archive on the configured interval until Ctrl-C
    Watch {
        /// Screenshot to read each cycle (defaults to the configured path)
        #[arg(long)]
        screenshot: Option<PathBuf>,
        /// Stop after the first completed cycle
        #[arg(long)]
        once: bool,
        /// Classify districts on worker threads
        #[arg(long)]
        parallel: bool,
        /// Skip storing each district's isolated image with the run
        #[arg(long)]
        no_masked: bool,
    },
    /// Classify one already-cropped radar image and print the results as JSON
    Classify {
        image: PathBuf,
        /// Comma-separated district names (defaults to every district in the geometry file)
        #[arg(long)]
        districts: Option<String>,
        #[arg(long)]
        parallel: bool,
    },
    /// Build a report from the archive
    Report {
        /// YYYY-MM-DD, defaults to today
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        district: Option<String>,
        /// HH:MM
        #[arg(long)]
        start: Option<String>,
        /// HH:MM
        #[arg(long)]
        end: Option<String>,
        /// Output root (defaults to <archive>/report_images)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "radar_watch=debug,radar_capture=debug,radar_vision=debug".into()),
        )
        .init();
}

pub fn run() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = DeploymentConfig::load(&cli.data_dir)?;
    info!("Data directory: {}", cli.data_dir.display());

    match cli.command {
        Commands::Watch {
            screenshot,
            once,
            parallel,
            no_masked,
        } => {
            let pipeline = Pipeline::new(config.clone())?
                .parallel(parallel)
                .save_masked(!no_masked);
            let source = FileCapture::new(pipeline::screenshot_path(&config, screenshot));
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(watch(Arc::new(pipeline), source, once))
        }
        Commands::Classify {
            image,
            districts,
            parallel,
        } => classify(&config, image, districts, parallel),
        Commands::Report {
            date,
            district,
            start,
            end,
            out,
        } => {
            let query = ReportQuery::resolve(
                date.as_deref(),
                start.as_deref(),
                end.as_deref(),
                district.as_deref(),
                Local::now().naive_local(),
            );
            let catalog = DistrictCatalog::load(&config.geometry_path, &config.region)
                .map_err(|e| warn!("{:#}. Reporting without district geometry", e))
                .ok();
            let archive = RunArchive::new(config.archive_dir.clone());
            let out_root = out.unwrap_or_else(|| config.archive_dir.join("report_images"));
            let (report, dir) = build_report(&config, &archive, catalog.as_ref(), &query, &out_root)?;
            info!(
                "Report for {} ({}): {} record(s), {} image set(s) in {}",
                report.query.date,
                report.district,
                report.records.len(),
                report.images.len(),
                dir.display()
            );
            Ok(())
        }
    }
}

async fn watch(pipeline: Arc<Pipeline>, source: FileCapture, once: bool) -> Result<()> {
    let mut handle = pipeline.start(source);
    loop {
        tokio::select! {
            run = handle.next_run() => {
                let Some(run) = run else {
                    warn!("Pipeline shut down");
                    break;
                };
                for result in run.with_signal() {
                    info!("{}: {}", result.district, result.text());
                }
                if once {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }
    handle.stop();
    Ok(())
}

fn classify(config: &DeploymentConfig, image: PathBuf, districts: Option<String>, parallel: bool) -> Result<()> {
    let base = radar_capture::load_frame(&image)?;
    let catalog = DistrictCatalog::load(&config.geometry_path, &config.region)?;
    let districts = match districts {
        Some(names) => {
            let names: Vec<String> = names
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            catalog.resolve(&names)
        }
        None => catalog.districts(),
    };

    let run = run_cycle_with(
        &base,
        Local::now(),
        &districts,
        config.bbox,
        &config.legend,
        config.tolerance,
        CycleOptions { parallel },
    )?;

    let json = serde_json::to_string_pretty(&records_for_run(&run)).context("Failed to serialize results")?;
    println!("{}", json);
    for failure in &run.skipped {
        warn!("{}: {}", failure.district, failure.reason);
    }
    Ok(())
}
