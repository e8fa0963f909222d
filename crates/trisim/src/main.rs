mod logging;

use std::path::PathBuf;

use clap::Parser;

use trisim_core::engine::OmcEngine;
use trisim_core::handler::HandlerRegistry;
use trisim_core::{RunConfig, SweepOrchestrator};

#[derive(Parser, Debug)]
#[command(name = "trisim")]
#[command(about = "Tritium fuel-cycle simulation sweeps over an external Modelica engine")]
struct Args {
    /// Path to the JSON run configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// OpenModelica compiler binary to drive
    #[arg(long, default_value = "omc")]
    omc_bin: PathBuf,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let config = RunConfig::from_file(&args.config)?;
    std::fs::create_dir_all(&config.paths.results_dir)?;
    logging::init_logging(&config.paths.results_dir, &args.log_level)?;
    tracing::info!(config_path = %args.config.display(), "loaded run configuration");

    let engine = OmcEngine::new(args.omc_bin);
    let handlers = HandlerRegistry::new();
    let summary = SweepOrchestrator::new(&config, &engine, &handlers).run()?;

    tracing::info!(
        succeeded = summary.succeeded,
        total = summary.total_jobs,
        "sweep finished"
    );
    println!(
        "{} of {} jobs produced results (store: {})",
        summary.succeeded,
        summary.total_jobs,
        config.paths.results_dir.display()
    );
    Ok(())
}
