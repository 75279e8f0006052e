use std::path::PathBuf;

use anyhow::Result;
use apimon_service::{Config, Runtime};
use clap::Parser;
use tracing::{info, level_filters::LevelFilter};

#[derive(Parser, Debug)]
#[command(version, about = "Scheduler, worker and escalation engine for apimon")]
struct Cli {
    /// Path to the TOML config, created with defaults if missing
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Region to execute for, replaces service.regions (repeatable)
    #[arg(short, long = "region")]
    regions: Vec<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.verbose {
        logger::init_tracing_with(LevelFilter::DEBUG);
    } else {
        logger::init_tracing();
    }

    let mut config = Config::from_config(cli.config.as_ref())?;
    if !cli.regions.is_empty() {
        config.service.regions = cli.regions;
    }

    if cli.print_config {
        println!("{config}");
        return Ok(());
    }

    let mut runtime = Runtime::build(config).await?;
    runtime.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    runtime.shutdown();
    Ok(())
}
