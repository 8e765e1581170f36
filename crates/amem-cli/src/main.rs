use amem_core::MemoryConfig;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;
mod tools;

use commands::{handle_memory_command, MemoryCommand};

#[derive(Parser, Debug)]
#[command(name = "amem")]
#[command(about = "Project memory: observations, search, timeline and task sync", long_about = None)]
struct Cli {
    /// Project root holding .opencode/memory and .beads
    #[arg(long, global = true, env = "AMEM_PROJECT_ROOT")]
    root: Option<PathBuf>,
    #[arg(long, global = true, env = "AMEM_MEMORY_DIR")]
    memory_dir: Option<PathBuf>,
    #[arg(long, global = true, env = "AMEM_BEADS_DIR")]
    beads_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: MemoryCommand,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = resolve_config(&cli)?;
    debug!(
        "config_resolved: memory_dir={} beads_dir={}",
        config.memory_dir.display(),
        config.beads_dir.display()
    );
    handle_memory_command(cli.command, &config)
}

fn resolve_config(cli: &Cli) -> Result<MemoryConfig> {
    let root = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };

    let mut config = MemoryConfig::for_project(root);
    if let Some(memory_dir) = &cli.memory_dir {
        config = config.with_memory_dir(memory_dir);
    }
    if let Some(beads_dir) = &cli.beads_dir {
        config = config.with_beads_dir(beads_dir);
    }
    Ok(config)
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        let level = std::env::var("AMEM_LOG_LEVEL").unwrap_or_else(|_| "warn".to_string());
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
