//! barlight CLI - drives an LED bar fixture.
//!
//! This is the main binary entry point. See the `barlight` library for the
//! core functionality.

use std::path::PathBuf;

use anyhow::{Context, Result};
use barlight::{commands, Config};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "barlight")]
#[command(version)]
#[command(about = "Frame scheduler and animation host for LED bar fixtures")]
struct Cli {
    /// Config file (default: <config dir>/barlight/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler, driver and control server until Ctrl-C
    Run {
        /// Raw file of concatenated RGB frames to play at startup
        #[arg(long)]
        frames: Option<PathBuf>,
    },
    /// Load and validate the configuration, then print it
    CheckConfig,
    /// Render a Lua animation without hardware and report the result
    TryAnimation {
        /// Lua source file
        file: PathBuf,
        /// Number of frames to render
        #[arg(long, default_value_t = 30)]
        frames: usize,
    },
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();

    if let Ok(path) = std::env::var("BARLIGHT_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }

    builder.init();
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { frames } => commands::run::run(&config, frames.as_deref()),
        Commands::CheckConfig => commands::check_config(&config),
        Commands::TryAnimation { file, frames } => {
            commands::try_animation::run(&config, &file, frames)
        }
    }
}
