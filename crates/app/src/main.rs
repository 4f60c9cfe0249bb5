use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use maestro_core::{AppConfig, RoomRegistry, ToneEngine};
use tracing_subscriber::EnvFilter;

mod server;

fn main() -> maestro_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, bind } => run_serve(config.as_ref(), bind),
        Commands::Config { output } => write_default_config(&output),
    }
}

fn run_serve(config_path: Option<&PathBuf>, bind: Option<String>) -> maestro_core::Result<()> {
    let mut config = match config_path {
        Some(path) => AppConfig::from_json_file(path)?,
        None => AppConfig::default(),
    };
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    tracing::info!(
        bind = %config.server.bind,
        tick_hz = config.room.tick_hz,
        model = %config.session.model,
        "starting maestro"
    );

    // One thread: every room, session and connection task is cooperatively
    // scheduled on the same executor.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let engine = Arc::new(ToneEngine::new(config.tone.clone()));
        let registry = RoomRegistry::new(config.clone(), engine)?;
        server::serve(&config.server.bind, registry).await
    })
}

fn write_default_config(output: &PathBuf) -> maestro_core::Result<()> {
    tracing::info!(?output, "writing default configuration");
    std::fs::write(output, AppConfig::default().to_json_pretty()?)?;
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-room bridge from participant controls to generative audio", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept participant connections and steer one generative session per room.
    Serve {
        /// Optional JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Address to listen on, overriding the configuration file.
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Write the default configuration as JSON.
    Config {
        /// Destination path for the configuration file.
        output: PathBuf,
    },
}
