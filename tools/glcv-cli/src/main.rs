//! glcv CLI — bake timeline templates into video files.
//!
//! Usage:
//!   glcv bake <REQUEST.json>   Bake a template into a video file
//!   glcv worker                Serve one bake over stdin/stdout (JSON lines)
//!   glcv probe <FILE>          Show media information
//!   glcv check                 Check codec backends

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use glcv_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "glcv",
    about = "Offline timeline compositor and MP4 baker",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bake a template into a video file
    Bake {
        /// Path to the bake request (JSON)
        request: PathBuf,

        /// Output file path (overrides the request)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Codec backend: gst|software
        #[arg(long)]
        backend: Option<String>,

        /// Run the bake in a separate worker process
        #[arg(long)]
        isolated: bool,
    },

    /// Serve a single bake over stdin/stdout
    #[command(hide = true)]
    Worker {
        /// Codec backend: gst|software
        #[arg(long)]
        backend: Option<String>,
    },

    /// Show media information
    Probe {
        /// Path to an image or video file
        path: PathBuf,

        /// Codec backend: gst|software
        #[arg(long)]
        backend: Option<String>,

        /// Print the metadata as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check codec backends
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load();

    // Initialize logging
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = glcv_common::logging::level_for(true).to_string();
    }
    glcv_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Bake {
            request,
            output,
            backend,
            isolated,
        } => {
            let backend = commands::backend_kind(backend.as_deref(), &config.bake)?;
            let options = commands::bake::BakeOptions {
                request,
                output,
                backend,
                isolated,
                verbose: cli.verbose,
            };
            commands::bake::run(options, &config.bake).await
        }
        Commands::Worker { backend } => {
            let backend = commands::backend_kind(backend.as_deref(), &config.bake)?;
            commands::worker::run(backend, config.bake.clone()).await
        }
        Commands::Probe {
            path,
            backend,
            json,
        } => {
            let backend = commands::backend_kind(backend.as_deref(), &config.bake)?;
            commands::probe::run(path, backend, json)
        }
        Commands::Check => commands::check::run(&config.bake),
    }
}
