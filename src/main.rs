// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use qr_reader::backends::camera::Facing;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "qr-reader")]
#[command(about = "Scan QR codes from a live camera")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// Scan QR codes from a camera
    Scan {
        /// Camera direction to use (user/front or environment/back)
        #[arg(short, long)]
        facing: Option<Facing>,

        /// Delay between two samples in milliseconds
        #[arg(short, long, conflicts_with = "manual")]
        interval_ms: Option<u64>,

        /// Only scan when Enter is pressed
        #[arg(short, long)]
        manual: bool,

        /// Edge length of the square image handed to the decoder
        #[arg(short, long)]
        resolution: Option<u32>,

        /// V4L2 device path (from 'qr-reader list')
        #[arg(short, long)]
        device: Option<String>,

        /// Serve this image file as the camera instead of a real device
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Exit after the first decoded code
        #[arg(long)]
        once: bool,
    },

    /// Scan a QR code in an image file
    Image {
        /// Image file to scan
        path: PathBuf,

        /// Edge length of the square image handed to the decoder
        #[arg(short, long)]
        resolution: Option<u32>,

        /// Print the full decode result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the settings in effect
    Config {
        /// Write the settings file (creates it with defaults if missing)
        #[arg(long)]
        save: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=qr_reader=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => cli::list_cameras(),
        Commands::Scan {
            facing,
            interval_ms,
            manual,
            resolution,
            device,
            source,
            once,
        } => cli::scan(cli::ScanOptions {
            facing,
            interval_ms,
            manual,
            resolution,
            device,
            source,
            once,
        }),
        Commands::Image {
            path,
            resolution,
            json,
        } => cli::scan_image(path, resolution, json),
        Commands::Config { save } => cli::show_config(save),
    }
}
