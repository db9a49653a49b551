// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for scanning
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Scanning QR codes from a live camera (or an image served as one)
//! - Scanning a single image file
//! - Showing and saving settings

use chrono::Local;
use qr_reader::backends::camera::v4l2::enumerate_v4l2_cameras;
use qr_reader::backends::camera::{Facing, MediaDevices, V4l2MediaDevices, VirtualMediaDevices};
use qr_reader::config::{SampleInterval, Settings};
use qr_reader::frame_processor::QrDecoder;
use qr_reader::pipeline::{ChannelListener, PipelineController, PipelineEvent};
use qr_reader::still_image;
use qr_reader::surface::{PreviewSurface, SurfaceHost};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Overrides for the stored settings given on the command line
#[derive(Debug, Default)]
pub struct ScanOptions {
    pub facing: Option<Facing>,
    pub interval_ms: Option<u64>,
    pub manual: bool,
    pub resolution: Option<u32>,
    pub device: Option<String>,
    pub source: Option<PathBuf>,
    pub once: bool,
}

/// List all available cameras
pub fn list_cameras() -> Result<(), Box<dyn std::error::Error>> {
    let cameras: Vec<_> = enumerate_v4l2_cameras()
        .into_iter()
        .filter(|c| c.is_video_input())
        .collect();

    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for (index, camera) in cameras.iter().enumerate() {
        println!("  [{}] {}", index, camera.label);
        println!("      Device: {}", camera.device_id);
        if let Some(driver) = &camera.driver {
            println!("      Driver: {}", driver);
        }
        let facing = [Facing::Back, Facing::Front]
            .into_iter()
            .find(|f| f.matches_label(&camera.label));
        if let Some(facing) = facing {
            println!("      Facing: {}", facing);
        }
        println!();
    }

    Ok(())
}

/// Run the live scanning pipeline until Ctrl+C (or the first code with `once`)
pub fn scan(options: ScanOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = Settings::load()?;
    if let Some(device) = options.device.clone() {
        settings.device = Some(device);
    }

    let mut config = settings.capture_config();
    if let Some(facing) = options.facing {
        config.facing = facing;
    }
    if let Some(ms) = options.interval_ms {
        config.sample_interval =
            SampleInterval::from_millis(ms).ok_or("Sample interval must be positive")?;
    }
    if options.manual {
        config.sample_interval = SampleInterval::Disabled;
    }
    if let Some(resolution) = options.resolution {
        config.target_resolution_px = resolution;
    }

    let devices: Arc<dyn MediaDevices> = match &options.source {
        Some(path) => {
            println!("Using image source: {}", path.display());
            Arc::new(VirtualMediaDevices::from_image(path)?)
        }
        None => Arc::new(V4l2MediaDevices::new()),
    };

    // Stop on Ctrl+C
    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel::<()>();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })?;

    // Manual mode: every line on stdin triggers one scan
    let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel::<()>();
    let manual = config.sample_interval.is_disabled();
    if manual {
        println!("Manual mode: press Enter to scan, Ctrl+C to quit");
        std::thread::Builder::new()
            .name("stdin-trigger".to_string())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    if line.is_err() || trigger_tx.send(()).is_err() {
                        break;
                    }
                }
            })?;
    } else {
        println!("Scanning... press Ctrl+C to quit");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let (listener, mut events) = ChannelListener::new();
        let controller = PipelineController::start(
            config,
            devices,
            SurfaceHost::with_surface(Arc::new(PreviewSurface::new())),
            QrDecoder::factory(),
            Arc::new(listener),
        )?;

        let mut payloads = PayloadFilter::new(manual);
        let outcome: Result<(), Box<dyn std::error::Error>> = loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    println!();
                    println!("Stopping...");
                    break Ok(());
                }
                Some(()) = trigger_rx.recv() => controller.scan_now(),
                event = events.recv() => match event {
                    Some(PipelineEvent::StreamReady(ready)) => {
                        println!(
                            "Camera ready: {} ({}x{})",
                            ready.track.label, ready.track.width, ready.track.height
                        );
                    }
                    Some(PipelineEvent::ScanResult { data: Some(data), chunks }) => {
                        if payloads.admit(Some(&data)) {
                            let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
                            println!("[{}] {}", timestamp, data);
                            if chunks.len() > 1 {
                                println!("    ({} codes in view)", chunks.len());
                            }
                        }
                        if options.once {
                            break Ok(());
                        }
                    }
                    Some(PipelineEvent::ScanResult { data: None, .. }) => {
                        payloads.admit(None);
                        if manual {
                            println!("No QR code found");
                        }
                    }
                    Some(PipelineEvent::Error(e)) => break Err(e.into()),
                    None => break Err("Pipeline stopped unexpectedly".into()),
                },
            }
        };

        controller.shutdown().await;
        outcome
    })
}

/// Decides which scan results get printed
///
/// In timed mode a payload is printed once per appearance: repeats are
/// swallowed until a frame without a code (or with another code) arrives.
/// Manual scans are always printed.
struct PayloadFilter {
    manual: bool,
    last: Option<String>,
}

impl PayloadFilter {
    fn new(manual: bool) -> Self {
        Self { manual, last: None }
    }

    /// Record a result; true when a payload should be printed
    fn admit(&mut self, data: Option<&str>) -> bool {
        let Some(data) = data else {
            self.last = None;
            return false;
        };
        if !self.manual && self.last.as_deref() == Some(data) {
            return false;
        }
        self.last = Some(data.to_string());
        true
    }
}

/// Scan a single image file
pub fn scan_image(
    path: PathBuf,
    resolution: Option<u32>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let resolution = match resolution {
        Some(resolution) => resolution,
        None => Settings::load()?.capture.target_resolution_px,
    };

    let response = still_image::scan_file(&path, resolution)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    match &response.data {
        Some(data) => {
            println!("{}", data);
            for (index, chunk) in response.chunks.iter().enumerate().skip(1) {
                if let Some(text) = &chunk.text {
                    println!("[{}] {}", index, text);
                }
            }
            Ok(())
        }
        None => Err(format!("No QR code found in {}", path.display()).into()),
    }
}

/// Print the settings in effect, optionally writing them to the settings file
pub fn show_config(save: bool) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;

    match Settings::default_path() {
        Some(path) => println!("Settings file: {}", path.display()),
        None => println!("Settings file: (no config directory)"),
    }
    println!("{}", serde_json::to_string_pretty(&settings)?);

    if save {
        let path = settings.save()?;
        println!("Saved to {}", path.display());
    }
    Ok(())
}
