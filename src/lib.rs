// SPDX-License-Identifier: MPL-2.0

//! QR Reader - live camera QR code scanning
//!
//! This library provides a scanning pipeline that negotiates a camera
//! stream, samples its frames on a timer and hands square crops to a decode
//! worker running on its own thread.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`pipeline`]: Negotiation, stream lifecycle, sampling, decode channel and
//!   the controller tying them together
//! - [`backends`]: Media runtimes (V4L2 and an in-memory virtual camera)
//! - [`surface`]: Render surfaces the stream is presented on
//! - [`frame_processor`]: The QR decoder run by the decode worker
//! - [`config`]: Capture configuration and persistent settings
//! - [`still_image`]: Scanning single image files
//!
//! # Example
//!
//! ```ignore
//! let surface = Arc::new(PreviewSurface::new());
//! let (listener, mut events) = ChannelListener::new();
//! let controller = PipelineController::start(
//!     CaptureConfig::default(),
//!     Arc::new(V4l2MediaDevices::new()),
//!     SurfaceHost::with_surface(surface),
//!     QrDecoder::factory(),
//!     Arc::new(listener),
//! )?;
//! while let Some(event) = events.recv().await { /* ... */ }
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod frame_processor;
pub mod pipeline;
pub mod still_image;
pub mod surface;

// Re-export commonly used types
pub use backends::camera::{Facing, MediaDevices, V4l2MediaDevices, VirtualMediaDevices};
pub use config::{CaptureConfig, SampleInterval, Settings};
pub use errors::{AcquisitionError, ScanError, ScanResult};
pub use frame_processor::QrDecoder;
pub use pipeline::{ChannelListener, PipelineController, PipelineEvent, ScanListener};
pub use surface::{PreviewSurface, SurfaceHost};
