// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera backend abstraction

//! Shared types for camera backends

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// Direction a camera is facing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Facing {
    /// Front camera, pointing at the user
    #[serde(rename = "user", alias = "front")]
    Front,
    /// Back camera, pointing away from the user
    #[default]
    #[serde(rename = "environment", alias = "back")]
    Back,
}

impl Facing {
    /// Device label fragments that suggest this facing direction
    pub fn label_patterns(&self) -> &'static [&'static str] {
        match self {
            Facing::Front => crate::constants::facing_labels::FRONT,
            Facing::Back => crate::constants::facing_labels::BACK,
        }
    }

    /// Case-insensitive check of a device label against the facing heuristic
    pub fn matches_label(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        self.label_patterns()
            .iter()
            .any(|pattern| label.contains(pattern))
    }
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Facing::Front => write!(f, "user"),
            Facing::Back => write!(f, "environment"),
        }
    }
}

impl std::str::FromStr for Facing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" | "front" => Ok(Facing::Front),
            "environment" | "back" | "rear" => Ok(Facing::Back),
            other => Err(format!("unknown facing direction '{}'", other)),
        }
    }
}

/// Kind of media device reported by enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    VideoInput,
    AudioInput,
    Other,
}

/// Represents a media device as seen by enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevice {
    /// Opaque id accepted by `VideoConstraints::device_id` (device path for V4L2)
    pub device_id: String,
    /// Human readable label, used by the facing heuristic
    pub label: String,
    pub kind: DeviceKind,
    /// Driver name if the backend knows it
    pub driver: Option<String>,
}

impl CameraDevice {
    /// Convenience constructor for a video input device
    pub fn video_input(device_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            label: label.into(),
            kind: DeviceKind::VideoInput,
            driver: None,
        }
    }

    pub fn is_video_input(&self) -> bool {
        self.kind == DeviceKind::VideoInput
    }
}

/// A constraint name the runtime may understand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstraintName {
    FacingMode,
    FrameRate,
    DeviceId,
    Width,
    Height,
}

/// Set of constraints supported by a media runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    supported: BTreeSet<ConstraintName>,
}

impl CapabilitySet {
    /// Capability set that supports nothing
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: ConstraintName) -> Self {
        self.supported.insert(name);
        self
    }

    pub fn supports(&self, name: ConstraintName) -> bool {
        self.supported.contains(&name)
    }

    pub fn iter(&self) -> impl Iterator<Item = ConstraintName> + '_ {
        self.supported.iter().copied()
    }
}

impl FromIterator<ConstraintName> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = ConstraintName>>(iter: I) -> Self {
        Self {
            supported: iter.into_iter().collect(),
        }
    }
}

/// `{ ideal: facing }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacingConstraint {
    pub ideal: Facing,
}

/// `{ ideal, min }` frame rate range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRateRange {
    pub ideal: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
}

/// Video constraints handed to `MediaDevices::get_user_media`
///
/// Also the shape of the user supplied override in the configuration file,
/// so field names follow the familiar camelCase spelling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facing_mode: Option<FacingConstraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<FrameRateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl VideoConstraints {
    /// Constraints selecting one device by id
    pub fn for_device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..Default::default()
        }
    }

    /// Overlay `overrides` on top of `self`; every field set in `overrides` wins
    pub fn merged_with(self, overrides: &VideoConstraints) -> Self {
        Self {
            facing_mode: overrides.facing_mode.or(self.facing_mode),
            frame_rate: overrides.frame_rate.or(self.frame_rate),
            device_id: overrides.device_id.clone().or(self.device_id),
            width: overrides.width.or(self.width),
            height: overrides.height.or(self.height),
        }
    }
}

/// Pixel layout of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit RGBA, 4 bytes per pixel
    RGBA,
    /// 8-bit luma only
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::RGBA => 4,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// A frame as presented by a render surface
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
    pub format: PixelFormat,
    /// Bytes per row, including any padding
    pub stride: u32,
    pub captured_at: Instant,
}

impl CameraFrame {
    /// Build a tightly packed RGBA frame
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data: Arc::from(data.into_boxed_slice()),
            format: PixelFormat::RGBA,
            stride: width * 4,
            captured_at: Instant::now(),
        }
    }
}

/// Metadata of the live track
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackInfo {
    pub label: String,
    pub device_id: Option<String>,
    /// Facing reported by the device, if it knows
    pub facing: Option<Facing>,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<u32>,
}

/// Receiving end of a stream's latest-frame slot
pub type FrameReceiver = watch::Receiver<Option<Arc<CameraFrame>>>;

/// Sending end of a stream's latest-frame slot
pub type FrameSender = watch::Sender<Option<Arc<CameraFrame>>>;
