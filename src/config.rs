// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::{Facing, VideoConstraints};
use crate::constants::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_RESOLUTION_PX, DEFAULT_SAMPLE_INTERVAL_MS,
    MAX_RESOLUTION_PX,
};
use crate::errors::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Delay between two samples, or manual sampling
///
/// Stored as a number of milliseconds, or `false` for manual sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IntervalRepr", into = "IntervalRepr")]
pub enum SampleInterval {
    /// Sample again this long after each decode reply
    Every(Duration),
    /// Sample once at playback start, then only on request
    Disabled,
}

impl Default for SampleInterval {
    fn default() -> Self {
        SampleInterval::Every(Duration::from_millis(DEFAULT_SAMPLE_INTERVAL_MS))
    }
}

impl SampleInterval {
    /// Interval from milliseconds; zero is not a valid interval
    pub fn from_millis(ms: u64) -> Option<Self> {
        (ms > 0).then(|| SampleInterval::Every(Duration::from_millis(ms)))
    }

    pub fn delay(&self) -> Option<Duration> {
        match self {
            SampleInterval::Every(delay) => Some(*delay),
            SampleInterval::Disabled => None,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, SampleInterval::Disabled)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum IntervalRepr {
    Millis(u64),
    Flag(bool),
}

impl TryFrom<IntervalRepr> for SampleInterval {
    type Error = String;

    fn try_from(repr: IntervalRepr) -> Result<Self, Self::Error> {
        match repr {
            IntervalRepr::Millis(ms) => SampleInterval::from_millis(ms)
                .ok_or_else(|| "sample interval must be positive".to_string()),
            IntervalRepr::Flag(false) => Ok(SampleInterval::Disabled),
            IntervalRepr::Flag(true) => Ok(SampleInterval::default()),
        }
    }
}

impl From<SampleInterval> for IntervalRepr {
    fn from(interval: SampleInterval) -> Self {
        match interval {
            SampleInterval::Every(delay) => IntervalRepr::Millis(delay.as_millis() as u64),
            SampleInterval::Disabled => IntervalRepr::Flag(false),
        }
    }
}

/// Configuration of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Camera direction to ask for
    pub facing: Facing,
    pub sample_interval: SampleInterval,
    /// Edge length of the square buffer handed to the decoder
    pub target_resolution_px: u32,
    /// Constraints used instead of the negotiated ones
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explicit_constraints: Option<VideoConstraints>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            facing: Facing::Back,
            sample_interval: SampleInterval::default(),
            target_resolution_px: DEFAULT_RESOLUTION_PX,
            explicit_constraints: None,
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> ScanResult<()> {
        check_resolution(self.target_resolution_px)
    }

    /// Compare the reactive fields of two configurations
    ///
    /// Only facing, explicit constraints and the sample interval are
    /// reactive; the resolution is picked up by the next restart.
    pub fn diff(&self, next: &CaptureConfig) -> ConfigChange {
        let interval = match (self.sample_interval, next.sample_interval) {
            (old, new) if old == new => IntervalChange::Unchanged,
            (_, SampleInterval::Disabled) => IntervalChange::Disabled,
            (SampleInterval::Disabled, SampleInterval::Every(_)) => IntervalChange::Enabled,
            (SampleInterval::Every(_), SampleInterval::Every(_)) => IntervalChange::Retimed,
        };

        ConfigChange {
            source_changed: self.facing != next.facing
                || self.explicit_constraints != next.explicit_constraints,
            interval,
        }
    }
}

/// Reject decoder buffer sizes outside `1..=MAX_RESOLUTION_PX`
pub fn check_resolution(px: u32) -> ScanResult<()> {
    if px == 0 {
        return Err(ScanError::Config(
            "target resolution must be positive".to_string(),
        ));
    }
    if px > MAX_RESOLUTION_PX {
        return Err(ScanError::Config(format!(
            "target resolution {} exceeds the maximum of {}",
            px, MAX_RESOLUTION_PX
        )));
    }
    Ok(())
}

/// How the sample interval changed between two configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalChange {
    Unchanged,
    /// Switched to manual sampling
    Disabled,
    /// Switched from manual to timed sampling
    Enabled,
    /// Timed before and after, with a different delay
    Retimed,
}

/// Reactive difference between two configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigChange {
    /// Facing or explicit constraints changed
    pub source_changed: bool,
    pub interval: IntervalChange,
}

impl ConfigChange {
    /// Whether the pipeline must be torn down and started again
    pub fn requires_restart(&self) -> bool {
        self.source_changed || self.interval == IntervalChange::Disabled
    }
}

/// Persistent user settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub capture: CaptureConfig,
    /// Preferred V4L2 device path, overrides facing based selection
    pub device: Option<String>,
}

impl Settings {
    /// Default settings file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from the default location; defaults when there is no file
    pub fn load() -> ScanResult<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No config directory on this system, using default settings");
                Ok(Self::default())
            }
        }
    }

    /// Load from `path`; defaults when the file does not exist
    pub fn load_from(path: &Path) -> ScanResult<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Settings file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let settings: Settings = serde_json::from_str(&contents)
            .map_err(|e| ScanError::Config(format!("{}: {}", path.display(), e)))?;
        settings.capture.validate()?;
        debug!(path = %path.display(), "Settings loaded");
        Ok(settings)
    }

    /// Save to the default location
    pub fn save(&self) -> ScanResult<PathBuf> {
        let path = Self::default_path()
            .ok_or_else(|| ScanError::Config("no config directory on this system".to_string()))?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Write pretty JSON to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> ScanResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Settings saved");
        Ok(())
    }

    /// Capture configuration with the preferred device applied
    pub fn capture_config(&self) -> CaptureConfig {
        let mut config = self.capture.clone();
        if let Some(device) = &self.device {
            let device_constraints = VideoConstraints::for_device(device.clone());
            config.explicit_constraints = Some(match config.explicit_constraints.take() {
                Some(explicit) => device_constraints.merged_with(&explicit),
                None => device_constraints,
            });
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_serializes_as_millis_or_false() {
        let every = SampleInterval::from_millis(250).unwrap();
        assert_eq!(serde_json::to_string(&every).unwrap(), "250");
        assert_eq!(serde_json::to_string(&SampleInterval::Disabled).unwrap(), "false");

        let parsed: SampleInterval = serde_json::from_str("false").unwrap();
        assert_eq!(parsed, SampleInterval::Disabled);
        let parsed: SampleInterval = serde_json::from_str("750").unwrap();
        assert_eq!(parsed.delay(), Some(Duration::from_millis(750)));
        assert!(serde_json::from_str::<SampleInterval>("0").is_err());
    }

    #[test]
    fn test_diff_only_sees_reactive_fields() {
        let base = CaptureConfig::default();

        let mut resized = base.clone();
        resized.target_resolution_px = 300;
        let change = base.diff(&resized);
        assert!(!change.source_changed);
        assert_eq!(change.interval, IntervalChange::Unchanged);
        assert!(!change.requires_restart());

        let mut flipped = base.clone();
        flipped.facing = Facing::Front;
        assert!(base.diff(&flipped).requires_restart());

        let mut manual = base.clone();
        manual.sample_interval = SampleInterval::Disabled;
        assert_eq!(base.diff(&manual).interval, IntervalChange::Disabled);
        assert!(base.diff(&manual).requires_restart());
        assert_eq!(manual.diff(&base).interval, IntervalChange::Enabled);
        assert!(!manual.diff(&base).requires_restart());

        let mut faster = base.clone();
        faster.sample_interval = SampleInterval::from_millis(100).unwrap();
        assert_eq!(base.diff(&faster).interval, IntervalChange::Retimed);
        assert!(!base.diff(&faster).requires_restart());
    }

    #[test]
    fn test_preferred_device_becomes_explicit_constraint() {
        let settings = Settings {
            device: Some("/dev/video2".to_string()),
            ..Default::default()
        };
        let config = settings.capture_config();
        assert_eq!(
            config.explicit_constraints.and_then(|c| c.device_id).as_deref(),
            Some("/dev/video2")
        );
    }

    #[test]
    fn test_zero_resolution_is_rejected() {
        let config = CaptureConfig {
            target_resolution_px: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ScanError::Config(_))));
    }

    #[test]
    fn test_resolution_upper_bound() {
        let mut config = CaptureConfig {
            target_resolution_px: MAX_RESOLUTION_PX,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.target_resolution_px = 40_000;
        assert!(matches!(config.validate(), Err(ScanError::Config(_))));
    }
}
