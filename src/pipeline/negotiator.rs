// SPDX-License-Identifier: GPL-3.0-only

//! Capture constraint negotiation
//!
//! Runtimes that understand facing constraints (or that ignore device ids
//! anyway) get capability based constraints straight away. Everything else
//! needs a device probe: the device list is enumerated and one camera is
//! picked by its label.

use crate::backends::camera::{
    CameraDevice, CapabilitySet, ConstraintName, Facing, FacingConstraint, FrameRateRange,
    MediaDevices, VideoConstraints,
};
use crate::config::CaptureConfig;
use crate::constants::frame_rate;
use crate::errors::{ScanError, ScanResult};
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a negotiation: either known right away or after a device probe
pub enum Negotiation {
    Ready(VideoConstraints),
    Pending(BoxFuture<'static, ScanResult<VideoConstraints>>),
}

impl Negotiation {
    pub fn is_ready(&self) -> bool {
        matches!(self, Negotiation::Ready(_))
    }

    /// Wait for the constraints
    pub async fn resolve(self) -> ScanResult<VideoConstraints> {
        match self {
            Negotiation::Ready(constraints) => Ok(constraints),
            Negotiation::Pending(probe) => probe.await,
        }
    }
}

impl std::fmt::Debug for Negotiation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Negotiation::Ready(constraints) => f.debug_tuple("Ready").field(constraints).finish(),
            Negotiation::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// Turns a capture configuration into stream constraints
#[derive(Clone)]
pub struct ConstraintNegotiator {
    devices: Arc<dyn MediaDevices>,
}

impl ConstraintNegotiator {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self { devices }
    }

    pub fn negotiate(
        &self,
        config: &CaptureConfig,
        capabilities: &CapabilitySet,
        fallback_runtime: bool,
    ) -> Negotiation {
        if capabilities.supports(ConstraintName::FacingMode) || fallback_runtime {
            let constraints = match &config.explicit_constraints {
                Some(explicit) => explicit.clone(),
                None => capability_constraints(config.facing, capabilities),
            };
            debug!(?constraints, fallback_runtime, "Constraints resolved from capabilities");
            return Negotiation::Ready(constraints);
        }

        let enumerate = self.devices.enumerate_devices();
        let facing = config.facing;
        let explicit = config.explicit_constraints.clone();

        Negotiation::Pending(Box::pin(async move {
            let devices = enumerate.await?;
            let constraints = match (choose_device(&devices, facing), explicit) {
                (Some(device), explicit) => {
                    info!(device = %device.device_id, label = %device.label, %facing, "Selected camera by probing");
                    let by_device = VideoConstraints::for_device(device.device_id.clone());
                    match explicit {
                        Some(explicit) => by_device.merged_with(&explicit),
                        None => by_device,
                    }
                }
                (None, Some(explicit)) => {
                    debug!("No video input enumerated, using explicit constraints as-is");
                    explicit
                }
                (None, None) => return Err(ScanError::NoCapableDeviceFound),
            };
            Ok(constraints)
        }))
    }
}

/// `{facing_mode: {ideal}}` plus a frame rate hint when the runtime takes one
pub fn capability_constraints(facing: Facing, capabilities: &CapabilitySet) -> VideoConstraints {
    let frame_rate = capabilities
        .supports(ConstraintName::FrameRate)
        .then_some(FrameRateRange {
            ideal: frame_rate::IDEAL,
            min: Some(frame_rate::MIN),
        });

    VideoConstraints {
        facing_mode: Some(FacingConstraint { ideal: facing }),
        frame_rate,
        ..Default::default()
    }
}

/// First video input whose label matches `facing`, else the first video input
pub fn choose_device(devices: &[CameraDevice], facing: Facing) -> Option<&CameraDevice> {
    let mut cameras = devices.iter().filter(|d| d.is_video_input());
    let first = cameras.clone().next();
    cameras.find(|d| facing.matches_label(&d.label)).or(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{DeviceKind, VirtualMediaDevices};

    fn devices(labels: &[&str]) -> Vec<CameraDevice> {
        labels
            .iter()
            .enumerate()
            .map(|(i, label)| CameraDevice::video_input(format!("cam-{}", i), *label))
            .collect()
    }

    #[test]
    fn test_choose_device_by_label() {
        let list = devices(&["Integrated Front Camera", "Rear Camera"]);
        assert_eq!(choose_device(&list, Facing::Back).unwrap().device_id, "cam-1");
        assert_eq!(choose_device(&list, Facing::Front).unwrap().device_id, "cam-0");
    }

    #[test]
    fn test_choose_device_defaults_to_first_camera() {
        let mut list = vec![CameraDevice {
            device_id: "mic".to_string(),
            label: "Back microphone".to_string(),
            kind: DeviceKind::AudioInput,
            driver: None,
        }];
        list.extend(devices(&["USB Camera", "HD Webcam"]));
        assert_eq!(choose_device(&list, Facing::Back).unwrap().device_id, "cam-0");
        assert!(choose_device(&list[..1], Facing::Back).is_none());
    }

    #[test]
    fn test_capability_constraints_without_frame_rate() {
        let caps = CapabilitySet::empty().with(ConstraintName::FacingMode);
        let constraints = capability_constraints(Facing::Front, &caps);
        assert_eq!(constraints.facing_mode.map(|f| f.ideal), Some(Facing::Front));
        assert!(constraints.frame_rate.is_none());
    }

    #[tokio::test]
    async fn test_explicit_constraints_win_when_facing_supported() {
        let negotiator = ConstraintNegotiator::new(Arc::new(VirtualMediaDevices::new()));
        let explicit = VideoConstraints {
            width: Some(1920),
            ..Default::default()
        };
        let config = CaptureConfig {
            explicit_constraints: Some(explicit.clone()),
            ..Default::default()
        };
        let caps = CapabilitySet::empty()
            .with(ConstraintName::FacingMode)
            .with(ConstraintName::FrameRate);

        let negotiation = negotiator.negotiate(&config, &caps, false);
        assert!(negotiation.is_ready());
        assert_eq!(negotiation.resolve().await.unwrap(), explicit);
    }

    #[tokio::test]
    async fn test_fallback_runtime_skips_probe() {
        let negotiator = ConstraintNegotiator::new(Arc::new(
            VirtualMediaDevices::new().with_devices(Vec::new()),
        ));
        let negotiation =
            negotiator.negotiate(&CaptureConfig::default(), &CapabilitySet::empty(), true);
        assert!(negotiation.is_ready());
        let constraints = negotiation.resolve().await.unwrap();
        assert_eq!(constraints.facing_mode.map(|f| f.ideal), Some(Facing::Back));
    }

    #[tokio::test]
    async fn test_probe_merges_explicit_constraints() {
        let runtime = VirtualMediaDevices::new().with_devices(devices(&["Back Camera"]));
        let negotiator = ConstraintNegotiator::new(Arc::new(runtime));
        let config = CaptureConfig {
            explicit_constraints: Some(VideoConstraints {
                height: Some(480),
                ..Default::default()
            }),
            ..Default::default()
        };

        let constraints = negotiator
            .negotiate(&config, &CapabilitySet::empty(), false)
            .resolve()
            .await
            .unwrap();
        assert_eq!(constraints.device_id.as_deref(), Some("cam-0"));
        assert_eq!(constraints.height, Some(480));
        assert!(constraints.facing_mode.is_none());
    }

    #[tokio::test]
    async fn test_no_device_without_explicit_constraints_fails() {
        let negotiator = ConstraintNegotiator::new(Arc::new(
            VirtualMediaDevices::new().with_devices(Vec::new()),
        ));
        let result = negotiator
            .negotiate(&CaptureConfig::default(), &CapabilitySet::empty(), false)
            .resolve()
            .await;
        assert_eq!(result, Err(ScanError::NoCapableDeviceFound));
    }
}
