// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the scanning pipeline controller

mod common;

use common::{ScriptedDecoder, gray_frame, next_event, next_scan_result};
use qr_reader::backends::camera::{
    CameraDevice, CapabilitySet, ConstraintName, Facing, FacingConstraint, FrameRateRange,
    VirtualMediaDevices,
};
use qr_reader::config::{CaptureConfig, SampleInterval};
use qr_reader::errors::{AcquisitionError, ScanError};
use qr_reader::pipeline::{
    ChannelListener, PipelineController, PipelineEvent, PipelineState, SamplingPhase,
    decoder_factory,
};
use qr_reader::surface::{PreviewSurface, SurfaceHost};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn start(
    config: CaptureConfig,
    runtime: &VirtualMediaDevices,
    decoder: &ScriptedDecoder,
) -> (
    PipelineController,
    tokio::sync::mpsc::UnboundedReceiver<PipelineEvent>,
) {
    let (listener, events) = ChannelListener::new();
    let controller = PipelineController::start(
        config,
        Arc::new(runtime.clone()),
        SurfaceHost::with_surface(Arc::new(PreviewSurface::new())),
        decoder.factory(),
        Arc::new(listener),
    )
    .unwrap();
    (controller, events)
}

#[tokio::test(start_paused = true)]
async fn test_back_camera_end_to_end() {
    let runtime = VirtualMediaDevices::new().with_frame(gray_frame(1280, 720));
    let decoder = ScriptedDecoder::replying(None);
    let (controller, mut events) = start(CaptureConfig::default(), &runtime, &decoder);

    match next_event(&mut events).await {
        PipelineEvent::StreamReady(ready) => {
            assert!(!ready.is_front_facing);
            assert_eq!((ready.track.width, ready.track.height), (1280, 720));
        }
        other => panic!("expected stream ready, got {:?}", other),
    }

    let requests = runtime.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].facing_mode,
        Some(FacingConstraint {
            ideal: Facing::Back
        })
    );
    assert_eq!(
        requests[0].frame_rate,
        Some(FrameRateRange {
            ideal: 25,
            min: Some(10)
        })
    );
    assert!(requests[0].device_id.is_none());

    assert_eq!(next_scan_result(&mut events).await, (None, 0));
    let first = Instant::now();
    assert_eq!(decoder.sizes(), vec![(600, 600)]);

    let mut state = controller.subscribe_state();
    let snapshot = *state.wait_for(|s| s.timer_pending).await.unwrap();
    assert!(!snapshot.decode_in_flight);
    assert!(snapshot.stream_live);
    assert_eq!(snapshot.state, PipelineState::Sampling(SamplingPhase::AwaitSurface));

    assert_eq!(next_scan_result(&mut events).await, (None, 0));
    let elapsed = first.elapsed();
    assert!(elapsed >= Duration::from_millis(500), "rescheduled after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(600), "rescheduled after {:?}", elapsed);
    assert_eq!(decoder.calls(), 2);

    controller.shutdown().await;
    assert_eq!(runtime.live_tracks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_manual_mode_scans_once_per_trigger() {
    let runtime = VirtualMediaDevices::new();
    let decoder = ScriptedDecoder::replying(Some("hello"));
    let config = CaptureConfig {
        sample_interval: SampleInterval::Disabled,
        ..Default::default()
    };
    let (controller, mut events) = start(config, &runtime, &decoder);

    assert_eq!(next_scan_result(&mut events).await, (Some("hello".to_string()), 0));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(decoder.calls(), 1);
    assert!(!controller.snapshot().timer_pending);

    controller.scan_now();
    assert_eq!(next_scan_result(&mut events).await, (Some("hello".to_string()), 0));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(decoder.calls(), 2);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_enabling_interval_resumes_sampling_without_restart() {
    let runtime = VirtualMediaDevices::new();
    let decoder = ScriptedDecoder::replying(None);
    let manual = CaptureConfig {
        sample_interval: SampleInterval::Disabled,
        ..Default::default()
    };
    let (controller, mut events) = start(manual.clone(), &runtime, &decoder);
    next_scan_result(&mut events).await;

    let timed = CaptureConfig {
        sample_interval: SampleInterval::from_millis(200).unwrap(),
        ..manual
    };
    controller.update_config(timed.clone()).unwrap();
    next_scan_result(&mut events).await;
    next_scan_result(&mut events).await;
    assert_eq!(runtime.opened(), 1);

    // Switching back to manual sampling restarts the pipeline
    controller
        .update_config(CaptureConfig {
            sample_interval: SampleInterval::Disabled,
            ..timed
        })
        .unwrap();
    next_scan_result(&mut events).await;
    assert_eq!(runtime.opened(), 2);
    assert_eq!(runtime.live_tracks(), 1);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rapid_facing_changes_keep_one_stream() {
    let runtime = VirtualMediaDevices::new().with_acquire_delay(Duration::from_millis(50));
    let decoder = ScriptedDecoder::replying(None);
    let mut config = CaptureConfig::default();
    let (controller, mut events) = start(config.clone(), &runtime, &decoder);

    for _ in 0..9 {
        config.facing = match config.facing {
            Facing::Back => Facing::Front,
            Facing::Front => Facing::Back,
        };
        controller.update_config(config.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(runtime.live_tracks() <= 1);
        assert!(!controller.snapshot().timer_pending);
    }

    match next_event(&mut events).await {
        PipelineEvent::StreamReady(ready) => assert!(ready.is_front_facing),
        other => panic!("expected stream ready, got {:?}", other),
    }
    assert_eq!(runtime.live_tracks(), 1);
    assert_eq!(runtime.requests().len(), 10);

    next_scan_result(&mut events).await;
    controller.shutdown().await;
    assert_eq!(runtime.live_tracks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_acquisition_is_silent() {
    let runtime = VirtualMediaDevices::new().with_acquire_delay(Duration::from_millis(100));
    let decoder = ScriptedDecoder::replying(Some("never"));
    let (controller, mut events) = start(CaptureConfig::default(), &runtime, &decoder);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(controller.state(), PipelineState::Acquiring);
    controller.shutdown().await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(runtime.live_tracks(), 0);
    assert_eq!(decoder.calls(), 0);
    while let Some(event) = events.recv().await {
        panic!("stale run reported {:?}", event);
    }
}

#[tokio::test]
async fn test_worker_failure_is_reported_once() {
    let runtime = VirtualMediaDevices::new();
    let (listener, mut events) = ChannelListener::new();
    let controller = PipelineController::start(
        CaptureConfig::default(),
        Arc::new(runtime.clone()),
        SurfaceHost::new(),
        decoder_factory(|| Err("decoder missing".to_string())),
        Arc::new(listener),
    )
    .unwrap();

    assert_eq!(
        next_event(&mut events).await,
        PipelineEvent::Error(ScanError::WorkerUnavailable("decoder missing".to_string()))
    );
    assert!(runtime.requests().is_empty());

    controller.shutdown().await;
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn test_oversized_resolution_is_rejected_up_front() {
    let runtime = VirtualMediaDevices::new();
    let decoder = ScriptedDecoder::replying(None);
    let huge = CaptureConfig {
        target_resolution_px: 40_000,
        ..Default::default()
    };

    let (listener, _events) = ChannelListener::new();
    let started = PipelineController::start(
        huge.clone(),
        Arc::new(runtime.clone()),
        SurfaceHost::with_surface(Arc::new(PreviewSurface::new())),
        decoder.factory(),
        Arc::new(listener),
    );
    assert!(matches!(started, Err(ScanError::Config(_))));
    assert!(runtime.requests().is_empty());

    let (controller, mut events) = start(CaptureConfig::default(), &runtime, &decoder);
    next_scan_result(&mut events).await;
    assert!(matches!(
        controller.update_config(huge),
        Err(ScanError::Config(_))
    ));
    // The running configuration is untouched
    next_scan_result(&mut events).await;
    assert_eq!(decoder.sizes().last(), Some(&(600, 600)));
    assert_eq!(runtime.opened(), 1);

    controller.shutdown().await;
}

#[tokio::test]
async fn test_acquisition_failure_stops_run() {
    let denied = AcquisitionError::PermissionDenied("/dev/video0".to_string());
    let runtime = VirtualMediaDevices::new().with_failure(denied.clone());
    let decoder = ScriptedDecoder::default();
    let (controller, mut events) = start(CaptureConfig::default(), &runtime, &decoder);

    assert_eq!(
        next_event(&mut events).await,
        PipelineEvent::Error(ScanError::MediaAcquisition(denied))
    );
    let mut state = controller.subscribe_state();
    state
        .wait_for(|s| s.state == PipelineState::Stopped)
        .await
        .unwrap();
    assert_eq!(runtime.live_tracks(), 0);

    controller.shutdown().await;
}

#[tokio::test]
async fn test_probe_selects_device_without_facing_support() {
    let runtime = VirtualMediaDevices::new()
        .with_capabilities(CapabilitySet::empty().with(ConstraintName::FrameRate))
        .with_devices(vec![
            CameraDevice::video_input("cam-front", "Front Camera"),
            CameraDevice::video_input("cam-back", "Back Camera"),
        ]);
    let decoder = ScriptedDecoder::replying(None);
    let (controller, mut events) = start(CaptureConfig::default(), &runtime, &decoder);

    match next_event(&mut events).await {
        PipelineEvent::StreamReady(ready) => {
            assert_eq!(ready.track.device_id.as_deref(), Some("cam-back"));
            assert!(!ready.is_front_facing);
        }
        other => panic!("expected stream ready, got {:?}", other),
    }
    let requests = runtime.requests();
    assert!(requests[0].facing_mode.is_none());
    assert_eq!(requests[0].device_id.as_deref(), Some("cam-back"));

    controller.shutdown().await;
}

#[tokio::test]
async fn test_no_camera_reports_no_capable_device() {
    let runtime = VirtualMediaDevices::new()
        .with_capabilities(CapabilitySet::empty())
        .with_devices(Vec::new());
    let decoder = ScriptedDecoder::default();
    let (controller, mut events) = start(CaptureConfig::default(), &runtime, &decoder);

    assert_eq!(
        next_event(&mut events).await,
        PipelineEvent::Error(ScanError::NoCapableDeviceFound)
    );
    assert!(runtime.requests().is_empty());

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_late_surface_is_picked_up_from_notification() {
    let runtime = VirtualMediaDevices::new();
    let decoder = ScriptedDecoder::replying(None);
    let host = SurfaceHost::new();
    let (listener, mut events) = ChannelListener::new();
    let controller = PipelineController::start(
        CaptureConfig::default(),
        Arc::new(runtime.clone()),
        host.clone(),
        decoder.factory(),
        Arc::new(listener),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(controller.state(), PipelineState::Acquiring);
    assert!(controller.snapshot().stream_live);

    host.provide(Arc::new(PreviewSurface::new()));
    assert!(matches!(
        next_event(&mut events).await,
        PipelineEvent::StreamReady(_)
    ));

    controller.shutdown().await;
}
