// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end tests of the capture pipeline on virtual backends

use camera_pipeline::backends::camera::{CaptureTarget, Surface, SurfaceKind};
use camera_pipeline::backends::virtual_camera::{
    MediaCall, OpenBehavior, VirtualCameraSource, VirtualMediaBackend,
};
use camera_pipeline::config::{Config, EncoderSettings};
use camera_pipeline::errors::{ErrorKind, PhotoError, PipelineError};
use camera_pipeline::storage::FileImageSink;
use camera_pipeline::CapturePipeline;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn test_config(dir: &Path) -> Config {
    Config {
        width: 64,
        height: 48,
        encoder: EncoderSettings {
            drain_timeout_ms: 5,
            ..Default::default()
        },
        recordings_dir: dir.join("Movies"),
        pictures_dir: dir.join("Pictures"),
        ..Default::default()
    }
}

fn pipeline(dir: &Path) -> (CapturePipeline, VirtualCameraSource, VirtualMediaBackend) {
    let source = VirtualCameraSource::default();
    let media = VirtualMediaBackend::new();
    let pipeline = CapturePipeline::new(
        Arc::new(source.clone()),
        Arc::new(media.clone()),
        test_config(dir),
    )
    .unwrap();
    (pipeline, source, media)
}

fn encoder_target(source: &VirtualCameraSource) -> Option<Surface> {
    source.session_targets().into_iter().find_map(|t| match t {
        CaptureTarget::Encoder { surface } => Some(surface),
        _ => None,
    })
}

#[test]
fn test_invalid_config_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        width: 63,
        ..test_config(dir.path())
    };
    let err = CapturePipeline::new(
        Arc::new(VirtualCameraSource::default()),
        Arc::new(VirtualMediaBackend::new()),
        config,
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Settings);
}

#[test]
fn test_preview_renders_into_encoder_surface() {
    let dir = tempfile::tempdir().unwrap();
    let (mut pipeline, source, media) = pipeline(dir.path());
    pipeline
        .set_preview_surface(Some(Surface::new(SurfaceKind::Preview)))
        .unwrap();

    let surface = pipeline.start_preview().unwrap();
    assert!(pipeline.is_running());
    assert!(!pipeline.is_recording());
    assert_eq!(pipeline.recorder().input_surface(), Some(surface.clone()));

    wait_for("streaming", || source.is_streaming());
    assert_eq!(encoder_target(&source), Some(surface));
    assert_eq!(source.session_targets().len(), 2);
    assert_eq!(media.count(|c| matches!(c, MediaCall::CreateMuxer(_))), 0);

    let completion = pipeline.stop().unwrap();
    assert!(!pipeline.is_running());
    assert!(completion.wait().unwrap().output.is_none());
}

#[test]
fn test_recording_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let (mut pipeline, source, media) = pipeline(dir.path());

    pipeline.start_preview().unwrap();
    let path = pipeline.start_recording().unwrap();
    assert!(pipeline.is_recording());
    assert!(pipeline.is_running());
    assert_eq!(source.open_requests(), 2);

    wait_for("streaming", || source.is_streaming());
    assert_eq!(encoder_target(&source), pipeline.recorder().input_surface());

    wait_for("samples", || {
        media.count(|c| matches!(c, MediaCall::WriteSample { .. })) >= 3
    });
    let completion = pipeline.stop_recording().unwrap().unwrap();
    // The preview encoder only starts once the recording is finalized
    assert!(completion.is_finished());
    let report = completion.wait().unwrap();
    assert_eq!(report.output.as_deref(), Some(path.as_path()));
    assert!(report.is_clean());
    assert!(path.is_file());

    // Preview-only encoding resumes
    assert!(pipeline.is_running());
    assert!(!pipeline.is_recording());
    assert_eq!(source.open_requests(), 3);

    pipeline.stop();
}

#[test]
fn test_camera_failure_stops_encoder() {
    let dir = tempfile::tempdir().unwrap();
    let (mut pipeline, source, media) = pipeline(dir.path());
    source.set_open_behavior(OpenBehavior::Refuse);

    let err = pipeline.start_preview().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceAccess);
    assert!(!pipeline.is_running());
    assert!(!pipeline.recorder().is_running());

    let calls = media.calls();
    assert!(calls.contains(&MediaCall::EncoderRelease));
    assert!(calls.iter().any(|c| matches!(c, MediaCall::ReleaseInputSurface(_))));
}

#[test]
fn test_snapshot_without_consumer() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _, _) = pipeline(dir.path());

    let err = pipeline.take_snapshot().unwrap_err();
    assert_eq!(err, PipelineError::Photo(PhotoError::NoConsumer));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(pipeline.subscribe_snapshots().is_none());
}

#[test]
fn test_snapshot_saved_as_jpeg() {
    let dir = tempfile::tempdir().unwrap();
    let (mut pipeline, source, _) = pipeline(dir.path());
    pipeline.enable_snapshots(Arc::new(FileImageSink)).unwrap();
    let mut results = pipeline.subscribe_snapshots().unwrap();

    pipeline.start_preview().unwrap();
    wait_for("streaming", || source.is_streaming());

    // Frames without a request are not saved
    wait_for("frame delivered", || source.push_frame());
    pipeline.take_snapshot().unwrap();
    wait_for("frame delivered", || source.push_frame());

    let saved = results.blocking_recv().unwrap().unwrap();
    assert_eq!(saved, dir.path().join("Pictures").join("picture.jpg"));

    let image = image::open(&saved).unwrap();
    assert_eq!((image.width(), image.height()), (64, 48));

    pipeline.stop();
    assert!(results.try_recv().is_err());
    assert_eq!(source.frames_produced(), source.frames_released());
}

#[test]
fn test_snapshot_consumer_fixed_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let (mut pipeline, _, _) = pipeline(dir.path());
    pipeline.start_preview().unwrap();

    let err = pipeline.enable_snapshots(Arc::new(FileImageSink)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    pipeline.stop();
}

#[test]
fn test_recording_after_camera_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    let (mut pipeline, source, _media) = pipeline(dir.path());

    pipeline.start_preview().unwrap();
    wait_for("streaming", || source.is_streaming());
    assert!(source.disconnect());
    wait_for("camera lost", || pipeline.controller().is_device_lost());

    let path = pipeline.start_recording().unwrap();
    assert!(pipeline.is_recording());
    assert!(!pipeline.controller().is_device_lost());
    wait_for("streaming again", || source.is_streaming());
    assert_eq!(encoder_target(&source), pipeline.recorder().input_surface());

    pipeline.stop().unwrap().wait().unwrap();
    assert!(path.is_file());
}
