// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the video recorder and its encode worker

use camera_pipeline::backends::virtual_camera::{
    EncoderScript, MediaCall, MuxerScript, VirtualMediaBackend,
};
use camera_pipeline::config::{Config, EncoderSettings};
use camera_pipeline::errors::EncoderError;
use camera_pipeline::{RecorderEvent, VideoRecorder};
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

fn writes(backend: &VirtualMediaBackend) -> usize {
    backend.count(|c| matches!(c, MediaCall::WriteSample { .. }))
}

fn position(calls: &[MediaCall], pred: impl Fn(&MediaCall) -> bool) -> usize {
    calls.iter().position(pred).expect("call not found")
}

#[test]
fn test_recording_writes_container() {
    let dir = tempfile::tempdir().unwrap();
    let backend = VirtualMediaBackend::new();
    let recorder = VideoRecorder::new(Arc::new(backend.clone()), &test_config(dir.path()));

    recorder.start_recording().unwrap();
    assert!(recorder.is_recording());
    let path = recorder.output_path().unwrap();
    assert!(path.starts_with(dir.path().join("Movies")));

    wait_for("samples", || writes(&backend) >= 3);
    let report = recorder.stop_recording().unwrap().wait().unwrap();
    assert!(!recorder.is_running());

    assert_eq!(report.output.as_deref(), Some(path.as_path()));
    assert!(report.reached_end_of_stream);
    assert!(report.is_clean());
    assert!(report.samples_written >= 3);
    assert_eq!(report.samples_written, report.samples_drained);

    let len = std::fs::metadata(&path).unwrap().len();
    assert_eq!(len, report.samples_written * 16);

    let calls = backend.calls();
    assert_eq!(
        calls
            .iter()
            .filter(|c| matches!(c, MediaCall::AddTrack(_)))
            .count(),
        1
    );
    assert!(
        position(&calls, |c| *c == MediaCall::MuxerStart)
            < position(&calls, |c| matches!(c, MediaCall::WriteSample { .. }))
    );
    assert!(
        position(&calls, |c| *c == MediaCall::SignalEndOfInput)
            < position(&calls, |c| *c == MediaCall::MuxerStop)
    );
}

#[test]
fn test_sample_timestamps_strictly_increase() {
    let dir = tempfile::tempdir().unwrap();
    let backend = VirtualMediaBackend::new();
    let recorder = VideoRecorder::new(Arc::new(backend.clone()), &test_config(dir.path()));

    recorder.start_recording().unwrap();
    wait_for("samples", || writes(&backend) >= 10);
    recorder.stop().unwrap().wait().unwrap();

    let pts: Vec<i64> = backend
        .calls()
        .iter()
        .filter_map(|c| match c {
            MediaCall::WriteSample { pts_us, .. } => Some(*pts_us),
            _ => None,
        })
        .collect();
    assert!(pts.len() >= 10);
    assert!(pts.windows(2).all(|w| w[1] > w[0]), "{:?}", pts);
}

#[test]
fn test_preview_only_never_touches_muxer() {
    let dir = tempfile::tempdir().unwrap();
    let backend = VirtualMediaBackend::new();
    let recorder = VideoRecorder::new(Arc::new(backend.clone()), &test_config(dir.path()));

    recorder.start().unwrap();
    assert!(recorder.is_running());
    assert!(!recorder.is_recording());
    assert_eq!(recorder.output_path(), None);

    wait_for("drained samples", || {
        backend.count(|c| matches!(c, MediaCall::ReleaseOutputBuffer(_))) >= 5
    });
    let report = recorder.stop().unwrap().wait().unwrap();

    assert_eq!(report.output, None);
    assert!(report.samples_drained > 0);
    assert_eq!(report.samples_written, 0);
    assert_eq!(
        backend.count(|c| matches!(
            c,
            MediaCall::CreateMuxer(_)
                | MediaCall::AddTrack(_)
                | MediaCall::MuxerStart
                | MediaCall::WriteSample { .. }
                | MediaCall::MuxerStop
        )),
        0
    );
    assert!(!dir.path().join("Movies").exists());
}

#[test]
fn test_restart_releases_previous_encoder_first() {
    let dir = tempfile::tempdir().unwrap();
    let backend = VirtualMediaBackend::new();
    let recorder = VideoRecorder::new(Arc::new(backend.clone()), &test_config(dir.path()));

    let first = recorder.start().unwrap();
    let second = recorder.start_recording().unwrap();
    assert_ne!(first, second);
    assert_eq!(recorder.input_surface(), Some(second.clone()));

    let calls = backend.calls();
    let configures: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, MediaCall::Configure(_)))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(configures.len(), 2);

    let first_release = position(&calls, |c| *c == MediaCall::EncoderRelease);
    let first_surface = position(&calls, |c| *c == MediaCall::ReleaseInputSurface(first.id()));
    assert!(configures[0] < first_release);
    assert!(first_release < configures[1]);
    assert!(first_surface < configures[1]);

    recorder.stop().unwrap().wait().unwrap();
}

#[test]
fn test_configure_failure_releases_codec() {
    let dir = tempfile::tempdir().unwrap();
    let backend = VirtualMediaBackend::new();
    backend.set_encoder_script(EncoderScript {
        fail_configure: true,
        ..Default::default()
    });
    let recorder = VideoRecorder::new(Arc::new(backend.clone()), &test_config(dir.path()));

    let err = recorder.start().unwrap_err();
    assert!(matches!(err, EncoderError::ConfigureFailed(_)));
    assert!(!recorder.is_running());

    let calls = backend.calls();
    assert!(calls.contains(&MediaCall::EncoderRelease));
    assert!(!calls.iter().any(|c| matches!(c, MediaCall::CreateInputSurface(_))));
    assert!(!calls.contains(&MediaCall::EncoderStart));
}

#[test]
fn test_start_failure_releases_surface() {
    let dir = tempfile::tempdir().unwrap();
    let backend = VirtualMediaBackend::new();
    backend.set_encoder_script(EncoderScript {
        fail_start: true,
        ..Default::default()
    });
    let recorder = VideoRecorder::new(Arc::new(backend.clone()), &test_config(dir.path()));

    assert!(matches!(
        recorder.start_recording(),
        Err(EncoderError::StartFailed(_))
    ));
    assert!(!recorder.is_running());

    let calls = backend.calls();
    assert!(calls.contains(&MediaCall::EncoderRelease));
    assert!(calls.iter().any(|c| matches!(c, MediaCall::ReleaseInputSurface(_))));
}

#[test]
fn test_muxer_stop_failure_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let backend = VirtualMediaBackend::new();
    backend.set_muxer_script(MuxerScript {
        fail_stop: true,
        ..Default::default()
    });
    let recorder = VideoRecorder::new(Arc::new(backend.clone()), &test_config(dir.path()));

    recorder.start_recording().unwrap();
    wait_for("samples", || writes(&backend) >= 1);
    let report = recorder.stop_recording().unwrap().wait().unwrap();

    assert!(matches!(
        report.muxer_error,
        Some(EncoderError::MuxerTeardown(_))
    ));
    assert_eq!(report.codec_error, None);
    assert!(!report.is_clean());

    // Encoder is still stopped and released after the muxer failure
    let calls = backend.calls();
    assert!(
        position(&calls, |c| *c == MediaCall::MuxerStop)
            < position(&calls, |c| *c == MediaCall::EncoderRelease)
    );
    assert!(calls.iter().any(|c| matches!(c, MediaCall::ReleaseInputSurface(_))));
}

#[test]
fn test_missing_end_of_stream_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let backend = VirtualMediaBackend::new();
    backend.set_encoder_script(EncoderScript {
        end_of_stream: false,
        ..Default::default()
    });
    let recorder = VideoRecorder::new(Arc::new(backend.clone()), &test_config(dir.path()));

    recorder.start_recording().unwrap();
    wait_for("samples", || writes(&backend) >= 1);
    let report = recorder.stop().unwrap().wait().unwrap();

    assert!(!report.reached_end_of_stream);
    assert!(backend.calls().contains(&MediaCall::MuxerStop));
}

#[test]
fn test_events_follow_worker_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let backend = VirtualMediaBackend::new();
    let recorder = VideoRecorder::new(Arc::new(backend.clone()), &test_config(dir.path()));
    let mut events = recorder.subscribe();

    let surface = recorder.start().unwrap();
    let completion = recorder.stop().unwrap();
    let report = completion.wait().unwrap();

    assert_eq!(
        events.try_recv().unwrap(),
        RecorderEvent::SurfaceCreated(surface.clone())
    );
    assert_eq!(
        events.try_recv().unwrap(),
        RecorderEvent::SurfaceDestroyed(surface)
    );
    assert_eq!(events.try_recv().unwrap(), RecorderEvent::Finished(report));
    assert!(events.try_recv().is_err());
}

#[test]
fn test_stop_without_worker() {
    let dir = tempfile::tempdir().unwrap();
    let backend = VirtualMediaBackend::new();
    let recorder = VideoRecorder::new(Arc::new(backend.clone()), &test_config(dir.path()));

    assert!(recorder.stop().is_none());
    assert!(recorder.stop_recording().is_none());
    assert!(backend.calls().is_empty());
}

#[test]
fn test_drop_finishes_recording() {
    let dir = tempfile::tempdir().unwrap();
    let backend = VirtualMediaBackend::new();
    let recorder = VideoRecorder::new(Arc::new(backend.clone()), &test_config(dir.path()));

    recorder.start_recording().unwrap();
    drop(recorder);

    let calls = backend.calls();
    assert!(calls.contains(&MediaCall::EncoderRelease));
    assert!(calls.iter().any(|c| matches!(c, MediaCall::ReleaseInputSurface(_))));
}

#[test]
fn test_start_after_stop_waits_for_previous_teardown() {
    let dir = tempfile::tempdir().unwrap();
    let backend = VirtualMediaBackend::new();
    backend.set_encoder_script(EncoderScript {
        end_of_stream: false,
        ..Default::default()
    });
    let recorder = VideoRecorder::new(Arc::new(backend.clone()), &test_config(dir.path()));

    recorder.start_recording().unwrap();
    wait_for("samples", || writes(&backend) >= 1);
    let completion = recorder.stop_recording().unwrap();
    assert!(!recorder.is_running());

    // The stopped worker is still draining towards its poll limit
    recorder.start().unwrap();
    assert!(completion.is_finished());
    assert!(!completion.wait().unwrap().reached_end_of_stream);

    let calls = backend.calls();
    let configures: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, MediaCall::Configure(_)))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(configures.len(), 2);
    assert!(position(&calls, |c| *c == MediaCall::MuxerStop) < configures[1]);
    assert!(position(&calls, |c| *c == MediaCall::EncoderRelease) < configures[1]);

    recorder.stop().unwrap().wait().unwrap();
}

#[test]
fn test_back_to_back_recordings_use_distinct_files() {
    let dir = tempfile::tempdir().unwrap();
    let backend = VirtualMediaBackend::new();
    let recorder = VideoRecorder::new(Arc::new(backend.clone()), &test_config(dir.path()));

    recorder.start_recording().unwrap();
    let first = recorder.output_path().unwrap();
    wait_for("first samples", || writes(&backend) >= 2);

    recorder.start_recording().unwrap();
    let second = recorder.output_path().unwrap();
    assert_ne!(first, second);
    wait_for("second samples", || writes(&backend) >= 4);
    let report = recorder.stop_recording().unwrap().wait().unwrap();

    assert!(first.exists());
    assert!(second.exists());
    assert!(std::fs::metadata(&first).unwrap().len() >= 2 * 16);
    assert_eq!(
        std::fs::metadata(&second).unwrap().len(),
        report.samples_written * 16
    );
}
