// SPDX-License-Identifier: GPL-3.0-only

//! Capture pipeline facade
//!
//! Wires the capture session controller, the video recorder and the
//! snapshot consumer together:
//!
//! ```text
//! recorder.start*() ──▶ encoder input surface ──▶ controller target ──▶ controller.start()
//! ```
//!
//! The encoder surface is fixed while the camera runs, so switching between
//! preview-only encoding and recording restarts the camera around the
//! encoder swap.

use super::photo::{SnapshotConsumer, SnapshotResult};
use super::video::{RecorderEvent, VideoRecorder, WorkerCompletion};
use crate::backends::camera::{
    CaptureSessionController, ControllerEvent, FpsMonitor, ImagingSource, Surface,
};
use crate::config::Config;
use crate::errors::{PhotoError, PipelineError, PipelineResult};
use crate::media::encoders::MediaBackend;
use crate::storage::ImageSink;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

/// Camera, encoder and snapshot consumer behind one handle
pub struct CapturePipeline {
    controller: CaptureSessionController,
    recorder: VideoRecorder,
    snapshots: Option<Arc<SnapshotConsumer>>,
    config: Config,
}

impl CapturePipeline {
    /// Validate `config` and build an idle pipeline
    pub fn new(
        source: Arc<dyn ImagingSource>,
        media: Arc<dyn MediaBackend>,
        config: Config,
    ) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self {
            controller: CaptureSessionController::with_config(source, &config),
            recorder: VideoRecorder::new(media, &config),
            snapshots: None,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Show the camera on `surface`, or stop previewing
    ///
    /// Takes effect the next time the camera starts.
    pub fn set_preview_surface(&mut self, surface: Option<Surface>) -> PipelineResult<()> {
        self.controller.configure_preview_target(surface)
    }

    /// Install a snapshot consumer writing through `sink`
    ///
    /// Must be called before the camera starts.
    pub fn enable_snapshots(
        &mut self,
        sink: Arc<dyn ImageSink>,
    ) -> PipelineResult<Arc<SnapshotConsumer>> {
        let consumer = Arc::new(SnapshotConsumer::new(
            sink,
            self.config.pictures_dir.clone(),
            self.config.jpeg_quality,
        ));
        self.controller
            .configure_snapshot_consumer(Some(consumer.clone()))?;
        self.snapshots = Some(Arc::clone(&consumer));
        Ok(consumer)
    }

    /// Start the camera with a preview-only encoder
    pub fn start_preview(&mut self) -> PipelineResult<Surface> {
        self.run(false)
    }

    /// Start (or restart) the camera with a recording encoder
    ///
    /// Returns the path of the new recording.
    pub fn start_recording(&mut self) -> PipelineResult<PathBuf> {
        self.run(true)?;
        self.recorder
            .output_path()
            .ok_or_else(|| PipelineError::Configuration("recording did not start".into()))
    }

    /// Finish the recording and fall back to preview-only encoding
    ///
    /// Wait on the completion for a finalized file.
    pub fn stop_recording(&mut self) -> PipelineResult<Option<WorkerCompletion>> {
        self.controller.stop();
        let completion = self.recorder.stop_recording();
        self.run(false)?;
        Ok(completion)
    }

    fn run(&mut self, recording: bool) -> PipelineResult<Surface> {
        // The camera must stop rendering before the old surface goes away
        self.controller.stop();

        let surface = if recording {
            self.recorder.start_recording()?
        } else {
            self.recorder.start()?
        };
        self.controller
            .configure_encoder_target(Some(surface.clone()))?;

        if let Err(e) = self.controller.start() {
            warn!(error = %e, "Camera failed to start, stopping encoder");
            if let Some(completion) = self.recorder.stop()
                && let Err(wait_err) = completion.wait()
            {
                warn!(error = %wait_err, "Encode worker died while stopping");
            }
            self.controller.configure_encoder_target(None)?;
            return Err(e);
        }

        info!(recording, surface = surface.id(), "Capture pipeline running");
        Ok(surface)
    }

    /// Save the next reader frame as `picture.jpg`
    ///
    /// The outcome arrives on [`subscribe_snapshots`](Self::subscribe_snapshots).
    pub fn take_snapshot(&self) -> PipelineResult<()> {
        let consumer = self.snapshots.as_ref().ok_or(PhotoError::NoConsumer)?;
        consumer.request();
        Ok(())
    }

    /// Stop camera and encoder
    pub fn stop(&mut self) -> Option<WorkerCompletion> {
        self.controller.stop();
        if let Err(e) = self.controller.configure_encoder_target(None) {
            warn!(error = %e, "Failed to clear encoder target");
        }
        self.recorder.stop()
    }

    pub fn is_running(&self) -> bool {
        self.controller.is_started()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn current_fps(&self) -> u32 {
        self.controller.fps_monitor().current_fps()
    }

    pub fn fps_monitor(&self) -> FpsMonitor {
        self.controller.fps_monitor()
    }

    pub fn controller(&self) -> &CaptureSessionController {
        &self.controller
    }

    pub fn recorder(&self) -> &VideoRecorder {
        &self.recorder
    }

    pub fn subscribe_camera(&self) -> UnboundedReceiver<ControllerEvent> {
        self.controller.subscribe()
    }

    pub fn subscribe_recorder(&self) -> UnboundedReceiver<RecorderEvent> {
        self.recorder.subscribe()
    }

    /// Snapshot outcomes; `None` without a snapshot consumer
    pub fn subscribe_snapshots(&self) -> Option<UnboundedReceiver<SnapshotResult>> {
        self.snapshots.as_ref().map(|c| c.subscribe())
    }
}

impl std::fmt::Debug for CapturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturePipeline")
            .field("controller", &self.controller)
            .field("recorder", &self.recorder)
            .field("snapshots", &self.snapshots.is_some())
            .finish()
    }
}
