// SPDX-License-Identifier: GPL-3.0-only

//! Video recorder
//!
//! Owns at most one [`EncodeWorker`]. A stopped worker is remembered until
//! its teardown is joined: every start first stops the current worker and
//! waits for the previous teardown, under one lock, so two workers never
//! coexist and a new codec is only configured after the old one is released.

use super::worker::{
    EncodeWorker, EventSink, RecorderEvent, WorkerCompletion, WorkerSettings,
};
use crate::backends::camera::types::Surface;
use crate::config::{Config, EncoderSettings};
use crate::errors::{EncoderError, EncoderResult};
use crate::media::encoders::{EncoderConfig, MediaBackend};
use crate::storage;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

/// Caller-facing owner of the encode worker
pub struct VideoRecorder {
    backend: Arc<dyn MediaBackend>,
    width: u32,
    height: u32,
    settings: EncoderSettings,
    recordings_dir: PathBuf,
    slot: Mutex<WorkerSlot>,
    events: EventSink,
}

/// Running worker and the teardown of the one before it
#[derive(Debug, Default)]
struct WorkerSlot {
    running: Option<EncodeWorker>,
    stopping: Option<WorkerCompletion>,
}

impl WorkerSlot {
    /// Cancel the running worker and remember its teardown
    fn stop(&mut self) -> Option<WorkerCompletion> {
        let worker = self.running.take()?;
        let completion = worker.stop();
        self.stopping = Some(completion.clone());
        Some(completion)
    }

    /// Block until the last stopped worker has released its codec
    fn finish_stopping(&mut self) {
        let Some(completion) = self.stopping.take() else {
            return;
        };
        match completion.wait() {
            Ok(report) if !report.is_clean() => {
                warn!(report = ?report, "Previous encode worker finished with errors")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Previous encode worker died"),
        }
    }
}

impl VideoRecorder {
    pub fn new(backend: Arc<dyn MediaBackend>, config: &Config) -> Self {
        Self {
            backend,
            width: config.width,
            height: config.height,
            settings: config.encoder.clone(),
            recordings_dir: config.recordings_dir.clone(),
            slot: Mutex::new(WorkerSlot::default()),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkerSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive worker notifications
    pub fn subscribe(&self) -> UnboundedReceiver<RecorderEvent> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Run the encoder without persisting output
    ///
    /// Returns the input surface the camera should render into.
    pub fn start(&self) -> EncoderResult<Surface> {
        self.spawn(false)
    }

    /// Run the encoder and write a new timestamped container
    pub fn start_recording(&self) -> EncoderResult<Surface> {
        self.spawn(true)
    }

    fn spawn(&self, recording: bool) -> EncoderResult<Surface> {
        let mut slot = self.lock();

        if let Some(previous) = slot.running.as_ref() {
            info!(recording = previous.is_recording(), "Replacing encode worker");
        }
        slot.stop();
        slot.finish_stopping();

        // Chosen only once the previous container is finalized
        let output = if recording {
            let path = storage::new_recording_path(&self.recordings_dir)
                .map_err(|e| EncoderError::Muxer(format!("recordings directory: {}", e)))?;
            Some(path)
        } else {
            None
        };

        let settings = WorkerSettings {
            encoder: EncoderConfig::new(self.width, self.height, &self.settings),
            drain_timeout: self.settings.drain_timeout(),
            output,
        };
        let worker = EncodeWorker::spawn(
            Arc::clone(&self.backend),
            settings,
            Arc::clone(&self.events),
        )?;
        let surface = worker.surface().clone();
        slot.running = Some(worker);
        Ok(surface)
    }

    /// Stop the current worker without waiting for its teardown
    ///
    /// Wait on the returned completion for a finalized file. The next start
    /// waits for it as well.
    pub fn stop(&self) -> Option<WorkerCompletion> {
        let mut slot = self.lock();
        let recording = slot.running.as_ref()?.is_recording();
        info!(recording, "Stopping encoder");
        slot.stop()
    }

    /// Stop recording; a preview-only worker is stopped as well
    pub fn stop_recording(&self) -> Option<WorkerCompletion> {
        let mut slot = self.lock();
        let worker = slot.running.as_ref()?;
        if worker.is_recording() {
            info!(output = ?worker.output(), "Stopping recording");
        } else {
            warn!("Encoder is not recording, stopping anyway");
        }
        slot.stop()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running.is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.lock()
            .running
            .as_ref()
            .is_some_and(EncodeWorker::is_recording)
    }

    /// Input surface of the running worker
    pub fn input_surface(&self) -> Option<Surface> {
        self.lock().running.as_ref().map(|w| w.surface().clone())
    }

    /// Container of the running recording
    pub fn output_path(&self) -> Option<PathBuf> {
        self.lock()
            .running
            .as_ref()
            .and_then(|w| w.output().cloned())
    }
}

impl Drop for VideoRecorder {
    fn drop(&mut self) {
        let mut slot = self.lock();
        slot.stop();
        slot.finish_stopping();
    }
}

impl std::fmt::Debug for VideoRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoRecorder")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("recordings_dir", &self.recordings_dir)
            .field("running", &self.is_running())
            .finish()
    }
}
