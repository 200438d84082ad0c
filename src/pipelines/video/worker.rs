// SPDX-License-Identifier: GPL-3.0-only

//! Encode worker
//!
//! One worker owns one encoder (and, when recording, one muxer) for its
//! whole life. It runs on its own thread:
//!
//! 1. prepare: create and configure the codec, create its input surface,
//!    create the muxer, start the codec; the outcome goes back to the caller
//! 2. drain: poll encoded output with a bounded wait until cancelled
//! 3. finish: signal end-of-input and keep draining until end-of-stream
//! 4. teardown: stop the muxer (best effort), stop and release the codec,
//!    release the input surface
//!
//! Cancellation is cooperative; the bounded poll is the only blocking point.

use super::timestamp::PtsGenerator;
use crate::backends::camera::types::Surface;
use crate::constants;
use crate::errors::{EncoderError, EncoderResult};
use crate::media::encoders::{
    BufferInfo, EncoderConfig, MediaBackend, Muxer, OutputBuffer, OutputStatus, VideoEncoder,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Notifications published by encode workers
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    /// Encoder input surface is ready for the camera
    SurfaceCreated(Surface),
    /// Input surface is about to be released; stop rendering into it
    SurfaceDestroyed(Surface),
    /// Worker has torn down
    Finished(EncodeReport),
}

/// Subscribers shared between a recorder and its workers
pub(crate) type EventSink = Arc<Mutex<Vec<UnboundedSender<RecorderEvent>>>>;

pub(crate) fn emit(sink: &EventSink, event: RecorderEvent) {
    sink.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .retain(|tx| tx.send(event.clone()).is_ok());
}

/// Outcome of one worker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeReport {
    /// Container written, if recording
    pub output: Option<PathBuf>,
    /// Media samples drained from the codec
    pub samples_drained: u64,
    /// Samples appended to the muxer
    pub samples_written: u64,
    /// End-of-stream marker was seen
    pub reached_end_of_stream: bool,
    /// Error that ended draining early
    pub codec_error: Option<EncoderError>,
    /// Best-effort muxer stop failure
    pub muxer_error: Option<EncoderError>,
}

impl EncodeReport {
    /// The container was finalized without errors
    pub fn is_clean(&self) -> bool {
        self.codec_error.is_none() && self.muxer_error.is_none()
    }
}

/// Parameters of one worker
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub encoder: EncoderConfig,
    /// Bounded wait per output poll
    pub drain_timeout: Duration,
    /// Output container; `None` runs preview-only
    pub output: Option<PathBuf>,
}

impl WorkerSettings {
    pub fn is_recording(&self) -> bool {
        self.output.is_some()
    }
}

/// Waitable end of a stopped worker
///
/// Clones share one teardown: whichever waits first joins the thread, the
/// others get the same report. Dropping every clone lets the worker finish
/// on its own.
#[derive(Debug, Clone)]
pub struct WorkerCompletion {
    inner: Arc<CompletionState>,
}

#[derive(Debug)]
struct CompletionState {
    handle: Mutex<Option<JoinHandle<EncodeReport>>>,
    outcome: OnceLock<EncoderResult<EncodeReport>>,
}

impl WorkerCompletion {
    fn new(handle: Option<JoinHandle<EncodeReport>>) -> Self {
        Self {
            inner: Arc::new(CompletionState {
                handle: Mutex::new(handle),
                outcome: OnceLock::new(),
            }),
        }
    }

    /// Check if teardown has completed
    pub fn is_finished(&self) -> bool {
        if self.inner.outcome.get().is_some() {
            return true;
        }
        match self.inner.handle.try_lock() {
            Ok(handle) => handle.as_ref().is_none_or(|h| h.is_finished()),
            Err(TryLockError::Poisoned(handle)) => {
                handle.into_inner().as_ref().is_none_or(|h| h.is_finished())
            }
            // Another clone is joining right now
            Err(TryLockError::WouldBlock) => false,
        }
    }

    /// Block until teardown has completed
    pub fn wait(&self) -> EncoderResult<EncodeReport> {
        let mut handle = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(thread) = handle.take() {
            let outcome = thread.join().map_err(|_| EncoderError::WorkerDied);
            // Only ever set here, under the handle lock
            let _ = self.inner.outcome.set(outcome);
        }
        drop(handle);

        self.inner
            .outcome
            .get()
            .cloned()
            .unwrap_or(Err(EncoderError::WorkerDied))
    }
}

/// Handle to a running encode worker
#[derive(Debug)]
pub struct EncodeWorker {
    token: CancellationToken,
    handle: Option<JoinHandle<EncodeReport>>,
    surface: Surface,
    output: Option<PathBuf>,
}

impl EncodeWorker {
    /// Spawn a worker and wait for its preparation
    ///
    /// Configure or start failures are returned here; nothing is left
    /// running in that case.
    pub fn spawn(
        backend: Arc<dyn MediaBackend>,
        settings: WorkerSettings,
        events: EventSink,
    ) -> EncoderResult<Self> {
        let token = CancellationToken::new();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<EncoderResult<Surface>>(1);
        let output = settings.output.clone();

        info!(
            width = settings.encoder.width,
            height = settings.encoder.height,
            bit_rate = settings.encoder.bit_rate,
            recording = settings.is_recording(),
            output = ?settings.output,
            "Starting encode worker"
        );

        let worker_token = token.clone();
        let handle = thread::Builder::new()
            .name("encode-worker".to_string())
            .spawn(move || {
                let mut session = match EncoderSession::prepare(backend.as_ref(), &settings) {
                    Ok(session) => session,
                    Err(e) => {
                        if ready_tx.send(Err(e)).is_err() {
                            warn!("Encode worker caller gone before preparation failed");
                        }
                        return EncodeReport::default();
                    }
                };
                emit(&events, RecorderEvent::SurfaceCreated(session.surface.clone()));
                if ready_tx.send(Ok(session.surface.clone())).is_err() {
                    warn!("Encode worker caller gone, tearing down");
                    worker_token.cancel();
                }
                drop(ready_tx);

                session.drain(&worker_token, settings.drain_timeout);
                let report = session.teardown(&events);
                emit(&events, RecorderEvent::Finished(report.clone()));
                report
            })
            .map_err(|e| EncoderError::StartFailed(format!("spawn encode worker: {}", e)))?;

        let surface = match ready_rx.recv() {
            Ok(Ok(surface)) => surface,
            Ok(Err(e)) => {
                error!(error = %e, "Encode worker failed to prepare");
                if handle.join().is_err() {
                    warn!("Encode worker panicked after failing to prepare");
                }
                return Err(e);
            }
            Err(_) => {
                if handle.join().is_err() {
                    warn!("Encode worker panicked while preparing");
                }
                return Err(EncoderError::WorkerDied);
            }
        };

        info!(surface = surface.id(), "Encode worker running");
        Ok(Self {
            token,
            handle: Some(handle),
            surface,
            output,
        })
    }

    /// Encoder input surface
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn is_recording(&self) -> bool {
        self.output.is_some()
    }

    pub fn output(&self) -> Option<&PathBuf> {
        self.output.as_ref()
    }

    /// Ask the worker to finish; returns without waiting
    pub fn stop(mut self) -> WorkerCompletion {
        debug!(surface = self.surface.id(), "Stopping encode worker");
        self.token.cancel();
        WorkerCompletion::new(self.handle.take())
    }
}

impl Drop for EncodeWorker {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Codec and muxer state owned by the worker thread
struct EncoderSession {
    encoder: Box<dyn VideoEncoder>,
    muxer: Option<Box<dyn Muxer>>,
    surface: Surface,
    track: Option<usize>,
    muxer_failed: bool,
    pts: PtsGenerator,
    report: EncodeReport,
}

impl EncoderSession {
    fn prepare(backend: &dyn MediaBackend, settings: &WorkerSettings) -> EncoderResult<Self> {
        let config = &settings.encoder;
        let mut encoder = backend.create_encoder(&config.mime_type)?;

        if let Err(e) = encoder.configure(config) {
            encoder.release();
            return Err(e);
        }

        let surface = match encoder.create_input_surface() {
            Ok(surface) => surface,
            Err(e) => {
                encoder.release();
                return Err(e);
            }
        };

        let muxer = match &settings.output {
            Some(path) => match backend.create_muxer(path) {
                Ok(muxer) => Some(muxer),
                Err(e) => {
                    encoder.release();
                    encoder.release_input_surface(surface);
                    return Err(e);
                }
            },
            None => None,
        };

        if let Err(e) = encoder.start() {
            encoder.release();
            encoder.release_input_surface(surface);
            return Err(e);
        }

        debug!(surface = surface.id(), "Encoder prepared");
        Ok(Self {
            encoder,
            muxer,
            surface,
            track: None,
            muxer_failed: false,
            pts: PtsGenerator::new(),
            report: EncodeReport {
                output: settings.output.clone(),
                ..Default::default()
            },
        })
    }

    fn drain(&mut self, token: &CancellationToken, timeout: Duration) {
        let mut end_of_input = false;
        let mut idle_polls = 0u32;

        loop {
            if !end_of_input && token.is_cancelled() {
                debug!("Signalling end of input");
                if let Err(e) = self.encoder.signal_end_of_input() {
                    error!(error = %e, "Failed to signal end of input");
                    self.report.codec_error = Some(e);
                    return;
                }
                end_of_input = true;
            }

            let status = match self.encoder.dequeue_output_buffer(timeout) {
                Ok(status) => status,
                Err(e) => {
                    error!(error = %e, "Failed to dequeue encoder output");
                    self.report.codec_error = Some(e);
                    return;
                }
            };

            match status {
                OutputStatus::TryAgainLater => {
                    if end_of_input {
                        idle_polls += 1;
                        if idle_polls >= constants::video::MAX_DRAIN_POLLS {
                            warn!(polls = idle_polls, "No end-of-stream from encoder, giving up");
                            return;
                        }
                    }
                }
                OutputStatus::FormatChanged => self.on_format_changed(),
                OutputStatus::Buffer(buffer) => {
                    idle_polls = 0;
                    if self.on_buffer(buffer) {
                        debug!(samples = self.report.samples_drained, "End of stream");
                        self.report.reached_end_of_stream = true;
                        return;
                    }
                }
            }
        }
    }

    fn on_format_changed(&mut self) {
        let Some(muxer) = self.muxer.as_mut() else {
            debug!("Output format changed, not recording");
            return;
        };
        if self.track.is_some() || self.muxer_failed {
            warn!("Output format changed again, keeping first track");
            return;
        }

        let result = self.encoder.output_format().and_then(|format| {
            info!(
                mime = %format.mime_type,
                width = format.width,
                height = format.height,
                "Encoder output format"
            );
            let track = muxer.add_track(&format)?;
            muxer.start()?;
            Ok(track)
        });

        match result {
            Ok(track) => self.track = Some(track),
            Err(e) => {
                error!(error = %e, "Failed to start muxer, samples will be discarded");
                self.muxer_failed = true;
                self.report.codec_error = Some(e);
            }
        }
    }

    /// Handle one output buffer; returns true at end of stream
    fn on_buffer(&mut self, buffer: OutputBuffer) -> bool {
        let info = buffer.info;

        if !info.is_end_of_stream() && !info.is_codec_config() && info.size > 0 {
            let stamped = BufferInfo {
                presentation_time_us: self.pts.next_pts(),
                ..info
            };
            self.report.samples_drained += 1;

            if let (Some(muxer), Some(track)) = (self.muxer.as_mut(), self.track) {
                match muxer.write_sample(track, buffer.payload(), &stamped) {
                    Ok(()) => self.report.samples_written += 1,
                    Err(e) => warn!(error = %e, "Failed to write sample"),
                }
            }
        }

        if let Err(e) = self.encoder.release_output_buffer(buffer.index, false) {
            warn!(index = buffer.index, error = %e, "Failed to release output buffer");
        }

        info.is_end_of_stream()
    }

    fn teardown(mut self, events: &EventSink) -> EncodeReport {
        if let Some(mut muxer) = self.muxer.take() {
            if self.track.is_some() {
                if let Err(e) = muxer.stop() {
                    warn!(error = %e, "Failed to stop muxer, recording may be truncated");
                    self.report.muxer_error = Some(EncoderError::MuxerTeardown(e.to_string()));
                }
            } else {
                debug!("Muxer never started, discarding");
            }
        }

        if let Err(e) = self.encoder.stop() {
            warn!(error = %e, "Failed to stop encoder");
        }
        self.encoder.release();

        emit(events, RecorderEvent::SurfaceDestroyed(self.surface.clone()));
        self.encoder.release_input_surface(self.surface.clone());

        info!(
            drained = self.report.samples_drained,
            written = self.report.samples_written,
            output = ?self.report.output,
            "Encode worker finished"
        );
        self.report
    }
}
