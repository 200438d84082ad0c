// SPDX-License-Identifier: GPL-3.0-only

//! Capture session controller
//!
//! The controller owns the camera device and its capture session. Targets
//! (preview surface, snapshot consumer, encoder surface) are fixed before
//! `start()`; once started, configuration calls are rejected.
//!
//! `start()` selects the first rear camera, spawns the callback thread and
//! waits for the device-open outcome. Session configuration then proceeds on
//! the callback thread and is reported through [`ControllerEvent`]s.
//! `stop()` closes session and device on the callback thread and joins it.

use super::fps::FpsMonitor;
use super::frame_loop::{CallbackThread, LoopAction, event_channel};
use super::types::*;
use super::{
    CameraDevice, CameraEvent, CaptureSession, CaptureTarget, DeviceCallback, FrameConsumer,
    FrameGate, ImagingSource, select_rear_device,
};
use crate::config::Config;
use crate::constants;
use crate::errors::{CameraError, CameraResult, PipelineError, PipelineResult};
use std::sync::mpsc::{RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

/// Notifications published by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    DeviceOpened(DeviceId),
    SessionActive,
    SessionFailed(String),
    DeviceDisconnected(DeviceId),
    DeviceError(DeviceId, i32),
}

/// Device and session state as seen by the callback thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStatus {
    pub device: DeviceState,
    pub session: SessionState,
}

type SharedStatus = Arc<Mutex<SessionStatus>>;
type Subscribers = Arc<Mutex<Vec<UnboundedSender<ControllerEvent>>>>;

/// Reopens the frame gate once a frame has been consumed, even if the
/// consumer panics
struct GateGuard(Arc<FrameGate>);

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.0.reopen();
    }
}

/// Targets fixed at configuration time
#[derive(Clone)]
struct TargetConfig {
    preview: Option<Surface>,
    consumer: Option<Arc<dyn FrameConsumer>>,
    encoder: Option<Surface>,
    size: Size,
    format: PixelFormat,
}

impl TargetConfig {
    fn is_empty(&self) -> bool {
        self.preview.is_none() && self.consumer.is_none() && self.encoder.is_none()
    }
}

enum Lifecycle {
    Stopped,
    Started {
        thread: CallbackThread,
        device_id: DeviceId,
    },
}

/// Owns the camera device and capture session
pub struct CaptureSessionController {
    source: Arc<dyn ImagingSource>,
    targets: TargetConfig,
    lifecycle: Lifecycle,
    status: SharedStatus,
    fps: FpsMonitor,
    gate: Arc<FrameGate>,
    subscribers: Subscribers,
    open_timeout: Duration,
}

impl CaptureSessionController {
    /// Controller with default frame size, format and FPS window
    pub fn new(source: Arc<dyn ImagingSource>) -> Self {
        Self::with_config(source, &Config::default())
    }

    pub fn with_config(source: Arc<dyn ImagingSource>, config: &Config) -> Self {
        Self {
            source,
            targets: TargetConfig {
                preview: None,
                consumer: None,
                encoder: None,
                size: Size::new(config.width, config.height),
                format: config.pixel_format,
            },
            lifecycle: Lifecycle::Stopped,
            status: Arc::new(Mutex::new(SessionStatus::default())),
            fps: FpsMonitor::new(config.fps_window()),
            gate: Arc::new(FrameGate::default()),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            open_timeout: constants::DEVICE_OPEN_TIMEOUT,
        }
    }

    /// Override how long `start()` waits for the device to open
    pub fn set_open_timeout(&mut self, timeout: Duration) {
        self.open_timeout = timeout;
    }

    fn ensure_configurable(&self, what: &str) -> PipelineResult<()> {
        if self.is_started() {
            return Err(PipelineError::Configuration(format!(
                "cannot set {} once the camera has started",
                what
            )));
        }
        Ok(())
    }

    /// Set or clear the on-screen preview surface
    pub fn configure_preview_target(&mut self, surface: Option<Surface>) -> PipelineResult<()> {
        self.ensure_configurable("preview target")?;
        self.targets.preview = surface;
        Ok(())
    }

    /// Set or clear the application frame consumer
    pub fn configure_snapshot_consumer(
        &mut self,
        consumer: Option<Arc<dyn FrameConsumer>>,
    ) -> PipelineResult<()> {
        self.ensure_configurable("snapshot consumer")?;
        self.targets.consumer = consumer;
        Ok(())
    }

    /// Set or clear the encoder input surface
    pub fn configure_encoder_target(&mut self, surface: Option<Surface>) -> PipelineResult<()> {
        self.ensure_configurable("encoder target")?;
        self.targets.encoder = surface;
        Ok(())
    }

    /// Frame size of the preview and reader targets
    pub fn set_frame_dimensions(&mut self, width: u32, height: u32) -> PipelineResult<()> {
        self.ensure_configurable("frame dimensions")?;
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(PipelineError::Configuration(format!(
                "frame dimensions {}x{} must be even and non-zero",
                width, height
            )));
        }
        self.targets.size = Size::new(width, height);
        Ok(())
    }

    /// Pixel format of reader frames
    pub fn set_pixel_format(&mut self, format: PixelFormat) -> PipelineResult<()> {
        self.ensure_configurable("pixel format")?;
        self.targets.format = format;
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Started { .. })
    }

    /// Started, but the device has since disconnected or failed
    ///
    /// Frames no longer flow. Call [`start`](Self::start) to reopen, or
    /// [`stop`](Self::stop) before reconfiguring.
    pub fn is_device_lost(&self) -> bool {
        self.is_started()
            && matches!(self.device_state(), DeviceState::Closed | DeviceState::Error)
    }

    /// Id of the open device while started
    pub fn device_id(&self) -> Option<&DeviceId> {
        match &self.lifecycle {
            Lifecycle::Started { device_id, .. } => Some(device_id),
            Lifecycle::Stopped => None,
        }
    }

    pub fn device_state(&self) -> DeviceState {
        self.status().device
    }

    pub fn session_state(&self) -> SessionState {
        self.status().session
    }

    fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shared frame-rate monitor, readable from any thread
    pub fn fps_monitor(&self) -> FpsMonitor {
        self.fps.clone()
    }

    /// Reader frames admitted since the last start
    pub fn frames_delivered(&self) -> u64 {
        self.gate.delivered()
    }

    /// Reader frames released unprocessed since the last start, because
    /// another was in flight
    pub fn dropped_frames(&self) -> u64 {
        self.gate.dropped()
    }

    /// Receive controller notifications
    pub fn subscribe(&self) -> UnboundedReceiver<ControllerEvent> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Open the rear camera and start capturing
    ///
    /// Returns once the device is open. An open failure leaves the
    /// controller stopped. A no-op while the device is healthy; after a
    /// disconnect or device error the stale context is torn down and the
    /// camera reopened.
    pub fn start(&mut self) -> PipelineResult<()> {
        if self.is_started() {
            if !self.is_device_lost() {
                debug!("Camera already started");
                return Ok(());
            }
            info!(state = ?self.device_state(), "Camera lost, restarting");
            self.stop();
        }
        if self.targets.is_empty() {
            return Err(PipelineError::Configuration(
                "no capture target configured".into(),
            ));
        }

        let (device_id, _) = select_rear_device(self.source.as_ref())?;

        info!(
            device = %device_id,
            size = %self.targets.size,
            format = ?self.targets.format,
            preview = self.targets.preview.is_some(),
            reader = self.targets.consumer.is_some(),
            encoder = self.targets.encoder.is_some(),
            "Starting camera"
        );

        set_status(&self.status, |s| {
            s.device = DeviceState::Opening;
            s.session = SessionState::Unconfigured;
        });

        // Open outcome reported back by the callback thread
        let (init_tx, init_rx) = std::sync::mpsc::sync_channel::<CameraResult<()>>(1);
        let (callback, events) = event_channel();
        self.gate = Arc::clone(callback.frame_gate());

        let mut handler = CallbackHandler {
            targets: self.targets.clone(),
            callback: callback.clone(),
            reader: None,
            device: None,
            session: None,
            init_tx: Some(init_tx),
            quitting: false,
            status: Arc::clone(&self.status),
            fps: self.fps.clone(),
            subscribers: Arc::clone(&self.subscribers),
        };

        let mut thread = CallbackThread::start("camera-events", callback, events, move |event| {
            handler.handle(event)
        })
        .inspect_err(|_| set_status(&self.status, |s| s.device = DeviceState::Closed))?;

        if let Err(e) = self.source.open(&device_id, thread.callback()) {
            error!(device = %device_id, error = %e, "Failed to open camera");
            thread.stop();
            set_status(&self.status, |s| s.device = DeviceState::Closed);
            return Err(e.into());
        }

        let outcome = match init_rx.recv_timeout(self.open_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(CameraError::OpenTimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(CameraError::CallbackContext(
                "callback thread exited while opening".into(),
            )),
        };

        if let Err(e) = outcome {
            error!(device = %device_id, error = %e, "Camera did not open");
            thread.stop();
            set_status(&self.status, |s| {
                if s.device != DeviceState::Error {
                    s.device = DeviceState::Closed;
                }
            });
            return Err(e.into());
        }

        info!(device = %device_id, "Camera started");
        self.lifecycle = Lifecycle::Started { thread, device_id };
        Ok(())
    }

    /// Close session and device and join the callback thread
    ///
    /// Returns only after teardown has completed.
    pub fn stop(&mut self) {
        match std::mem::replace(&mut self.lifecycle, Lifecycle::Stopped) {
            Lifecycle::Stopped => debug!("Camera not started"),
            Lifecycle::Started {
                mut thread,
                device_id,
            } => {
                info!(device = %device_id, "Stopping camera");
                thread.stop();
                info!(
                    device = %device_id,
                    delivered = self.gate.delivered(),
                    dropped = self.gate.dropped(),
                    "Camera stopped"
                );
            }
        }
    }
}

impl Drop for CaptureSessionController {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CaptureSessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSessionController")
            .field("started", &self.is_started())
            .field("status", &self.status())
            .field("size", &self.targets.size)
            .field("format", &self.targets.format)
            .finish()
    }
}

fn set_status(status: &SharedStatus, update: impl FnOnce(&mut SessionStatus)) {
    update(&mut status.lock().unwrap_or_else(PoisonError::into_inner));
}

/// State owned by the callback thread
struct CallbackHandler {
    targets: TargetConfig,
    callback: DeviceCallback,
    reader: Option<Surface>,
    device: Option<Box<dyn CameraDevice>>,
    session: Option<Box<dyn CaptureSession>>,
    init_tx: Option<SyncSender<CameraResult<()>>>,
    quitting: bool,
    status: SharedStatus,
    fps: FpsMonitor,
    subscribers: Subscribers,
}

impl CallbackHandler {
    fn handle(&mut self, event: CameraEvent) -> LoopAction {
        match event {
            CameraEvent::Opened(device) => self.on_opened(device),
            CameraEvent::Disconnected(id) => {
                warn!(device = %id, "Camera disconnected");
                self.close_all();
                set_status(&self.status, |s| {
                    s.device = DeviceState::Closed;
                    s.session = SessionState::Unconfigured;
                });
                self.report_open(Err(CameraError::Disconnected));
                self.emit(ControllerEvent::DeviceDisconnected(id));
            }
            CameraEvent::Error(id, code) => {
                error!(device = %id, code, "Camera error");
                self.close_all();
                set_status(&self.status, |s| {
                    s.device = DeviceState::Error;
                    s.session = SessionState::Unconfigured;
                });
                self.report_open(Err(CameraError::Device(code)));
                self.emit(ControllerEvent::DeviceError(id, code));
            }
            CameraEvent::SessionConfigured(session) => self.on_session_configured(session),
            CameraEvent::SessionConfigureFailed(reason) => {
                error!(reason = %reason, "Capture session configuration failed");
                set_status(&self.status, |s| s.session = SessionState::Failed);
                self.emit(ControllerEvent::SessionFailed(reason));
            }
            CameraEvent::Frame(frame) => {
                let _reopen = GateGuard(Arc::clone(self.callback.frame_gate()));
                if self.quitting {
                    frame.release();
                    return LoopAction::Stop;
                }
                if self.targets.preview.is_none() {
                    self.fps.record_now();
                }
                match &self.targets.consumer {
                    Some(consumer) => consumer.on_frame(frame),
                    None => frame.release(),
                }
            }
            CameraEvent::PreviewRendered => self.fps.record_now(),
            CameraEvent::Quit => {
                if !self.quitting {
                    debug!("Tearing down camera");
                    self.quitting = true;
                    self.close_all();
                    set_status(&self.status, |s| {
                        s.device = DeviceState::Closed;
                        s.session = SessionState::Unconfigured;
                    });
                    self.report_open(Err(CameraError::CallbackContext(
                        "stopped while opening".into(),
                    )));
                }
                return LoopAction::Stop;
            }
        }
        LoopAction::Continue
    }

    fn on_opened(&mut self, mut device: Box<dyn CameraDevice>) {
        if self.quitting || self.device.is_some() {
            debug!(device = %device.id(), "Closing unexpected device");
            device.close();
            return;
        }

        let id = device.id().clone();
        info!(device = %id, "Camera opened");
        set_status(&self.status, |s| {
            s.device = DeviceState::Open;
            s.session = SessionState::Configuring;
        });
        self.report_open(Ok(()));
        self.emit(ControllerEvent::DeviceOpened(id.clone()));

        let targets = self.build_targets();
        if let Err(e) = device.create_capture_session(targets, self.callback.clone()) {
            error!(device = %id, error = %e, "Failed to create capture session");
            set_status(&self.status, |s| s.session = SessionState::Failed);
            self.emit(ControllerEvent::SessionFailed(e.to_string()));
        }
        self.device = Some(device);
    }

    fn on_session_configured(&mut self, mut session: Box<dyn CaptureSession>) {
        // Camera already closed
        if self.quitting || self.device.is_none() {
            debug!("Session configured after close, discarding");
            session.close();
            return;
        }

        let request = CaptureRequest {
            control_mode: ControlMode::Auto,
            targets: self.request_surfaces(),
        };
        match session.set_repeating_request(request) {
            Ok(()) => {
                info!("Capture session active");
                if let Some(mut previous) = self.session.replace(session) {
                    previous.close();
                }
                set_status(&self.status, |s| s.session = SessionState::Active);
                self.emit(ControllerEvent::SessionActive);
            }
            Err(e) => {
                error!(error = %e, "Failed to start repeating request");
                session.close();
                set_status(&self.status, |s| s.session = SessionState::Failed);
                self.emit(ControllerEvent::SessionFailed(e.to_string()));
            }
        }
    }

    /// Preview, reader and encoder targets, in that order
    fn build_targets(&mut self) -> Vec<CaptureTarget> {
        let mut targets = Vec::with_capacity(3);
        if let Some(surface) = &self.targets.preview {
            targets.push(CaptureTarget::Preview {
                surface: surface.clone(),
                size: self.targets.size,
                callback: self.callback.clone(),
            });
        }
        if self.targets.consumer.is_some() {
            targets.push(CaptureTarget::Reader {
                surface: self.reader_surface().clone(),
                size: self.targets.size,
                format: self.targets.format,
                max_images: constants::READER_MAX_IMAGES,
                callback: self.callback.clone(),
            });
        }
        if let Some(surface) = &self.targets.encoder {
            targets.push(CaptureTarget::Encoder {
                surface: surface.clone(),
            });
        }
        targets
    }

    fn reader_surface(&mut self) -> &Surface {
        self.reader
            .get_or_insert_with(|| Surface::new(SurfaceKind::Reader))
    }

    fn request_surfaces(&mut self) -> Vec<Surface> {
        self.build_targets()
            .iter()
            .map(|t| t.surface().clone())
            .collect()
    }

    fn close_all(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        if let Some(mut device) = self.device.take() {
            info!(device = %device.id(), "Closing camera");
            device.close();
        }
    }

    fn report_open(&mut self, result: CameraResult<()>) {
        if let Some(tx) = self.init_tx.take() {
            // start() may have timed out already
            let _ = tx.try_send(result);
        }
    }

    fn emit(&self, event: ControllerEvent) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted_frame(released: &Arc<AtomicUsize>) -> FrameBuffer {
        let released = Arc::clone(released);
        FrameBuffer::new(2, 2, PixelFormat::Rgba, vec![]).with_release_hook(move || {
            released.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_second_frame_dropped_while_first_in_flight() {
        let (callback, events) = event_channel();
        let released = Arc::new(AtomicUsize::new(0));

        assert!(callback.deliver_frame(counted_frame(&released)));
        assert!(!callback.deliver_frame(counted_frame(&released)));
        assert_eq!(released.load(Ordering::SeqCst), 1, "dropped frame released at once");
        assert_eq!(callback.frame_gate().dropped(), 1);

        let event = events.try_recv().unwrap();
        {
            let _reopen = GateGuard(Arc::clone(callback.frame_gate()));
            drop(event);
        }
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert!(!callback.frame_gate().is_busy());

        assert!(callback.deliver_frame(counted_frame(&released)));
        assert_eq!(callback.frame_gate().delivered(), 2);
    }

    #[test]
    fn test_gate_reopens_when_nobody_listens() {
        let (callback, events) = event_channel();
        drop(events);
        let released = Arc::new(AtomicUsize::new(0));

        assert!(!callback.deliver_frame(counted_frame(&released)));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(!callback.frame_gate().is_busy());
    }

    #[test]
    fn test_target_config_is_empty() {
        let mut targets = TargetConfig {
            preview: None,
            consumer: None,
            encoder: None,
            size: Size::new(2, 2),
            format: PixelFormat::default(),
        };
        assert!(targets.is_empty());
        targets.encoder = Some(Surface::new(SurfaceKind::EncoderInput));
        assert!(!targets.is_empty());
    }
}
