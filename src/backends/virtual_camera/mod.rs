// SPDX-License-Identifier: GPL-3.0-only

//! Virtual camera backend
//!
//! In-process implementation of every hardware seam: an imaging source with
//! synthetic cameras, and (in [`media`]) a scripted encoder with a recording
//! muxer. Frames are synthetic I420 gradients whose release is counted, so
//! buffer ownership can be checked end to end.
//!
//! # Architecture
//!
//! ```text
//! VirtualCameraSource ── open ──▶ VirtualDevice ── session ──▶ VirtualSession
//!        │                                                        │
//!        │ push_frame / render_preview / FrameProducer            │ repeating request
//!        ▼                                                        ▼
//!   reader / preview callbacks of the active request  ◀───────────┘
//! ```

pub mod media;

pub use media::{EncoderScript, MediaCall, MuxerScript, VirtualMediaBackend};

use crate::backends::camera::types::*;
use crate::backends::camera::{
    CameraDevice, CaptureSession, CaptureTarget, DeviceCallback, ImagingSource,
};
use crate::errors::{CameraError, CameraResult};
use crate::media::formats::conversions::i420_frame;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A camera the virtual source enumerates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDeviceSpec {
    pub id: DeviceId,
    pub characteristics: DeviceCharacteristics,
}

impl VirtualDeviceSpec {
    pub fn new(id: &str, facing: LensFacing) -> Self {
        Self {
            id: DeviceId::new(id),
            characteristics: DeviceCharacteristics {
                facing,
                supported_sizes: vec![
                    Size::new(1920, 1080),
                    Size::new(1280, 720),
                    Size::new(640, 480),
                ],
            },
        }
    }
}

/// How the source answers an open request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenBehavior {
    /// Report the opened device
    #[default]
    Succeed,
    /// Refuse the request synchronously
    Refuse,
    /// Report a device error with this code
    Fail(i32),
    /// Report a disconnect
    Disconnect,
    /// Never answer
    Silent,
}

/// How devices answer a capture session request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionBehavior {
    #[default]
    Succeed,
    Fail,
}

/// Counters shared by the source and everything it hands out
#[derive(Debug, Default)]
struct Counters {
    open_requests: AtomicU64,
    devices_closed: AtomicU64,
    sessions_configured: AtomicU64,
    sessions_closed: AtomicU64,
    frames_produced: AtomicU64,
    frames_released: AtomicU64,
    previews_rendered: AtomicU64,
}

/// Callbacks of the current repeating request
#[derive(Debug, Default)]
struct Streaming {
    reader: Option<(DeviceCallback, Size)>,
    preview: Option<DeviceCallback>,
    request: Option<CaptureRequest>,
    targets: Vec<CaptureTarget>,
}

#[derive(Debug, Default)]
struct SourceState {
    counters: Counters,
    streaming: Mutex<Streaming>,
    /// Callback of the device currently open
    opened: Mutex<Option<(DeviceId, DeviceCallback)>>,
    open_behavior: Mutex<OpenBehavior>,
    session_behavior: Mutex<SessionBehavior>,
}

impl SourceState {
    fn streaming(&self) -> MutexGuard<'_, Streaming> {
        self.streaming.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn opened(&self) -> MutexGuard<'_, Option<(DeviceId, DeviceCallback)>> {
        self.opened.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Imaging source with synthetic cameras
#[derive(Debug, Clone)]
pub struct VirtualCameraSource {
    devices: Vec<VirtualDeviceSpec>,
    state: Arc<SourceState>,
}

impl Default for VirtualCameraSource {
    /// One front camera followed by one rear camera
    fn default() -> Self {
        Self::new(vec![
            VirtualDeviceSpec::new("virtual-front", LensFacing::Front),
            VirtualDeviceSpec::new("virtual-back", LensFacing::Back),
        ])
    }
}

impl VirtualCameraSource {
    pub fn new(devices: Vec<VirtualDeviceSpec>) -> Self {
        Self {
            devices,
            state: Arc::new(SourceState::default()),
        }
    }

    pub fn set_open_behavior(&self, behavior: OpenBehavior) {
        *self
            .state
            .open_behavior
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    pub fn set_session_behavior(&self, behavior: SessionBehavior) {
        *self
            .state
            .session_behavior
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    /// Unplug the open camera
    ///
    /// Returns false when no device is open.
    pub fn disconnect(&self) -> bool {
        let opened = self.state.opened().clone();
        match opened {
            Some((id, callback)) => {
                info!(device = %id, "Disconnecting virtual camera");
                callback.disconnected(id)
            }
            None => false,
        }
    }

    /// Report a fatal error `code` on the open camera
    pub fn fail(&self, code: i32) -> bool {
        let opened = self.state.opened().clone();
        match opened {
            Some((id, callback)) => {
                info!(device = %id, code, "Failing virtual camera");
                callback.error(id, code)
            }
            None => false,
        }
    }

    /// A device is open and not yet closed
    pub fn has_open_device(&self) -> bool {
        self.state.opened().is_some()
    }

    /// Deliver one synthetic frame to the active reader target
    ///
    /// Returns false when no reader is streaming or nobody received it; the
    /// frame is released either way.
    pub fn push_frame(&self) -> bool {
        let reader = self.state.streaming().reader.clone();
        let Some((callback, size)) = reader else {
            return false;
        };
        match self.synthetic_frame(size) {
            Some(frame) => callback.deliver_frame(frame),
            None => false,
        }
    }

    /// Report one frame shown on the active preview target
    pub fn render_preview(&self) -> bool {
        let preview = self.state.streaming().preview.clone();
        match preview {
            Some(callback) => {
                self.state
                    .counters
                    .previews_rendered
                    .fetch_add(1, Ordering::Relaxed);
                callback.preview_rendered()
            }
            None => false,
        }
    }

    /// Push reader frames and preview notifications every `interval`
    pub fn spawn_producer(&self, interval: Duration) -> FrameProducer {
        let source = self.clone();
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = std::thread::Builder::new()
            .name("virtual-producer".to_string())
            .spawn(move || {
                let start = Instant::now();
                let mut ticks = 0u64;
                while flag.load(Ordering::Acquire) {
                    source.push_frame();
                    source.render_preview();
                    ticks += 1;
                    let next = interval * ticks as u32;
                    if let Some(wait) = next.checked_sub(start.elapsed()) {
                        std::thread::sleep(wait);
                    }
                }
                debug!(ticks, "Virtual producer exiting");
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Failed to spawn virtual producer");
                None
            }
        };
        FrameProducer { running, handle }
    }

    fn synthetic_frame(&self, size: Size) -> Option<FrameBuffer> {
        let index = self
            .state
            .counters
            .frames_produced
            .fetch_add(1, Ordering::Relaxed);
        let data = gradient_i420(size, index);
        let state = Arc::clone(&self.state);
        match i420_frame(size.width, size.height, &data) {
            Ok(frame) => Some(
                frame
                    .with_timestamp(index * 33_333_333)
                    .with_release_hook(move || {
                        state
                            .counters
                            .frames_released
                            .fetch_add(1, Ordering::Relaxed);
                    }),
            ),
            Err(e) => {
                warn!(size = %size, error = %e, "Cannot build synthetic frame");
                self.state
                    .counters
                    .frames_released
                    .fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn open_requests(&self) -> u64 {
        self.state.counters.open_requests.load(Ordering::Relaxed)
    }

    pub fn devices_closed(&self) -> u64 {
        self.state.counters.devices_closed.load(Ordering::Relaxed)
    }

    pub fn sessions_configured(&self) -> u64 {
        self.state.counters.sessions_configured.load(Ordering::Relaxed)
    }

    pub fn sessions_closed(&self) -> u64 {
        self.state.counters.sessions_closed.load(Ordering::Relaxed)
    }

    pub fn frames_produced(&self) -> u64 {
        self.state.counters.frames_produced.load(Ordering::Relaxed)
    }

    pub fn frames_released(&self) -> u64 {
        self.state.counters.frames_released.load(Ordering::Relaxed)
    }

    /// A repeating request is active
    pub fn is_streaming(&self) -> bool {
        self.state.streaming().request.is_some()
    }

    /// Repeating request of the active session
    pub fn active_request(&self) -> Option<CaptureRequest> {
        self.state.streaming().request.clone()
    }

    /// Targets of the most recent capture session, in order
    pub fn session_targets(&self) -> Vec<CaptureTarget> {
        self.state.streaming().targets.clone()
    }
}

impl ImagingSource for VirtualCameraSource {
    fn enumerate(&self) -> CameraResult<Vec<DeviceId>> {
        Ok(self.devices.iter().map(|d| d.id.clone()).collect())
    }

    fn characteristics(&self, id: &DeviceId) -> CameraResult<DeviceCharacteristics> {
        self.devices
            .iter()
            .find(|d| &d.id == id)
            .map(|d| d.characteristics.clone())
            .ok_or_else(|| CameraError::AccessFailed(format!("unknown camera {}", id)))
    }

    fn open(&self, id: &DeviceId, callback: DeviceCallback) -> CameraResult<()> {
        self.state
            .counters
            .open_requests
            .fetch_add(1, Ordering::Relaxed);
        if !self.devices.iter().any(|d| &d.id == id) {
            return Err(CameraError::AccessFailed(format!("unknown camera {}", id)));
        }

        let behavior = *self
            .state
            .open_behavior
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        info!(device = %id, behavior = ?behavior, "Opening virtual camera");

        match behavior {
            OpenBehavior::Succeed => {
                *self.state.opened() = Some((id.clone(), callback.clone()));
                callback.opened(Box::new(VirtualDevice {
                    id: id.clone(),
                    state: Arc::clone(&self.state),
                    closed: false,
                }));
            }
            OpenBehavior::Refuse => {
                return Err(CameraError::AccessFailed(format!(
                    "camera {} is in use",
                    id
                )));
            }
            OpenBehavior::Fail(code) => {
                callback.error(id.clone(), code);
            }
            OpenBehavior::Disconnect => {
                callback.disconnected(id.clone());
            }
            OpenBehavior::Silent => {}
        }
        Ok(())
    }
}

/// Opened virtual camera
#[derive(Debug)]
pub struct VirtualDevice {
    id: DeviceId,
    state: Arc<SourceState>,
    closed: bool,
}

impl CameraDevice for VirtualDevice {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn create_capture_session(
        &mut self,
        targets: Vec<CaptureTarget>,
        callback: DeviceCallback,
    ) -> CameraResult<()> {
        if self.closed {
            return Err(CameraError::SessionFailed("device closed".into()));
        }
        debug!(device = %self.id, targets = targets.len(), "Creating virtual session");
        self.state.streaming().targets = targets.clone();

        let behavior = *self
            .state
            .session_behavior
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match behavior {
            SessionBehavior::Succeed => {
                self.state
                    .counters
                    .sessions_configured
                    .fetch_add(1, Ordering::Relaxed);
                callback.session_configured(Box::new(VirtualSession {
                    targets,
                    state: Arc::clone(&self.state),
                    closed: false,
                }));
            }
            SessionBehavior::Fail => {
                callback.session_failed("virtual session rejected");
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        {
            let mut opened = self.state.opened();
            if opened.as_ref().is_some_and(|(id, _)| id == &self.id) {
                *opened = None;
            }
        }
        self.state
            .counters
            .devices_closed
            .fetch_add(1, Ordering::Relaxed);
        debug!(device = %self.id, "Virtual camera closed");
    }
}

/// Capture session of a virtual camera
#[derive(Debug)]
pub struct VirtualSession {
    targets: Vec<CaptureTarget>,
    state: Arc<SourceState>,
    closed: bool,
}

impl CaptureSession for VirtualSession {
    fn set_repeating_request(&mut self, request: CaptureRequest) -> CameraResult<()> {
        if self.closed {
            return Err(CameraError::SessionFailed("session closed".into()));
        }

        let mut streaming = self.state.streaming();
        streaming.reader = None;
        streaming.preview = None;
        for target in &self.targets {
            if !request.targets.contains(target.surface()) {
                continue;
            }
            match target {
                CaptureTarget::Reader { size, callback, .. } => {
                    streaming.reader = Some((callback.clone(), *size))
                }
                CaptureTarget::Preview { callback, .. } => {
                    streaming.preview = Some(callback.clone())
                }
                CaptureTarget::Encoder { .. } => {}
            }
        }
        streaming.request = Some(request);
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        {
            let mut streaming = self.state.streaming();
            streaming.reader = None;
            streaming.preview = None;
            streaming.request = None;
        }
        self.state
            .counters
            .sessions_closed
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Background frame producer; stops when dropped
#[derive(Debug)]
pub struct FrameProducer {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FrameProducer {
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FrameProducer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Diagonal luma gradient shifted by `index`, neutral chroma
fn gradient_i420(size: Size, index: u64) -> Vec<u8> {
    let w = size.width as usize;
    let h = size.height as usize;
    let mut data = Vec::with_capacity(w * h * 3 / 2);
    for y in 0..h {
        for x in 0..w {
            data.push(((x + y + index as usize) % 256) as u8);
        }
    }
    data.resize(w * h * 3 / 2, 128);
    data
}
