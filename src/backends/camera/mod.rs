// SPDX-License-Identifier: GPL-3.0-only

//! Camera backend abstraction
//!
//! ```text
//! ┌──────────────────────────┐
//! │ CaptureSessionController │  ← start/stop, configuration, frame routing
//! └────────────┬─────────────┘
//!              │ open(id, callback)
//!              ▼
//! ┌──────────────────────────┐      CameraEvent       ┌─────────────────┐
//! │ ImagingSource / Device / │ ─────────────────────▶ │ callback thread │
//! │ CaptureSession traits    │   (std mpsc channel)   │ (camera-events) │
//! └──────────────────────────┘                        └─────────────────┘
//! ```
//!
//! Hardware backends implement the three traits. Everything the hardware
//! reports (open results, session results, frames) arrives as a
//! [`CameraEvent`] through a [`DeviceCallback`], and is handled serially on
//! the controller's callback thread.

pub mod controller;
pub mod fps;
pub mod frame_loop;
pub mod types;

pub use controller::{CaptureSessionController, ControllerEvent};
pub use fps::{FpsCounter, FpsMonitor};
pub use types::*;

use crate::errors::{CameraError, CameraResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use tracing::{debug, info};

/// Enumerates and opens cameras
pub trait ImagingSource: Send + Sync {
    /// List device ids in enumeration order
    fn enumerate(&self) -> CameraResult<Vec<DeviceId>>;

    /// Static properties of a device
    fn characteristics(&self, id: &DeviceId) -> CameraResult<DeviceCharacteristics>;

    /// Open a device asynchronously
    ///
    /// The outcome is reported through `callback`: [`CameraEvent::Opened`]
    /// on success, [`CameraEvent::Error`] or [`CameraEvent::Disconnected`]
    /// otherwise. An `Err` return means the request itself was refused.
    fn open(&self, id: &DeviceId, callback: DeviceCallback) -> CameraResult<()>;
}

/// An open camera
pub trait CameraDevice: Send {
    fn id(&self) -> &DeviceId;

    /// Configure a capture session writing into `targets`
    ///
    /// Reports [`CameraEvent::SessionConfigured`] or
    /// [`CameraEvent::SessionConfigureFailed`] through `callback`.
    fn create_capture_session(
        &mut self,
        targets: Vec<CaptureTarget>,
        callback: DeviceCallback,
    ) -> CameraResult<()>;

    /// Close the device; idempotent
    fn close(&mut self);
}

/// A configured capture session
pub trait CaptureSession: Send {
    /// Start (or replace) the repeating request
    fn set_repeating_request(&mut self, request: CaptureRequest) -> CameraResult<()>;

    /// Stop capturing; idempotent
    fn close(&mut self);
}

/// Application consumer of reader frames
///
/// Registered before start. Called on the callback thread; the frame is
/// released when the consumer drops it.
pub trait FrameConsumer: Send + Sync {
    fn on_frame(&self, frame: FrameBuffer);
}

/// Destination surface of a capture session
#[derive(Debug, Clone)]
pub enum CaptureTarget {
    /// On-screen preview. Backends call
    /// [`DeviceCallback::preview_rendered`] for every frame shown.
    Preview {
        surface: Surface,
        size: Size,
        callback: DeviceCallback,
    },
    /// Input surface of the video encoder
    Encoder { surface: Surface },
    /// CPU-readable frame queue. Backends push frames with
    /// [`DeviceCallback::deliver_frame`].
    Reader {
        surface: Surface,
        size: Size,
        format: PixelFormat,
        max_images: usize,
        callback: DeviceCallback,
    },
}

impl CaptureTarget {
    pub fn surface(&self) -> &Surface {
        match self {
            CaptureTarget::Preview { surface, .. }
            | CaptureTarget::Encoder { surface }
            | CaptureTarget::Reader { surface, .. } => surface,
        }
    }
}

/// Everything a backend reports to the controller
pub enum CameraEvent {
    /// Device opened
    Opened(Box<dyn CameraDevice>),
    /// Device went away
    Disconnected(DeviceId),
    /// Device failed with a backend-specific code
    Error(DeviceId, i32),
    /// Capture session ready
    SessionConfigured(Box<dyn CaptureSession>),
    /// Capture session could not be configured
    SessionConfigureFailed(String),
    /// Reader frame available
    Frame(FrameBuffer),
    /// Preview surface displayed a frame
    PreviewRendered,
    /// Ask the callback thread to tear down and exit
    Quit,
}

impl std::fmt::Debug for CameraEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraEvent::Opened(device) => write!(f, "Opened({})", device.id()),
            CameraEvent::Disconnected(id) => write!(f, "Disconnected({})", id),
            CameraEvent::Error(id, code) => write!(f, "Error({}, {})", id, code),
            CameraEvent::SessionConfigured(_) => write!(f, "SessionConfigured"),
            CameraEvent::SessionConfigureFailed(msg) => {
                write!(f, "SessionConfigureFailed({})", msg)
            }
            CameraEvent::Frame(frame) => write!(f, "Frame({:?})", frame),
            CameraEvent::PreviewRendered => write!(f, "PreviewRendered"),
            CameraEvent::Quit => write!(f, "Quit"),
        }
    }
}

/// Admits at most one reader frame between delivery and consumption
///
/// A frame delivered while another is queued or being consumed is released
/// on the spot and counted as dropped.
#[derive(Debug, Default)]
pub struct FrameGate {
    in_flight: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl FrameGate {
    fn try_acquire(&self) -> bool {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Admit the next frame
    pub fn reopen(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Frames admitted
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Frames released because another was in flight
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Sending half of the callback thread's event queue
///
/// Sends never block. Once the callback thread is gone every send is a
/// no-op, and frames sent then are released immediately. Clones share one
/// [`FrameGate`].
#[derive(Debug, Clone)]
pub struct DeviceCallback {
    tx: Sender<CameraEvent>,
    gate: Arc<FrameGate>,
}

impl DeviceCallback {
    pub fn new(tx: Sender<CameraEvent>) -> Self {
        Self {
            tx,
            gate: Arc::new(FrameGate::default()),
        }
    }

    /// Post an event; returns false when nobody is listening any more
    pub fn send(&self, event: CameraEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn opened(&self, device: Box<dyn CameraDevice>) -> bool {
        self.send(CameraEvent::Opened(device))
    }

    pub fn disconnected(&self, id: DeviceId) -> bool {
        self.send(CameraEvent::Disconnected(id))
    }

    pub fn error(&self, id: DeviceId, code: i32) -> bool {
        self.send(CameraEvent::Error(id, code))
    }

    pub fn session_configured(&self, session: Box<dyn CaptureSession>) -> bool {
        self.send(CameraEvent::SessionConfigured(session))
    }

    pub fn session_failed(&self, reason: impl Into<String>) -> bool {
        self.send(CameraEvent::SessionConfigureFailed(reason.into()))
    }

    /// Hand a frame to the controller
    ///
    /// Returns false if the frame was released instead: another frame is
    /// still in flight, or nobody is listening.
    pub fn deliver_frame(&self, frame: FrameBuffer) -> bool {
        if !self.gate.try_acquire() {
            debug!(timestamp_ns = frame.timestamp_ns, "Frame in flight, dropping");
            return false;
        }
        if !self.send(CameraEvent::Frame(frame)) {
            self.gate.reopen();
            return false;
        }
        true
    }

    pub fn preview_rendered(&self) -> bool {
        self.send(CameraEvent::PreviewRendered)
    }

    /// Gate shared by every clone of this callback
    pub fn frame_gate(&self) -> &Arc<FrameGate> {
        &self.gate
    }
}

/// Pick the first rear-facing camera in enumeration order
///
/// Front-facing and external cameras are skipped.
pub fn select_rear_device(
    source: &dyn ImagingSource,
) -> CameraResult<(DeviceId, DeviceCharacteristics)> {
    let ids = source.enumerate()?;
    debug!(count = ids.len(), "Enumerated cameras");

    for id in ids {
        let characteristics = source.characteristics(&id)?;
        if characteristics.facing != LensFacing::Back {
            debug!(device = %id, facing = ?characteristics.facing, "Skipping camera");
            continue;
        }

        let sizes: Vec<String> = characteristics
            .supported_sizes
            .iter()
            .map(ToString::to_string)
            .collect();
        info!(device = %id, sizes = ?sizes, "Selected rear camera");
        return Ok((id, characteristics));
    }

    Err(CameraError::NoCameraFound)
}
