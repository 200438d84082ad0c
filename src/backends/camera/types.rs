// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera backends

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a physical camera as enumerated by the imaging source
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Direction a camera lens faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LensFacing {
    /// Same side as the screen
    Front,
    /// Opposite side of the screen
    Back,
    /// Detachable or external camera
    External,
}

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Static properties of a camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCharacteristics {
    pub facing: LensFacing,
    /// Output sizes supported for still capture
    pub supported_sizes: Vec<Size>,
}

/// Pixel format of frames delivered to the snapshot reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar 4:2:0 with per-plane row and pixel strides (Y, U, V)
    #[default]
    Yuv420Flexible,
    /// Semi-planar 4:2:0, Y plane followed by interleaved V/U
    Nv21,
    /// Compressed JPEG
    Jpeg,
    /// 32-bit RGBA
    Rgba,
}

impl PixelFormat {
    /// Check if this is the flexible planar layout the converter accepts
    pub fn is_planar_yuv420(&self) -> bool {
        matches!(self, Self::Yuv420Flexible)
    }

    /// Number of planes a frame of this format carries
    pub fn plane_count(&self) -> usize {
        match self {
            Self::Yuv420Flexible => 3,
            Self::Nv21 => 2,
            Self::Jpeg | Self::Rgba => 1,
        }
    }
}

/// Lifecycle of the camera device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    #[default]
    Closed,
    Opening,
    Open,
    Error,
}

/// Lifecycle of the capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Unconfigured,
    Configuring,
    Active,
    Failed,
}

/// What a surface is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    /// On-screen preview
    Preview,
    /// Input of a hardware encoder
    EncoderInput,
    /// CPU-readable frame queue feeding the frame consumer
    Reader,
}

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque buffer-queue endpoint
///
/// Surfaces are compared by id; clones refer to the same endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Surface {
    id: u64,
    kind: SurfaceKind,
}

impl Surface {
    /// Allocate a new surface with a process-unique id
    pub fn new(kind: SurfaceKind) -> Self {
        Self {
            id: NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed),
            kind,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> SurfaceKind {
        self.kind
    }
}

/// One plane of a captured frame
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Arc<[u8]>,
    /// Bytes between the starts of two consecutive rows
    pub row_stride: usize,
    /// Bytes between two consecutive samples in a row
    pub pixel_stride: usize,
}

impl Plane {
    pub fn new(data: impl Into<Arc<[u8]>>, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data: data.into(),
            row_stride,
            pixel_stride,
        }
    }

    /// Minimum byte length for `rows` rows of `cols` samples
    pub fn required_len(&self, cols: usize, rows: usize) -> usize {
        if cols == 0 || rows == 0 {
            return 0;
        }
        (rows - 1) * self.row_stride + (cols - 1) * self.pixel_stride + 1
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// One captured frame
///
/// The frame returns its buffer to the producer exactly once: when it is
/// dropped. Whoever holds the frame owns it; handing it on moves it.
pub struct FrameBuffer {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
    /// Sensor timestamp in nanoseconds
    pub timestamp_ns: u64,
    release: Option<ReleaseHook>,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32, format: PixelFormat, planes: Vec<Plane>) -> Self {
        Self {
            width,
            height,
            format,
            planes,
            timestamp_ns: 0,
            release: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp_ns: u64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    /// Run `hook` when the frame is released
    pub fn with_release_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    /// Release the frame now
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if let Some(hook) = self.release.take() {
            hook();
        }
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("planes", &self.planes.len())
            .field("timestamp_ns", &self.timestamp_ns)
            .finish()
    }
}

/// 3A control mode of a capture request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    /// Continuous automatic exposure, focus and white balance
    #[default]
    Auto,
    Off,
}

/// Repeating capture request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub control_mode: ControlMode,
    /// Surfaces every capture is written to
    pub targets: Vec<Surface>,
}
