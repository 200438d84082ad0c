// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture pipeline
//!
//! Every component has its own error enum; [`PipelineError`] wraps them for
//! callers that drive the whole pipeline. [`ErrorKind`] classifies any error
//! into the pipeline's failure taxonomy.

use crate::backends::camera::types::PixelFormat;
use std::fmt;

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Camera result alias
pub type CameraResult<T> = Result<T, CameraError>;

/// Encoder result alias
pub type EncoderResult<T> = Result<T, EncoderError>;

/// Failure classes of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Setup mutated after start, or an invalid setup value
    Configuration,
    /// Device enumeration, characteristics or open failure
    DeviceAccess,
    /// Frame layout the converter cannot handle
    InvalidFormat,
    /// Encoder creation, configuration or runtime failure
    Encoder,
    /// Best-effort muxer stop failed (never fatal)
    MuxerTeardown,
    /// Snapshot could not be encoded or written
    SnapshotWrite,
    /// Settings file could not be read or parsed
    Settings,
}

/// Top-level pipeline error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Invalid or late configuration
    Configuration(String),
    /// Camera errors
    Camera(CameraError),
    /// Pixel layout errors
    Format(FormatError),
    /// Encoder / muxer errors
    Encoder(EncoderError),
    /// Snapshot errors
    Photo(PhotoError),
    /// Settings file errors
    Settings(String),
}

/// Camera device and session errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// No usable rear-facing camera was enumerated
    NoCameraFound,
    /// Enumeration, characteristics or open call failed
    AccessFailed(String),
    /// The device did not report an open outcome in time
    OpenTimedOut,
    /// Device disconnected
    Disconnected,
    /// Device reported an error code
    Device(i32),
    /// Capture session could not be configured
    SessionFailed(String),
    /// The callback context could not be started or died
    CallbackContext(String),
}

/// Frame layout errors raised by the format converter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Frame is not planar 4:2:0
    Unsupported(PixelFormat),
    /// Wrong number of planes
    PlaneCount(usize),
    /// Width or height is zero or odd
    Dimensions { width: u32, height: u32 },
    /// U and V planes do not share strides
    MismatchedChromaStrides,
    /// A plane is shorter than its strides require
    PlaneTooShort {
        plane: usize,
        needed: usize,
        actual: usize,
    },
}

/// Encoder and muxer errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderError {
    /// No encoder available for the requested codec
    CreateFailed(String),
    /// configure() was rejected
    ConfigureFailed(String),
    /// Input surface creation or start() failed
    StartFailed(String),
    /// Error raised while draining
    Codec(String),
    /// Muxer creation, track registration or sample write failed
    Muxer(String),
    /// Best-effort muxer stop failed; the container may be truncated
    MuxerTeardown(String),
    /// The worker context exited before reporting
    WorkerDied,
}

/// Snapshot errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoError {
    /// Snapshot requested without a snapshot consumer configured
    NoConsumer,
    /// Frame could not be converted
    Conversion(FormatError),
    /// JPEG compression failed
    EncodingFailed(String),
    /// Writing the image failed
    WriteFailed(String),
}

impl PipelineError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Configuration(_) => ErrorKind::Configuration,
            PipelineError::Camera(_) => ErrorKind::DeviceAccess,
            PipelineError::Format(_) => ErrorKind::InvalidFormat,
            PipelineError::Encoder(EncoderError::MuxerTeardown(_)) => ErrorKind::MuxerTeardown,
            PipelineError::Encoder(_) => ErrorKind::Encoder,
            PipelineError::Photo(PhotoError::NoConsumer) => ErrorKind::Configuration,
            PipelineError::Photo(_) => ErrorKind::SnapshotWrite,
            PipelineError::Settings(_) => ErrorKind::Settings,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            PipelineError::Camera(e) => write!(f, "Camera error: {}", e),
            PipelineError::Format(e) => write!(f, "Invalid format: {}", e),
            PipelineError::Encoder(e) => write!(f, "Encoder error: {}", e),
            PipelineError::Photo(e) => write!(f, "Snapshot error: {}", e),
            PipelineError::Settings(msg) => write!(f, "Settings error: {}", msg),
        }
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::NoCameraFound => write!(f, "No rear-facing camera found"),
            CameraError::AccessFailed(msg) => write!(f, "Camera access failed: {}", msg),
            CameraError::OpenTimedOut => write!(f, "Timed out waiting for camera to open"),
            CameraError::Disconnected => write!(f, "Camera disconnected"),
            CameraError::Device(code) => write!(f, "Camera device error {}", code),
            CameraError::SessionFailed(msg) => write!(f, "Capture session failed: {}", msg),
            CameraError::CallbackContext(msg) => write!(f, "Callback context failed: {}", msg),
        }
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::Unsupported(format) => {
                write!(f, "expected planar YUV 4:2:0, got {:?}", format)
            }
            FormatError::PlaneCount(n) => write!(f, "expected 3 planes, got {}", n),
            FormatError::Dimensions { width, height } => {
                write!(f, "dimensions {}x{} must be even and non-zero", width, height)
            }
            FormatError::MismatchedChromaStrides => {
                write!(f, "U and V planes have different strides")
            }
            FormatError::PlaneTooShort {
                plane,
                needed,
                actual,
            } => write!(
                f,
                "plane {} holds {} bytes, strides require {}",
                plane, actual, needed
            ),
        }
    }
}

impl fmt::Display for EncoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderError::CreateFailed(msg) => write!(f, "Failed to create encoder: {}", msg),
            EncoderError::ConfigureFailed(msg) => write!(f, "Failed to configure encoder: {}", msg),
            EncoderError::StartFailed(msg) => write!(f, "Failed to start encoder: {}", msg),
            EncoderError::Codec(msg) => write!(f, "Codec error: {}", msg),
            EncoderError::Muxer(msg) => write!(f, "Muxer error: {}", msg),
            EncoderError::MuxerTeardown(msg) => write!(f, "Failed to stop muxer: {}", msg),
            EncoderError::WorkerDied => write!(f, "Encode worker exited unexpectedly"),
        }
    }
}

impl fmt::Display for PhotoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhotoError::NoConsumer => write!(f, "No snapshot consumer configured"),
            PhotoError::Conversion(e) => write!(f, "Conversion failed: {}", e),
            PhotoError::EncodingFailed(msg) => write!(f, "Encoding failed: {}", msg),
            PhotoError::WriteFailed(msg) => write!(f, "Write failed: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}
impl std::error::Error for CameraError {}
impl std::error::Error for FormatError {}
impl std::error::Error for EncoderError {}
impl std::error::Error for PhotoError {}

impl From<CameraError> for PipelineError {
    fn from(err: CameraError) -> Self {
        PipelineError::Camera(err)
    }
}

impl From<FormatError> for PipelineError {
    fn from(err: FormatError) -> Self {
        PipelineError::Format(err)
    }
}

impl From<EncoderError> for PipelineError {
    fn from(err: EncoderError) -> Self {
        PipelineError::Encoder(err)
    }
}

impl From<PhotoError> for PipelineError {
    fn from(err: PhotoError) -> Self {
        PipelineError::Photo(err)
    }
}

impl From<FormatError> for PhotoError {
    fn from(err: FormatError) -> Self {
        PhotoError::Conversion(err)
    }
}

impl From<std::io::Error> for PhotoError {
    fn from(err: std::io::Error) -> Self {
        PhotoError::WriteFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            PipelineError::Configuration("late".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            PipelineError::from(CameraError::NoCameraFound).kind(),
            ErrorKind::DeviceAccess
        );
        assert_eq!(
            PipelineError::from(EncoderError::MuxerTeardown("eio".into())).kind(),
            ErrorKind::MuxerTeardown
        );
        assert_eq!(
            PipelineError::from(PhotoError::WriteFailed("denied".into())).kind(),
            ErrorKind::SnapshotWrite
        );
        assert_eq!(
            PipelineError::from(FormatError::PlaneCount(1)).kind(),
            ErrorKind::InvalidFormat
        );
    }

    #[test]
    fn test_io_error_becomes_write_failure() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(PhotoError::from(io), PhotoError::WriteFailed(_)));
    }
}
