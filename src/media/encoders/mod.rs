// SPDX-License-Identifier: GPL-3.0-only

//! Hardware video encoder and container muxer seams
//!
//! The encode worker drives a [`VideoEncoder`] in surface-input mode: frames
//! reach the codec through its input surface, and the worker only pulls
//! encoded output. A [`Muxer`] persists that output as a single video track.
//! Backends provide both through a [`MediaBackend`].

use crate::backends::camera::types::Surface;
use crate::config::EncoderSettings;
use crate::errors::EncoderResult;
use std::path::Path;
use std::time::Duration;

/// Colour format of encoder input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorFormat {
    /// Frames are rendered into the codec's input surface
    #[default]
    Surface,
}

/// Encoder configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub bit_rate: u32,
    pub frame_rate: u32,
    /// Seconds between key frames
    pub i_frame_interval: u32,
    pub color_format: ColorFormat,
}

impl EncoderConfig {
    pub fn new(width: u32, height: u32, settings: &EncoderSettings) -> Self {
        Self {
            mime_type: settings.mime_type.clone(),
            width,
            height,
            bit_rate: settings.bit_rate,
            frame_rate: settings.frame_rate,
            i_frame_interval: settings.i_frame_interval,
            color_format: ColorFormat::Surface,
        }
    }
}

/// Format of the encoder's output stream, known once the codec reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFormat {
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    /// Codec specific data (SPS/PPS for AVC)
    pub codec_specific_data: Vec<u8>,
}

/// Metadata of one encoded output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    /// Presentation time in microseconds
    pub presentation_time_us: i64,
    pub flags: u32,
}

impl BufferInfo {
    /// Sample is a key frame
    pub const FLAG_KEY_FRAME: u32 = 1;
    /// Buffer carries codec configuration, not media
    pub const FLAG_CODEC_CONFIG: u32 = 2;
    /// Last buffer of the stream
    pub const FLAG_END_OF_STREAM: u32 = 4;

    pub fn is_end_of_stream(&self) -> bool {
        self.flags & Self::FLAG_END_OF_STREAM != 0
    }

    pub fn is_codec_config(&self) -> bool {
        self.flags & Self::FLAG_CODEC_CONFIG != 0
    }
}

/// One encoded buffer, owned by the codec until released
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBuffer {
    /// Index to hand back to [`VideoEncoder::release_output_buffer`]
    pub index: usize,
    pub data: Vec<u8>,
    pub info: BufferInfo,
}

impl OutputBuffer {
    /// Payload bytes described by `info`
    pub fn payload(&self) -> &[u8] {
        let start = self.info.offset.min(self.data.len());
        let end = (self.info.offset + self.info.size).min(self.data.len());
        &self.data[start..end]
    }
}

/// Result of one bounded output poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputStatus {
    /// Nothing produced within the timeout
    TryAgainLater,
    /// The output format is now known; see [`VideoEncoder::output_format`]
    FormatChanged,
    /// An encoded buffer
    Buffer(OutputBuffer),
}

/// Hardware video encoder in surface-input mode
pub trait VideoEncoder: Send {
    fn configure(&mut self, config: &EncoderConfig) -> EncoderResult<()>;

    /// Create the surface the camera renders frames into
    fn create_input_surface(&mut self) -> EncoderResult<Surface>;

    fn start(&mut self) -> EncoderResult<()>;

    /// Wait up to `timeout` for output
    fn dequeue_output_buffer(&mut self, timeout: Duration) -> EncoderResult<OutputStatus>;

    /// Current output format, valid after [`OutputStatus::FormatChanged`]
    fn output_format(&self) -> EncoderResult<TrackFormat>;

    fn release_output_buffer(&mut self, index: usize, render: bool) -> EncoderResult<()>;

    /// No more input will arrive; the codec flushes and emits end-of-stream
    fn signal_end_of_input(&mut self) -> EncoderResult<()>;

    fn stop(&mut self) -> EncoderResult<()>;

    /// Free codec resources; called exactly once
    fn release(&mut self);

    /// Release the input surface created by this encoder
    fn release_input_surface(&mut self, surface: Surface);
}

/// Single-track container writer
pub trait Muxer: Send {
    /// Register a track; returns its index
    fn add_track(&mut self, format: &TrackFormat) -> EncoderResult<usize>;

    fn start(&mut self) -> EncoderResult<()>;

    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo)
    -> EncoderResult<()>;

    /// Finalize the container
    fn stop(&mut self) -> EncoderResult<()>;
}

/// Factory of encoders and muxers
pub trait MediaBackend: Send + Sync {
    fn create_encoder(&self, mime_type: &str) -> EncoderResult<Box<dyn VideoEncoder>>;

    fn create_muxer(&self, output: &Path) -> EncoderResult<Box<dyn Muxer>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_flags() {
        let info = BufferInfo {
            flags: BufferInfo::FLAG_END_OF_STREAM | BufferInfo::FLAG_KEY_FRAME,
            ..Default::default()
        };
        assert!(info.is_end_of_stream());
        assert!(!info.is_codec_config());
    }

    #[test]
    fn test_payload_respects_offset_and_size() {
        let buffer = OutputBuffer {
            index: 0,
            data: vec![0, 1, 2, 3, 4],
            info: BufferInfo {
                offset: 1,
                size: 3,
                ..Default::default()
            },
        };
        assert_eq!(buffer.payload(), &[1, 2, 3]);
    }

    #[test]
    fn test_config_from_settings() {
        let config = EncoderConfig::new(640, 480, &EncoderSettings::default());
        assert_eq!(config.mime_type, "video/avc");
        assert_eq!(config.bit_rate, 3_000_000);
        assert_eq!(config.frame_rate, 30);
        assert_eq!(config.i_frame_interval, 10);
        assert_eq!(config.color_format, ColorFormat::Surface);
    }
}
