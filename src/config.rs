// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline settings
//!
//! Settings are plain serde structs. Missing fields fall back to the
//! defaults in [`crate::constants`], so a partial JSON file is valid.

use crate::backends::camera::types::PixelFormat;
use crate::constants;
use crate::errors::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Video encoder settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    /// Codec MIME type
    pub mime_type: String,
    /// Target bit rate (bits per second)
    pub bit_rate: u32,
    /// Nominal frame rate
    pub frame_rate: u32,
    /// Seconds between key frames
    pub i_frame_interval: u32,
    /// Bounded wait per output poll, in milliseconds
    pub drain_timeout_ms: u64,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            mime_type: constants::video::MIME_TYPE.to_string(),
            bit_rate: constants::video::BIT_RATE,
            frame_rate: constants::video::FRAME_RATE,
            i_frame_interval: constants::video::I_FRAME_INTERVAL,
            drain_timeout_ms: constants::video::DRAIN_TIMEOUT.as_millis() as u64,
        }
    }
}

impl EncoderSettings {
    /// Poll timeout as a Duration
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capture and encode width
    pub width: u32,
    /// Capture and encode height
    pub height: u32,
    /// Pixel format delivered to the snapshot reader
    pub pixel_format: PixelFormat,
    /// Encoder parameters
    pub encoder: EncoderSettings,
    /// JPEG quality of snapshots (1-100)
    pub jpeg_quality: u8,
    /// Trailing window of the FPS estimator, in milliseconds
    pub fps_window_ms: u64,
    /// Directory receiving recordings
    pub recordings_dir: PathBuf,
    /// Directory receiving the snapshot
    pub pictures_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            width: constants::DEFAULT_WIDTH,
            height: constants::DEFAULT_HEIGHT,
            pixel_format: PixelFormat::default(),
            encoder: EncoderSettings::default(),
            jpeg_quality: constants::photo::JPEG_QUALITY,
            fps_window_ms: constants::fps::WINDOW.as_millis() as u64,
            recordings_dir: crate::storage::default_recordings_dir(),
            pictures_dir: crate::storage::default_pictures_dir(),
        }
    }
}

impl Config {
    /// Load settings from a JSON file
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Settings(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_json(&text)?;
        info!(path = %path.display(), "Loaded pipeline settings");
        Ok(config)
    }

    /// Parse settings from JSON text
    pub fn from_json(text: &str) -> PipelineResult<Self> {
        let config: Config =
            serde_json::from_str(text).map_err(|e| PipelineError::Settings(e.to_string()))?;
        config.validate()?;
        debug!(?config, "Parsed pipeline settings");
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> PipelineResult<()> {
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(PipelineError::Settings(format!(
                "frame size {}x{} must be even and non-zero",
                self.width, self.height
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(PipelineError::Settings(format!(
                "jpeg quality {} outside 1-100",
                self.jpeg_quality
            )));
        }
        if self.fps_window_ms == 0 {
            return Err(PipelineError::Settings("fps window must be non-zero".into()));
        }
        Ok(())
    }

    /// FPS window as a Duration
    pub fn fps_window(&self) -> Duration {
        Duration::from_millis(self.fps_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.jpeg_quality, 80);
        assert_eq!(config.encoder.mime_type, "video/avc");
        assert_eq!(config.encoder.drain_timeout(), Duration::from_millis(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = Config::from_json(r#"{ "width": 640, "height": 480 }"#).unwrap();
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.encoder.bit_rate, 3_000_000);
        assert_eq!(config.fps_window_ms, 3000);
    }

    #[test]
    fn test_odd_size_rejected() {
        let err = Config::from_json(r#"{ "width": 641 }"#).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Settings);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{ "jpeg_quality": 95 }"#).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.jpeg_quality, 95);

        assert!(Config::load(&dir.path().join("missing.json")).is_err());
    }
}
