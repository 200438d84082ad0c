// SPDX-License-Identifier: GPL-3.0-only

//! Snapshot JPEG encoding

use crate::backends::camera::types::FrameBuffer;
use crate::constants;
use crate::errors::PhotoError;
use crate::media::formats::{nv21_to_rgb, yuv420_to_nv21};
use image::RgbImage;
use tracing::debug;

/// Encoded image data ready for saving
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// JPEG encoder for reader frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhotoEncoder {
    quality: u8,
}

impl Default for PhotoEncoder {
    fn default() -> Self {
        Self::new(constants::photo::JPEG_QUALITY)
    }
}

impl PhotoEncoder {
    /// Quality is clamped to 1-100
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Planar frame → NV21 → RGB → JPEG
    pub fn encode_frame(&self, frame: &FrameBuffer) -> Result<EncodedImage, PhotoError> {
        let nv21 = yuv420_to_nv21(frame)?;
        let rgb = nv21_to_rgb(&nv21, frame.width, frame.height)?;
        let data = self.encode_jpeg(&rgb)?;
        debug!(
            width = frame.width,
            height = frame.height,
            size = data.len(),
            "Snapshot encoded"
        );
        Ok(EncodedImage {
            data,
            width: frame.width,
            height: frame.height,
        })
    }

    /// Encode an RGB image as JPEG
    pub fn encode_jpeg(&self, image: &RgbImage) -> Result<Vec<u8>, PhotoError> {
        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);

        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, self.quality);

        encoder
            .encode(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| PhotoError::EncodingFailed(format!("JPEG encoding failed: {}", e)))?;

        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::PixelFormat;
    use crate::media::formats::conversions::i420_frame;

    #[test]
    fn test_default_quality() {
        assert_eq!(PhotoEncoder::default().quality(), 80);
        assert_eq!(PhotoEncoder::new(0).quality(), 1);
        assert_eq!(PhotoEncoder::new(200).quality(), 100);
    }

    #[test]
    fn test_encode_frame_produces_jpeg() {
        let data = vec![128u8; 16 * 16 * 3 / 2];
        let frame = i420_frame(16, 16, &data).unwrap();
        let encoded = PhotoEncoder::default().encode_frame(&frame).unwrap();
        assert_eq!(&encoded.data[..2], &[0xFF, 0xD8], "JPEG SOI marker");
        assert_eq!((encoded.width, encoded.height), (16, 16));

        let decoded = image::load_from_memory(&encoded.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
    }

    #[test]
    fn test_encode_rejects_rgba_frame() {
        let frame = FrameBuffer::new(4, 4, PixelFormat::Rgba, vec![]);
        assert!(matches!(
            PhotoEncoder::default().encode_frame(&frame),
            Err(PhotoError::Conversion(_))
        ));
    }
}
