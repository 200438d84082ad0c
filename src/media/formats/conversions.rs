// SPDX-License-Identifier: GPL-3.0-only

//! Pixel format conversion utilities
//!
//! Camera readers deliver planar 4:2:0 frames whose planes each carry their
//! own row and pixel stride. Still compression wants a packed layout, so the
//! frame is repacked to NV21 (full luma plane, then interleaved V/U pairs)
//! and from there expanded to RGB.

use crate::backends::camera::types::{FrameBuffer, Plane, PixelFormat};
use crate::errors::FormatError;
use image::RgbImage;

/// Size in bytes of an NV21 buffer for the given dimensions
pub fn nv21_len(width: u32, height: u32) -> usize {
    let pixels = width as usize * height as usize;
    pixels + pixels / 2
}

fn check_dimensions(width: u32, height: u32) -> Result<(), FormatError> {
    if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
        return Err(FormatError::Dimensions { width, height });
    }
    Ok(())
}

fn check_plane(index: usize, plane: &Plane, cols: usize, rows: usize) -> Result<(), FormatError> {
    let needed = plane.required_len(cols, rows);
    if plane.data.len() < needed {
        return Err(FormatError::PlaneTooShort {
            plane: index,
            needed,
            actual: plane.data.len(),
        });
    }
    Ok(())
}

/// Repack a planar YUV 4:2:0 frame into NV21
///
/// Output is `width * height * 3 / 2` bytes: every luma sample row by row,
/// then one (V, U) pair per 2x2 block. Strides are honoured per plane; the
/// two chroma planes must share theirs.
pub fn yuv420_to_nv21(frame: &FrameBuffer) -> Result<Vec<u8>, FormatError> {
    if !frame.format.is_planar_yuv420() {
        return Err(FormatError::Unsupported(frame.format));
    }
    if frame.planes.len() != frame.format.plane_count() {
        return Err(FormatError::PlaneCount(frame.planes.len()));
    }
    check_dimensions(frame.width, frame.height)?;

    let (y, u, v) = (&frame.planes[0], &frame.planes[1], &frame.planes[2]);
    if u.row_stride != v.row_stride || u.pixel_stride != v.pixel_stride {
        return Err(FormatError::MismatchedChromaStrides);
    }

    let width = frame.width as usize;
    let height = frame.height as usize;
    let (chroma_w, chroma_h) = (width / 2, height / 2);

    check_plane(0, y, width, height)?;
    check_plane(1, u, chroma_w, chroma_h)?;
    check_plane(2, v, chroma_w, chroma_h)?;

    let mut out = Vec::with_capacity(nv21_len(frame.width, frame.height));

    for row in 0..height {
        let start = row * y.row_stride;
        if y.pixel_stride == 1 {
            out.extend_from_slice(&y.data[start..start + width]);
        } else {
            out.extend((0..width).map(|col| y.data[start + col * y.pixel_stride]));
        }
    }

    for row in 0..chroma_h {
        let start = row * u.row_stride;
        for col in 0..chroma_w {
            let offset = start + col * u.pixel_stride;
            out.push(v.data[offset]);
            out.push(u.data[offset]);
        }
    }

    Ok(out)
}

/// Expand NV21 to RGB using BT.601 coefficients
pub fn nv21_to_rgb(data: &[u8], width: u32, height: u32) -> Result<RgbImage, FormatError> {
    check_dimensions(width, height)?;
    let needed = nv21_len(width, height);
    if data.len() < needed {
        return Err(FormatError::PlaneTooShort {
            plane: 0,
            needed,
            actual: data.len(),
        });
    }

    let w = width as usize;
    let h = height as usize;
    let (y_plane, vu_plane) = data.split_at(w * h);
    let mut rgb = vec![0u8; w * h * 3];

    for row in 0..h {
        let vu_row = (row / 2) * w;
        for col in 0..w {
            let vu = vu_row + (col / 2) * 2;
            let v = vu_plane[vu] as f32 - 128.0;
            let u = vu_plane[vu + 1] as f32 - 128.0;
            let y = y_plane[row * w + col] as f32;

            let idx = (row * w + col) * 3;
            rgb[idx] = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
            rgb[idx + 1] = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
            rgb[idx + 2] = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
        }
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FormatError::Dimensions { width, height })
}

/// Planar frame straight to RGB
pub fn yuv420_to_rgb(frame: &FrameBuffer) -> Result<RgbImage, FormatError> {
    let nv21 = yuv420_to_nv21(frame)?;
    nv21_to_rgb(&nv21, frame.width, frame.height)
}

/// Build a planar frame from tightly packed I420 bytes
///
/// Used by synthetic sources.
pub fn i420_frame(width: u32, height: u32, data: &[u8]) -> Result<FrameBuffer, FormatError> {
    check_dimensions(width, height)?;
    let w = width as usize;
    let h = height as usize;
    let luma = w * h;
    let chroma = luma / 4;
    if data.len() < luma + 2 * chroma {
        return Err(FormatError::PlaneTooShort {
            plane: 0,
            needed: luma + 2 * chroma,
            actual: data.len(),
        });
    }

    let planes = vec![
        Plane::new(&data[..luma], w, 1),
        Plane::new(&data[luma..luma + chroma], w / 2, 1),
        Plane::new(&data[luma + chroma..luma + 2 * chroma], w / 2, 1),
    ];
    Ok(FrameBuffer::new(
        width,
        height,
        PixelFormat::Yuv420Flexible,
        planes,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 4x4 frame whose planes are padded to a row stride of 8
    fn padded_frame() -> FrameBuffer {
        let mut y = vec![0xEEu8; 8 * 4];
        for row in 0..4 {
            for col in 0..4 {
                y[row * 8 + col] = (row * 4 + col) as u8;
            }
        }
        let mut u = vec![0xEEu8; 8 * 2];
        let mut v = vec![0xEEu8; 8 * 2];
        for row in 0..2 {
            for col in 0..2 {
                u[row * 8 + col] = 100 + (row * 2 + col) as u8;
                v[row * 8 + col] = 200 + (row * 2 + col) as u8;
            }
        }
        FrameBuffer::new(
            4,
            4,
            PixelFormat::Yuv420Flexible,
            vec![Plane::new(y, 8, 1), Plane::new(u, 8, 1), Plane::new(v, 8, 1)],
        )
    }

    #[test]
    fn test_padded_planes_to_nv21() {
        let out = yuv420_to_nv21(&padded_frame()).unwrap();
        assert_eq!(out.len(), 24);
        let luma: Vec<u8> = (0..16).collect();
        assert_eq!(&out[..16], luma.as_slice(), "padding must be skipped");
        assert_eq!(&out[16..], &[200, 100, 201, 101, 202, 102, 203, 103]);
    }

    #[test]
    fn test_interleaved_chroma_strides() {
        // Chroma samples every other byte, as semi-planar producers expose them
        let y = vec![50u8; 4 * 2];
        let u = vec![10, 0, 11, 0];
        let v = vec![20, 0, 21, 0];
        let frame = FrameBuffer::new(
            4,
            2,
            PixelFormat::Yuv420Flexible,
            vec![Plane::new(y, 4, 1), Plane::new(u, 4, 2), Plane::new(v, 4, 2)],
        );
        let out = yuv420_to_nv21(&frame).unwrap();
        assert_eq!(&out[8..], &[20, 10, 21, 11]);
    }

    #[test]
    fn test_rejects_non_planar() {
        let frame = FrameBuffer::new(4, 4, PixelFormat::Nv21, vec![]);
        assert_eq!(
            yuv420_to_nv21(&frame),
            Err(FormatError::Unsupported(PixelFormat::Nv21))
        );
    }

    #[test]
    fn test_rejects_missing_plane() {
        let mut frame = padded_frame();
        frame.planes.pop();
        assert_eq!(yuv420_to_nv21(&frame), Err(FormatError::PlaneCount(2)));
    }

    #[test]
    fn test_rejects_short_plane() {
        let mut frame = padded_frame();
        frame.planes[2] = Plane::new(vec![0u8; 4], 8, 1);
        assert!(matches!(
            yuv420_to_nv21(&frame),
            Err(FormatError::PlaneTooShort { plane: 2, .. })
        ));
    }

    #[test]
    fn test_rejects_mismatched_chroma() {
        let mut frame = padded_frame();
        frame.planes[1] = Plane::new(vec![0u8; 16], 4, 2);
        assert_eq!(
            yuv420_to_nv21(&frame),
            Err(FormatError::MismatchedChromaStrides)
        );
    }

    #[test]
    fn test_rejects_odd_dimensions() {
        let frame = FrameBuffer::new(3, 4, PixelFormat::Yuv420Flexible, padded_frame().planes.clone());
        assert_eq!(
            yuv420_to_nv21(&frame),
            Err(FormatError::Dimensions { width: 3, height: 4 })
        );
    }

    #[test]
    fn test_neutral_chroma_is_gray() {
        let data = [vec![128u8; 16], vec![128u8; 8]].concat();
        let rgb = nv21_to_rgb(&data, 4, 4).unwrap();
        assert_eq!(rgb.dimensions(), (4, 4));
        assert!(rgb.pixels().all(|p| p.0 == [128, 128, 128]));
    }

    #[test]
    fn test_i420_frame_round_trip_to_nv21() {
        let mut data = vec![1u8; 16];
        data.extend_from_slice(&[2, 3, 4, 5]); // U
        data.extend_from_slice(&[6, 7, 8, 9]); // V
        let frame = i420_frame(4, 4, &data).unwrap();
        let out = yuv420_to_nv21(&frame).unwrap();
        assert_eq!(&out[16..], &[6, 2, 7, 3, 8, 4, 9, 5]);
    }
}
