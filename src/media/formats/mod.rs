// SPDX-License-Identifier: GPL-3.0-only

//! Pixel format utilities

pub mod conversions;

pub use conversions::{nv21_len, nv21_to_rgb, yuv420_to_nv21, yuv420_to_rgb};
