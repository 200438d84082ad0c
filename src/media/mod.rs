// SPDX-License-Identifier: GPL-3.0-only

//! Media processing utilities for encoding and color conversion
//!
//! # Color Space Conversion
//!
//! Reader frames arrive as planar YUV 4:2:0 with arbitrary strides. The
//! [`formats`] module repacks them to NV21 and expands NV21 to RGB for still
//! compression.
//!
//! # Video Encoding
//!
//! The [`encoders`] module defines the hardware encoder and container muxer
//! seams driven by the video pipeline, plus the encoder parameters.

pub mod encoders;
pub mod formats;

pub use encoders::{EncoderConfig, MediaBackend, Muxer, VideoEncoder};
pub use formats::{yuv420_to_nv21, yuv420_to_rgb};
