// SPDX-License-Identifier: GPL-3.0-only

//! Processing pipelines for snapshots and video
//!
//! # Pipeline Architecture
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ Reader Frame │ ──▶ │  Photo Pipeline   │ ──▶ │ picture.jpg  │
//! │ (YUV 4:2:0)  │     │  - YUV→NV21→RGB   │     │              │
//! │              │     │  - JPEG q80       │     │              │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//!
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ Encoder      │ ──▶ │  Video Pipeline   │ ──▶ │   MP4 File   │
//! │ input surface│     │  - drain worker   │     │ (recording)  │
//! │              │     │  - muxer          │     │              │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`capture`]: Facade wiring camera, encoder and snapshots
//! - [`photo`]: Snapshot consumer and JPEG encoding
//! - [`video`]: Encode worker and recorder

pub mod capture;
pub mod photo;
pub mod video;

pub use capture::CapturePipeline;
