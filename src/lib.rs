// SPDX-License-Identifier: GPL-3.0-only

//! Camera capture, recording and snapshot pipeline
//!
//! The crate coordinates one rear camera, an optional preview surface, a
//! hardware video encoder with a container muxer, and a snapshot consumer.
//!
//! # Architecture
//!
//! - [`backends`]: Hardware seams, the capture session controller and a
//!   virtual backend
//! - [`media`]: Encoder/muxer traits and pixel format conversion
//! - [`pipelines`]: Snapshot and video pipelines, and the [`CapturePipeline`]
//!   facade
//! - [`config`]: Serde settings
//! - [`storage`]: Output paths and the image sink
//!
//! # Example
//!
//! ```no_run
//! use camera_pipeline::backends::virtual_camera::{VirtualCameraSource, VirtualMediaBackend};
//! use camera_pipeline::storage::FileImageSink;
//! use camera_pipeline::{CapturePipeline, Config};
//! use std::sync::Arc;
//!
//! camera_pipeline::logging::init();
//! let mut pipeline = CapturePipeline::new(
//!     Arc::new(VirtualCameraSource::default()),
//!     Arc::new(VirtualMediaBackend::new()),
//!     Config::default(),
//! )?;
//! pipeline.enable_snapshots(Arc::new(FileImageSink))?;
//! pipeline.start_recording()?;
//! pipeline.take_snapshot()?;
//! if let Some(done) = pipeline.stop() {
//!     let report = done.wait()?;
//!     println!("wrote {:?}", report.output);
//! }
//! # Ok::<(), camera_pipeline::PipelineError>(())
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod logging;
pub mod media;
pub mod pipelines;
pub mod storage;

// Re-export commonly used types
pub use backends::camera::{CaptureSessionController, ControllerEvent, FpsCounter, FpsMonitor};
pub use config::Config;
pub use errors::{ErrorKind, PipelineError, PipelineResult};
pub use pipelines::CapturePipeline;
pub use pipelines::video::{EncodeReport, RecorderEvent, VideoRecorder};
