// SPDX-License-Identifier: GPL-3.0-only

//! Video encoding pipeline
//!
//! The camera renders into the encoder's input surface; an encode worker
//! drains the codec on its own thread and, when recording, appends samples
//! to a single-track container.

pub mod recorder;
pub mod timestamp;
pub mod worker;

pub use recorder::VideoRecorder;
pub use timestamp::{ClockSource, MonotonicClock, PtsGenerator};
pub use worker::{EncodeReport, EncodeWorker, RecorderEvent, WorkerCompletion, WorkerSettings};
