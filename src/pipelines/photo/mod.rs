// SPDX-License-Identifier: GPL-3.0-only

//! Snapshot pipeline
//!
//! ```text
//! reader frame → NV21 → RGB → JPEG (q80) → ImageSink → <pictures>/picture.jpg
//! ```
//!
//! A snapshot request marks the consumer pending; exactly the next frame it
//! receives is converted and persisted, synchronously on the camera callback
//! thread. Frames arriving with no request pending are released untouched.
//! Every outcome is published on the result channel.

pub mod encoding;

pub use encoding::{EncodedImage, PhotoEncoder};

use crate::backends::camera::FrameConsumer;
use crate::backends::camera::types::FrameBuffer;
use crate::errors::PhotoError;
use crate::storage::{self, ImageSink};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{error, info};

/// Outcome of one snapshot
pub type SnapshotResult = Result<PathBuf, PhotoError>;

/// Frame consumer that serves snapshot requests
pub struct SnapshotConsumer {
    pending: AtomicBool,
    encoder: PhotoEncoder,
    sink: Arc<dyn ImageSink>,
    output: PathBuf,
    results: Mutex<Vec<UnboundedSender<SnapshotResult>>>,
}

impl SnapshotConsumer {
    /// Snapshots go to `<pictures_dir>/picture.jpg`
    pub fn new(sink: Arc<dyn ImageSink>, pictures_dir: PathBuf, jpeg_quality: u8) -> Self {
        Self {
            pending: AtomicBool::new(false),
            encoder: PhotoEncoder::new(jpeg_quality),
            sink,
            output: storage::snapshot_path(&pictures_dir),
            results: Mutex::new(Vec::new()),
        }
    }

    /// Receive snapshot outcomes
    pub fn subscribe(&self) -> UnboundedReceiver<SnapshotResult> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Serve the next frame as a snapshot
    pub fn request(&self) {
        info!(path = %self.output.display(), "Snapshot requested");
        self.pending.store(true, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Path every snapshot is written to
    pub fn output_path(&self) -> &PathBuf {
        &self.output
    }

    fn take_snapshot(&self, frame: &FrameBuffer) -> SnapshotResult {
        let encoded = self.encoder.encode_frame(frame)?;
        self.sink.persist(&encoded.data, &self.output)?;
        Ok(self.output.clone())
    }

    fn publish(&self, result: SnapshotResult) {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(result.clone()).is_ok());
    }
}

impl FrameConsumer for SnapshotConsumer {
    fn on_frame(&self, frame: FrameBuffer) {
        if !self.pending.swap(false, Ordering::AcqRel) {
            return;
        }

        let result = self.take_snapshot(&frame);
        drop(frame);

        match &result {
            Ok(path) => info!(path = %path.display(), "Snapshot saved"),
            Err(e) => error!(error = %e, "Snapshot failed"),
        }
        self.publish(result);
    }
}

impl std::fmt::Debug for SnapshotConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotConsumer")
            .field("pending", &self.is_pending())
            .field("quality", &self.encoder.quality())
            .field("output", &self.output)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::formats::conversions::i420_frame;
    use crate::storage::FileImageSink;
    use std::io;
    use std::path::Path;

    struct FailingSink;

    impl ImageSink for FailingSink {
        fn persist(&self, _data: &[u8], _path: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        }
    }

    fn gray_frame() -> FrameBuffer {
        i420_frame(8, 8, &[128u8; 96]).unwrap()
    }

    #[test]
    fn test_frame_without_request_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let consumer =
            SnapshotConsumer::new(Arc::new(FileImageSink), dir.path().to_path_buf(), 80);
        let mut results = consumer.subscribe();

        consumer.on_frame(gray_frame());

        assert!(!consumer.output_path().exists());
        assert!(results.try_recv().is_err());
    }

    #[test]
    fn test_request_served_by_next_frame_only() {
        let dir = tempfile::tempdir().unwrap();
        let consumer =
            SnapshotConsumer::new(Arc::new(FileImageSink), dir.path().to_path_buf(), 80);
        let mut results = consumer.subscribe();

        consumer.request();
        assert!(consumer.is_pending());
        consumer.on_frame(gray_frame());
        assert!(!consumer.is_pending());

        let saved = results.try_recv().unwrap().unwrap();
        assert_eq!(saved, dir.path().join("picture.jpg"));
        assert!(saved.is_file());

        consumer.on_frame(gray_frame());
        assert!(results.try_recv().is_err(), "second frame must not be saved");
    }

    #[test]
    fn test_write_failure_is_reported() {
        let consumer = SnapshotConsumer::new(Arc::new(FailingSink), PathBuf::from("/nowhere"), 80);
        let mut results = consumer.subscribe();

        consumer.request();
        consumer.on_frame(gray_frame());

        assert!(matches!(
            results.try_recv().unwrap(),
            Err(PhotoError::WriteFailed(_))
        ));
        assert!(!consumer.is_pending());
    }
}
