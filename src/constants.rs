// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants and defaults

use std::time::Duration;

/// Default capture width
pub const DEFAULT_WIDTH: u32 = 1280;

/// Default capture height
pub const DEFAULT_HEIGHT: u32 = 720;

/// Images the snapshot reader may hold at once
pub const READER_MAX_IMAGES: usize = 2;

/// How long `start()` waits for the device to report an open outcome
pub const DEVICE_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Video encoder settings
pub mod video {
    use std::time::Duration;

    /// AVC elementary stream
    pub const MIME_TYPE: &str = "video/avc";

    /// Nominal encoder frame rate
    pub const FRAME_RATE: u32 = 30;

    /// Seconds between key frames
    pub const I_FRAME_INTERVAL: u32 = 10;

    /// Default bit rate in bits per second
    pub const BIT_RATE: u32 = 3_000_000;

    /// Bounded wait for each encoder output poll
    pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(30);

    /// Consecutive empty polls tolerated after end-of-input before giving up
    pub const MAX_DRAIN_POLLS: u32 = 100;

    /// Recording subdirectory inside the videos directory
    pub const RECORDINGS_DIR_NAME: &str = "CameraRecorder";

    /// Container extension
    pub const FILE_EXTENSION: &str = "mp4";

    /// `chrono` format of recording file stems (yyyy-MM-dd-HH-mm-ss)
    pub const FILE_STEM_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";
}

/// Snapshot settings
pub mod photo {
    /// JPEG quality of snapshots
    pub const JPEG_QUALITY: u8 = 80;

    /// Fixed snapshot file name
    pub const SNAPSHOT_FILE_NAME: &str = "picture.jpg";
}

/// Frame-rate estimator settings
pub mod fps {
    use std::time::Duration;

    /// Trailing window of the arrival counter
    pub const WINDOW: Duration = Duration::from_millis(3000);
}
