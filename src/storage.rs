// SPDX-License-Identifier: GPL-3.0-only

//! Storage utilities for recordings and snapshots

use crate::constants;
use chrono::{DateTime, Local};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Destination for compressed still images
pub trait ImageSink: Send + Sync {
    /// Persist `data` at `path`
    fn persist(&self, data: &[u8], path: &Path) -> io::Result<()>;
}

/// Writes images to the filesystem, creating parent directories on demand
#[derive(Debug, Default, Clone, Copy)]
pub struct FileImageSink;

impl ImageSink for FileImageSink {
    fn persist(&self, data: &[u8], path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, data)?;
        debug!(path = %path.display(), bytes = data.len(), "Image written");
        Ok(())
    }
}

/// `<videos>/CameraRecorder`, or `./CameraRecorder` without a videos directory
pub fn default_recordings_dir() -> PathBuf {
    dirs::video_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(constants::video::RECORDINGS_DIR_NAME)
}

/// The user's pictures directory, or the current directory
pub fn default_pictures_dir() -> PathBuf {
    dirs::picture_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// `<dir>/<yyyy-MM-dd-HH-mm-ss>.mp4`
pub fn recording_path(dir: &Path, now: DateTime<Local>) -> PathBuf {
    let stem = now.format(constants::video::FILE_STEM_FORMAT);
    dir.join(format!("{}.{}", stem, constants::video::FILE_EXTENSION))
}

/// First of `path`, `<stem>-1.<ext>`, `<stem>-2.<ext>`, ... not on disk
pub fn unused_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let free = (1u32..)
        .map(|n| path.with_file_name(format!("{}-{}{}", stem, n, extension)))
        .find(|candidate| !candidate.exists());
    free.unwrap_or(path)
}

/// Create the recordings directory and return an output path no existing
/// recording occupies
///
/// Recordings started within the same second get `-1`, `-2`, ... suffixes.
pub fn new_recording_path(dir: &Path) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = unused_path(recording_path(dir, Local::now()));
    debug!(path = %path.display(), "Recording path");
    Ok(path)
}

/// `<dir>/picture.jpg`
pub fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join(constants::photo::SNAPSHOT_FILE_NAME)
}
