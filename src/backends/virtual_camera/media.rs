// SPDX-License-Identifier: GPL-3.0-only

//! Scripted encoder and recording muxer
//!
//! Every call made on encoders and muxers created by a
//! [`VirtualMediaBackend`] is appended to one shared log, in order.

use crate::backends::camera::types::{Surface, SurfaceKind};
use crate::errors::{EncoderError, EncoderResult};
use crate::media::encoders::{
    BufferInfo, EncoderConfig, MediaBackend, Muxer, OutputBuffer, OutputStatus, TrackFormat,
    VideoEncoder,
};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// One recorded encoder or muxer call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaCall {
    CreateEncoder(String),
    Configure(EncoderConfig),
    CreateInputSurface(u64),
    EncoderStart,
    SignalEndOfInput,
    ReleaseOutputBuffer(usize),
    EncoderStop,
    EncoderRelease,
    ReleaseInputSurface(u64),
    CreateMuxer(PathBuf),
    AddTrack(TrackFormat),
    MuxerStart,
    WriteSample { track: usize, pts_us: i64, size: usize },
    MuxerStop,
}

/// Behaviour of encoders created by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderScript {
    pub fail_create: bool,
    pub fail_configure: bool,
    pub fail_start: bool,
    /// Report an output format before the first buffer
    pub format_changed: bool,
    /// Emit one codec-config buffer before media samples
    pub codec_config: bool,
    /// Time between two encoded samples
    pub frame_interval: Duration,
    /// Emit end-of-stream after end-of-input
    pub end_of_stream: bool,
}

impl Default for EncoderScript {
    fn default() -> Self {
        Self {
            fail_create: false,
            fail_configure: false,
            fail_start: false,
            format_changed: true,
            codec_config: true,
            frame_interval: Duration::from_millis(2),
            end_of_stream: true,
        }
    }
}

/// Behaviour of muxers created by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MuxerScript {
    pub fail_create: bool,
    pub fail_stop: bool,
}

#[derive(Debug, Default)]
struct Shared {
    calls: Vec<MediaCall>,
    encoder: EncoderScript,
    muxer: MuxerScript,
}

type SharedLog = Arc<Mutex<Shared>>;

fn lock(shared: &SharedLog) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn record(shared: &SharedLog, call: MediaCall) {
    lock(shared).calls.push(call);
}

/// Media backend producing scripted encoders and file-writing muxers
#[derive(Debug, Clone, Default)]
pub struct VirtualMediaBackend {
    shared: SharedLog,
}

impl VirtualMediaBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_encoder_script(&self, script: EncoderScript) {
        lock(&self.shared).encoder = script;
    }

    pub fn set_muxer_script(&self, script: MuxerScript) {
        lock(&self.shared).muxer = script;
    }

    /// All calls so far, in order
    pub fn calls(&self) -> Vec<MediaCall> {
        lock(&self.shared).calls.clone()
    }

    /// Number of logged calls matching `pred`
    pub fn count(&self, pred: impl Fn(&MediaCall) -> bool) -> usize {
        lock(&self.shared).calls.iter().filter(|c| pred(c)).count()
    }

    pub fn clear_calls(&self) {
        lock(&self.shared).calls.clear();
    }
}

impl MediaBackend for VirtualMediaBackend {
    fn create_encoder(&self, mime_type: &str) -> EncoderResult<Box<dyn VideoEncoder>> {
        record(&self.shared, MediaCall::CreateEncoder(mime_type.to_string()));
        let script = lock(&self.shared).encoder.clone();
        if script.fail_create {
            return Err(EncoderError::CreateFailed(format!(
                "no virtual encoder for {}",
                mime_type
            )));
        }
        Ok(Box::new(VirtualEncoder {
            shared: Arc::clone(&self.shared),
            script,
            config: None,
            phase: Phase::Idle,
            next_index: 0,
        }))
    }

    fn create_muxer(&self, output: &Path) -> EncoderResult<Box<dyn Muxer>> {
        record(&self.shared, MediaCall::CreateMuxer(output.to_path_buf()));
        let script = lock(&self.shared).muxer;
        if script.fail_create {
            return Err(EncoderError::Muxer(format!(
                "cannot create {}",
                output.display()
            )));
        }
        let file = File::create(output)
            .map_err(|e| EncoderError::Muxer(format!("{}: {}", output.display(), e)))?;
        Ok(Box::new(VirtualMuxer {
            shared: Arc::clone(&self.shared),
            script,
            file,
            tracks: 0,
            started: false,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Configured,
    Started {
        format_reported: bool,
        config_sent: bool,
    },
    EndOfInput,
    Finished,
    Stopped,
}

/// Encoder emitting small numbered samples at a fixed interval
#[derive(Debug)]
pub struct VirtualEncoder {
    shared: SharedLog,
    script: EncoderScript,
    config: Option<EncoderConfig>,
    phase: Phase,
    next_index: usize,
}

impl VirtualEncoder {
    fn buffer(&mut self, data: Vec<u8>, flags: u32) -> OutputStatus {
        let index = self.next_index;
        self.next_index += 1;
        OutputStatus::Buffer(OutputBuffer {
            index,
            info: BufferInfo {
                offset: 0,
                size: data.len(),
                presentation_time_us: 0,
                flags,
            },
            data,
        })
    }
}

impl VideoEncoder for VirtualEncoder {
    fn configure(&mut self, config: &EncoderConfig) -> EncoderResult<()> {
        record(&self.shared, MediaCall::Configure(config.clone()));
        if self.script.fail_configure {
            return Err(EncoderError::ConfigureFailed(format!(
                "{}x{} not supported",
                config.width, config.height
            )));
        }
        self.config = Some(config.clone());
        self.phase = Phase::Configured;
        Ok(())
    }

    fn create_input_surface(&mut self) -> EncoderResult<Surface> {
        if self.phase != Phase::Configured {
            return Err(EncoderError::StartFailed("encoder not configured".into()));
        }
        let surface = Surface::new(SurfaceKind::EncoderInput);
        record(&self.shared, MediaCall::CreateInputSurface(surface.id()));
        Ok(surface)
    }

    fn start(&mut self) -> EncoderResult<()> {
        record(&self.shared, MediaCall::EncoderStart);
        if self.script.fail_start {
            return Err(EncoderError::StartFailed("virtual encoder refused".into()));
        }
        self.phase = Phase::Started {
            format_reported: !self.script.format_changed,
            config_sent: !self.script.codec_config,
        };
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> EncoderResult<OutputStatus> {
        match self.phase {
            Phase::Started {
                format_reported: false,
                config_sent,
            } => {
                self.phase = Phase::Started {
                    format_reported: true,
                    config_sent,
                };
                Ok(OutputStatus::FormatChanged)
            }
            Phase::Started {
                format_reported: true,
                config_sent: false,
            } => {
                self.phase = Phase::Started {
                    format_reported: true,
                    config_sent: true,
                };
                Ok(self.buffer(vec![0, 0, 0, 1, 0x67], BufferInfo::FLAG_CODEC_CONFIG))
            }
            Phase::Started { .. } => {
                if self.script.frame_interval > timeout {
                    std::thread::sleep(timeout);
                    return Ok(OutputStatus::TryAgainLater);
                }
                std::thread::sleep(self.script.frame_interval);
                let n = self.next_index;
                let flags = if n % 30 == 1 {
                    BufferInfo::FLAG_KEY_FRAME
                } else {
                    0
                };
                Ok(self.buffer(vec![(n % 256) as u8; 16], flags))
            }
            Phase::EndOfInput if self.script.end_of_stream => {
                self.phase = Phase::Finished;
                Ok(self.buffer(Vec::new(), BufferInfo::FLAG_END_OF_STREAM))
            }
            Phase::EndOfInput | Phase::Finished => {
                std::thread::sleep(timeout);
                Ok(OutputStatus::TryAgainLater)
            }
            Phase::Idle | Phase::Configured | Phase::Stopped => {
                Err(EncoderError::Codec("encoder not started".into()))
            }
        }
    }

    fn output_format(&self) -> EncoderResult<TrackFormat> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| EncoderError::Codec("no output format yet".into()))?;
        Ok(TrackFormat {
            mime_type: config.mime_type.clone(),
            width: config.width,
            height: config.height,
            codec_specific_data: vec![0, 0, 0, 1, 0x67],
        })
    }

    fn release_output_buffer(&mut self, index: usize, _render: bool) -> EncoderResult<()> {
        record(&self.shared, MediaCall::ReleaseOutputBuffer(index));
        Ok(())
    }

    fn signal_end_of_input(&mut self) -> EncoderResult<()> {
        record(&self.shared, MediaCall::SignalEndOfInput);
        if matches!(self.phase, Phase::Started { .. }) {
            self.phase = Phase::EndOfInput;
        }
        Ok(())
    }

    fn stop(&mut self) -> EncoderResult<()> {
        record(&self.shared, MediaCall::EncoderStop);
        self.phase = Phase::Stopped;
        Ok(())
    }

    fn release(&mut self) {
        record(&self.shared, MediaCall::EncoderRelease);
        self.phase = Phase::Stopped;
    }

    fn release_input_surface(&mut self, surface: Surface) {
        record(&self.shared, MediaCall::ReleaseInputSurface(surface.id()));
    }
}

/// Muxer appending raw sample payloads to its output file
#[derive(Debug)]
pub struct VirtualMuxer {
    shared: SharedLog,
    script: MuxerScript,
    file: File,
    tracks: usize,
    started: bool,
}

impl Muxer for VirtualMuxer {
    fn add_track(&mut self, format: &TrackFormat) -> EncoderResult<usize> {
        record(&self.shared, MediaCall::AddTrack(format.clone()));
        if self.started {
            return Err(EncoderError::Muxer("muxer already started".into()));
        }
        self.tracks += 1;
        Ok(self.tracks - 1)
    }

    fn start(&mut self) -> EncoderResult<()> {
        record(&self.shared, MediaCall::MuxerStart);
        if self.tracks == 0 {
            return Err(EncoderError::Muxer("no tracks".into()));
        }
        self.started = true;
        Ok(())
    }

    fn write_sample(
        &mut self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> EncoderResult<()> {
        record(
            &self.shared,
            MediaCall::WriteSample {
                track,
                pts_us: info.presentation_time_us,
                size: data.len(),
            },
        );
        if !self.started {
            return Err(EncoderError::Muxer("muxer not started".into()));
        }
        self.file
            .write_all(data)
            .map_err(|e| EncoderError::Muxer(e.to_string()))
    }

    fn stop(&mut self) -> EncoderResult<()> {
        record(&self.shared, MediaCall::MuxerStop);
        if self.script.fail_stop {
            return Err(EncoderError::Muxer("virtual muxer stop failed".into()));
        }
        self.file
            .flush()
            .map_err(|e| EncoderError::Muxer(e.to_string()))?;
        debug!(tracks = self.tracks, "Virtual muxer finalized");
        Ok(())
    }
}
