//! Deterministic in-memory backend.
//!
//! Sources are synthetic clip descriptions, codecs transform buffers with
//! a configurable output latency, and the muxer records every sample it
//! accepts while enforcing the container protocol. Used for dry runs and
//! as the test double of the GStreamer backend.

mod codec;
mod muxer;
mod source;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use glcv_common::error::{GlcvError, GlcvResult};

use crate::backend::CodecBackend;
use crate::buffer::FrameSlot;
use crate::codec::MediaCodec;
use crate::extractor::MediaExtractor;
use crate::format::{MediaFormat, TrackKind};
use crate::muxer::MediaMuxer;

pub use codec::SoftwareCodec;
pub use muxer::{MemoryMuxer, MuxedSample, MuxedTrack, MuxerLog, MuxerRecord};
pub use source::{SyntheticAudio, SyntheticExtractor, SyntheticSource, SyntheticVideo};

/// Tunables of the software backend.
#[derive(Debug, Clone)]
pub struct SoftwareOptions {
    pub max_surface_size: u32,
    /// Frames an encoder holds before its first output.
    pub encoder_latency: usize,
    /// Samples a decoder holds before its first output.
    pub decoder_latency: usize,
    /// Input slots per codec.
    pub input_slots: usize,
    /// Write a JSON manifest of the muxed tracks on `stop`.
    pub write_manifest: bool,
    /// Mime types whose codecs fail to configure.
    pub refuse_mimes: Vec<String>,
}

impl Default for SoftwareOptions {
    fn default() -> Self {
        Self {
            max_surface_size: 4096,
            encoder_latency: 2,
            decoder_latency: 1,
            input_slots: 4,
            write_manifest: true,
            refuse_mimes: Vec::new(),
        }
    }
}

pub struct SoftwareBackend {
    options: SoftwareOptions,
    sources: Mutex<HashMap<PathBuf, SyntheticSource>>,
    muxers: Mutex<HashMap<PathBuf, MuxerLog>>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::with_options(SoftwareOptions::default())
    }

    pub fn with_options(options: SoftwareOptions) -> Self {
        Self {
            options,
            sources: Mutex::new(HashMap::new()),
            muxers: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &SoftwareOptions {
        &self.options
    }

    /// Make `source` readable at `path` without touching the filesystem.
    pub fn register_source(&self, path: impl Into<PathBuf>, source: SyntheticSource) {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), source);
    }

    /// Record of the muxer most recently created for `path`.
    pub fn muxer_log(&self, path: &Path) -> Option<MuxerLog> {
        self.muxers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    fn check_mime(&self, format: &MediaFormat) -> GlcvResult<TrackKind> {
        if self.options.refuse_mimes.iter().any(|m| *m == format.mime) {
            return Err(GlcvError::setup(format!(
                "No software codec configured for {}",
                format.mime
            )));
        }
        format
            .track_kind()
            .ok_or_else(|| GlcvError::setup(format!("Unsupported mime type: {}", format.mime)))
    }

    fn lookup_source(&self, path: &Path) -> GlcvResult<SyntheticSource> {
        if let Some(source) = self
            .sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
        {
            return Ok(source.clone());
        }

        if !path.exists() {
            return Err(GlcvError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            GlcvError::setup(format!(
                "{} is not a synthetic source description: {e}",
                path.display()
            ))
        })
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecBackend for SoftwareBackend {
    fn name(&self) -> &str {
        "software"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn max_surface_size(&self) -> u32 {
        self.options.max_surface_size
    }

    fn create_encoder(&self, format: &MediaFormat) -> GlcvResult<Box<dyn MediaCodec>> {
        let kind = self.check_mime(format)?;
        let codec = match kind {
            TrackKind::Video => {
                let (width, height) = match (format.width, format.height) {
                    (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
                    _ => {
                        return Err(GlcvError::setup(
                            "Video encoder format needs a width and height",
                        ))
                    }
                };
                let max = self.options.max_surface_size;
                if width > max || height > max {
                    return Err(GlcvError::setup(format!(
                        "Encoder surface {width}x{height} exceeds maximum {max}"
                    )));
                }
                SoftwareCodec::video_encoder(format, &self.options)
            }
            TrackKind::Audio => SoftwareCodec::audio_encoder(format, &self.options),
        };
        Ok(Box::new(codec))
    }

    fn create_decoder(
        &self,
        format: &MediaFormat,
        output: Option<FrameSlot>,
    ) -> GlcvResult<Box<dyn MediaCodec>> {
        let codec = match self.check_mime(format)? {
            TrackKind::Video => SoftwareCodec::video_decoder(format, output, &self.options)?,
            TrackKind::Audio => SoftwareCodec::audio_decoder(format, &self.options),
        };
        Ok(Box::new(codec))
    }

    fn create_extractor(&self, path: &Path) -> GlcvResult<Box<dyn MediaExtractor>> {
        let source = self.lookup_source(path)?;
        Ok(Box::new(SyntheticExtractor::new(source)))
    }

    fn create_muxer(&self, path: &Path) -> GlcvResult<Box<dyn MediaMuxer>> {
        let muxer = MemoryMuxer::new(path, self.options.write_manifest);
        self.muxers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), muxer.log());
        Ok(Box::new(muxer))
    }
}
