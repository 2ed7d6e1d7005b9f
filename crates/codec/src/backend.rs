//! Codec backend factory.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use glcv_common::error::{GlcvError, GlcvResult};
use serde::{Deserialize, Serialize};

use crate::buffer::FrameSlot;
use crate::codec::MediaCodec;
use crate::extractor::MediaExtractor;
use crate::format::MediaFormat;
use crate::muxer::MediaMuxer;
use crate::software::SoftwareBackend;

/// Creates codecs, extractors and muxers of one implementation.
///
/// The backend itself is shared across threads; everything it creates is
/// owned by the bake thread that asked for it.
pub trait CodecBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the backend can run on this system.
    fn is_available(&self) -> bool;

    /// Largest surface side (pixels) an encoder accepts.
    fn max_surface_size(&self) -> u32;

    /// A configured, not yet started encoder for `format`.
    fn create_encoder(&self, format: &MediaFormat) -> GlcvResult<Box<dyn MediaCodec>>;

    /// A configured, not yet started decoder for `format`. Video decoders
    /// present rendered frames into `output`.
    fn create_decoder(
        &self,
        format: &MediaFormat,
        output: Option<FrameSlot>,
    ) -> GlcvResult<Box<dyn MediaCodec>>;

    fn create_extractor(&self, path: &Path) -> GlcvResult<Box<dyn MediaExtractor>>;

    fn create_muxer(&self, path: &Path) -> GlcvResult<Box<dyn MediaMuxer>>;
}

/// Selectable backend implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Gst,
    Software,
}

impl FromStr for BackendKind {
    type Err = GlcvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gst" | "gstreamer" => Ok(Self::Gst),
            "software" | "sw" | "memory" => Ok(Self::Software),
            other => Err(GlcvError::config(format!(
                "Unknown backend: {other}. Use: gst, software"
            ))),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gst => f.write_str("gst"),
            Self::Software => f.write_str("software"),
        }
    }
}

/// Instantiate a backend by kind.
pub fn create_backend(kind: BackendKind) -> GlcvResult<Arc<dyn CodecBackend>> {
    match kind {
        BackendKind::Software => Ok(Arc::new(SoftwareBackend::new())),
        #[cfg(feature = "gst")]
        BackendKind::Gst => Ok(Arc::new(crate::gst::GstBackend::new()?)),
        #[cfg(not(feature = "gst"))]
        BackendKind::Gst => Err(GlcvError::unsupported(
            "GStreamer backend not compiled in (enable feature `gst`)",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("gst".parse::<BackendKind>().unwrap(), BackendKind::Gst);
        assert_eq!(
            "Software".parse::<BackendKind>().unwrap(),
            BackendKind::Software
        );
        assert!("vaapi".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Software.to_string(), "software");
    }

    #[test]
    fn test_software_backend_is_always_available() {
        let backend = create_backend(BackendKind::Software).unwrap();
        assert!(backend.is_available());
        assert_eq!(backend.name(), "software");
    }
}
