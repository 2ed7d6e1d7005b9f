//! Media source kinds and metadata.

use std::path::Path;

use glcv_common::error::{GlcvError, GlcvResult};
use serde::{Deserialize, Serialize};

/// Timeline length of a still image when the unit does not trim it.
pub const DEFAULT_IMAGE_DURATION_MS: u64 = 5_000;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "gif", "tif", "tiff"];

/// What kind of media a unit points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    /// Classify a source by file extension. Anything that is not a known
    /// still-image format is treated as video and probed by the codec layer.
    pub fn from_path(path: &Path) -> Self {
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                IMAGE_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false);

        if is_image {
            Self::Image
        } else {
            Self::Video
        }
    }
}

/// Display rotation stored in the source container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Orientation {
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => Self::Deg90,
            180 => Self::Deg180,
            270 => Self::Deg270,
            _ => Self::Deg0,
        }
    }

    pub fn degrees(self) -> i32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Whether width and height swap when displayed.
    pub fn is_transposed(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

/// Probed properties of a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub kind: MediaKind,
    pub width: u32,
    pub height: u32,
    pub duration_ms: u64,
    pub orientation: Orientation,
    pub has_audio: bool,
}

impl MediaMetadata {
    /// Display aspect ratio, honoring orientation.
    pub fn display_aspect(&self) -> f32 {
        let (w, h) = if self.orientation.is_transposed() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        };
        w as f32 / h.max(1) as f32
    }
}

/// Read an image's header for its dimensions.
pub fn probe_image(path: &Path) -> GlcvResult<MediaMetadata> {
    if !path.exists() {
        return Err(GlcvError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let (width, height) = image::image_dimensions(path).map_err(|e| {
        GlcvError::setup(format!("Cannot read image {}: {e}", path.display()))
    })?;

    Ok(MediaMetadata {
        kind: MediaKind::Image,
        width,
        height,
        duration_ms: DEFAULT_IMAGE_DURATION_MS,
        orientation: Orientation::Deg0,
        has_audio: false,
    })
}
