//! Placed media units.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-frame transform applied to a unit's layer.
///
/// Translation factors are fractions of the viewport size (`+x` right,
/// `+y` down). Rotation is clockwise in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transform {
    pub scale: f32,
    pub rotation_deg: f32,
    pub translate_x: f32,
    pub translate_y: f32,
    pub opacity: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            scale: 1.0,
            rotation_deg: 0.0,
            translate_x: 0.0,
            translate_y: 0.0,
            opacity: 1.0,
        }
    }
}

impl Transform {
    /// Whether this transform draws anything at all.
    pub fn is_drawable(&self) -> bool {
        self.scale > 0.0 && self.opacity > 0.0
    }
}

/// One media source placed on the timeline.
///
/// Units are immutable once placed: edits replace the whole unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineUnit {
    /// Unique identity tag.
    pub tag: String,

    /// Source file.
    pub source: PathBuf,

    /// Offset from timeline zero (ms).
    #[serde(default)]
    pub start_delay_ms: u64,

    /// Offset into the source where playback begins (ms).
    #[serde(default)]
    pub start_clip_ms: u64,

    /// Length of the source used on the timeline (ms).
    pub trimmed_duration_ms: u64,

    #[serde(default)]
    pub transform: Transform,

    /// Draw order; higher values are drawn on top.
    #[serde(default)]
    pub z_position: i32,

    /// Suppress this unit's audio in the output.
    #[serde(default)]
    pub muted_audio: bool,
}

impl TimelineUnit {
    pub fn new(tag: impl Into<String>, source: impl Into<PathBuf>, duration_ms: u64) -> Self {
        Self {
            tag: tag.into(),
            source: source.into(),
            start_delay_ms: 0,
            start_clip_ms: 0,
            trimmed_duration_ms: duration_ms,
            transform: Transform::default(),
            z_position: 0,
            muted_audio: false,
        }
    }

    pub fn with_start_delay(mut self, start_delay_ms: u64) -> Self {
        self.start_delay_ms = start_delay_ms;
        self
    }

    pub fn with_start_clip(mut self, start_clip_ms: u64) -> Self {
        self.start_clip_ms = start_clip_ms;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_z_position(mut self, z_position: i32) -> Self {
        self.z_position = z_position;
        self
    }

    pub fn with_muted_audio(mut self, muted: bool) -> Self {
        self.muted_audio = muted;
        self
    }

    /// Exclusive end of the unit on the timeline (ms).
    pub fn end_ms(&self) -> u64 {
        self.start_delay_ms.saturating_add(self.trimmed_duration_ms)
    }

    /// Half-open visibility test: `start <= t < end`.
    pub fn is_visible_at(&self, t_ms: i64) -> bool {
        t_ms >= 0 && (t_ms as u64) >= self.start_delay_ms && (t_ms as u64) < self.end_ms()
    }
}
