//! What a bake is asked to produce, and the encoder settings derived
//! from it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use glcv_common::config::{AudioDefaults, BakeDefaults};
use glcv_common::error::{GlcvError, GlcvResult};
use glcv_timeline::{resolve_resolution, Resolution, Template, TimeMask};
use serde::{Deserialize, Serialize};

use crate::decode::DecoderSettings;
use crate::encode::DrainTimeouts;

/// Opaque black, as `0xRRGGBBAA`.
pub const DEFAULT_VIEWPORT_COLOR: u32 = 0x0000_00FF;

/// AAC encoder parameters. Input is interleaved signed 16-bit PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u32,
    pub bit_rate: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self::from(&AudioDefaults::default())
    }
}

impl From<&AudioDefaults> for AudioSettings {
    fn from(defaults: &AudioDefaults) -> Self {
        Self {
            sample_rate: defaults.sample_rate,
            channels: defaults.channels,
            bit_rate: defaults.bit_rate,
        }
    }
}

/// One bake job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BakeRequest {
    /// Viewport fill color as `0xRRGGBBAA`.
    #[serde(default = "default_viewport_color")]
    pub viewport_color: u32,

    pub template: Template,

    pub output_path: PathBuf,

    /// Length of the shorter output side in pixels.
    #[serde(default = "default_min_side_px")]
    pub min_side_px: u32,

    #[serde(default = "default_fps")]
    pub fps: u32,

    #[serde(default = "default_i_frame_interval_secs")]
    pub i_frame_interval_secs: u32,

    /// Target video bitrate (bits/s).
    #[serde(default = "default_bit_rate")]
    pub bit_rate: u32,

    /// Trace every frame tick.
    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub audio: AudioSettings,
}

fn default_viewport_color() -> u32 {
    DEFAULT_VIEWPORT_COLOR
}

fn default_min_side_px() -> u32 {
    BakeDefaults::default().min_side_px
}

fn default_fps() -> u32 {
    BakeDefaults::default().fps
}

fn default_i_frame_interval_secs() -> u32 {
    BakeDefaults::default().i_frame_interval_secs
}

fn default_bit_rate() -> u32 {
    BakeDefaults::default().bit_rate
}

impl BakeRequest {
    pub fn new(template: Template, output_path: impl Into<PathBuf>) -> Self {
        Self::with_defaults(template, output_path, &BakeDefaults::default())
    }

    /// A request whose encoder settings come from configured defaults.
    pub fn with_defaults(
        template: Template,
        output_path: impl Into<PathBuf>,
        defaults: &BakeDefaults,
    ) -> Self {
        Self {
            viewport_color: DEFAULT_VIEWPORT_COLOR,
            template,
            output_path: output_path.into(),
            min_side_px: defaults.min_side_px,
            fps: defaults.fps,
            i_frame_interval_secs: defaults.i_frame_interval_secs,
            bit_rate: defaults.bit_rate,
            verbose: false,
            audio: AudioSettings::from(&defaults.audio),
        }
    }

    /// Read a request from a JSON file.
    pub fn from_file(path: &Path) -> GlcvResult<Self> {
        if !path.exists() {
            return Err(GlcvError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn with_min_side(mut self, min_side_px: u32) -> Self {
        self.min_side_px = min_side_px;
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_viewport_color(mut self, rgba: u32) -> Self {
        self.viewport_color = rgba;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn validate(&self) -> GlcvResult<()> {
        if self.fps == 0 {
            return Err(GlcvError::config("fps must be at least 1"));
        }
        if self.bit_rate == 0 {
            return Err(GlcvError::config("bit_rate must be at least 1"));
        }
        if self.min_side_px < 8 {
            return Err(GlcvError::config(format!(
                "min_side_px must be at least 8, got {}",
                self.min_side_px
            )));
        }
        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(GlcvError::config("audio needs a sample rate and channels"));
        }
        if self.template.is_empty() {
            return Err(GlcvError::timeline("Template has no units"));
        }
        self.template.validate()?;
        if TimeMask::from_units(&self.template.units).duration_ms() == 0 {
            return Err(GlcvError::timeline("Template duration is zero"));
        }
        Ok(())
    }

    /// Output resolution for this request.
    pub fn resolution(&self) -> Resolution {
        resolve_resolution(self.template.aspect_ratio, self.min_side_px)
    }

    /// Resolve the immutable encoder settings of one session.
    pub fn encoder_config(
        &self,
        defaults: &BakeDefaults,
        max_surface_size: u32,
    ) -> GlcvResult<EncoderConfig> {
        let resolution = self.resolution();
        if !resolution.fits_within(max_surface_size) {
            return Err(GlcvError::setup(format!(
                "Output {}x{} exceeds the encoder limit of {max_surface_size}px",
                resolution.width, resolution.height
            )));
        }
        Ok(EncoderConfig {
            output_path: self.output_path.clone(),
            width: resolution.width,
            height: resolution.height,
            fps: self.fps,
            i_frame_interval_secs: self.i_frame_interval_secs,
            bit_rate: self.bit_rate,
            audio: self.audio,
            dequeue_timeout: Duration::from_millis(defaults.dequeue_timeout_ms),
            eos_drain_deadline: Duration::from_millis(defaults.eos_drain_deadline_ms),
            decoder_warmup_attempts: defaults.decoder_warmup_attempts.max(1),
        })
    }
}

/// Encoder session settings, fixed for the lifetime of one bake.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub i_frame_interval_secs: u32,
    pub bit_rate: u32,
    pub audio: AudioSettings,
    pub dequeue_timeout: Duration,
    pub eos_drain_deadline: Duration,
    pub decoder_warmup_attempts: u32,
}

impl EncoderConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn timeouts(&self) -> DrainTimeouts {
        DrainTimeouts {
            dequeue: self.dequeue_timeout,
            end_of_stream: self.eos_drain_deadline,
        }
    }

    pub fn decoder_settings(&self) -> DecoderSettings {
        DecoderSettings {
            dequeue_timeout: self.dequeue_timeout,
            warmup_attempts: self.decoder_warmup_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glcv_timeline::TimelineUnit;

    fn template() -> Template {
        Template::new(
            16.0 / 9.0,
            vec![
                TimelineUnit::new("a", "/media/a.mp4", 1000),
                TimelineUnit::new("b", "/media/b.mp4", 1000).with_start_delay(1000),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_match_encoder_presets() {
        let request = BakeRequest::new(template(), "/tmp/out.mp4");
        assert_eq!(request.fps, 30);
        assert_eq!(request.bit_rate, 4_000_000);
        assert_eq!(request.i_frame_interval_secs, 5);
        assert_eq!(request.audio.sample_rate, 44_100);
        assert_eq!(request.audio.bit_rate, 65_536);
        request.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_bad_settings() {
        assert!(BakeRequest::new(template(), "o.mp4").with_fps(0).validate().is_err());
        assert!(BakeRequest::new(template(), "o.mp4").with_min_side(4).validate().is_err());

        let empty = Template {
            aspect_ratio: 1.0,
            units: Vec::new(),
        };
        assert!(BakeRequest::new(empty, "o.mp4").validate().is_err());

        let zero = Template {
            aspect_ratio: 1.0,
            units: vec![TimelineUnit::new("a", "/media/a.mp4", 0)],
        };
        assert!(BakeRequest::new(zero, "o.mp4").validate().is_err());
    }

    #[test]
    fn test_encoder_config_respects_surface_limit() {
        let request = BakeRequest::new(template(), "o.mp4").with_min_side(1080);
        let config = request.encoder_config(&BakeDefaults::default(), 4096).unwrap();
        assert_eq!((config.width, config.height), (1920, 1080));
        assert_eq!(config.dequeue_timeout, Duration::from_millis(10));

        let err = request.encoder_config(&BakeDefaults::default(), 1024).unwrap_err();
        assert!(err.is_setup());
    }

    #[test]
    fn test_request_json_fills_defaults() {
        let json = r#"{
            "template": {"aspect_ratio": 1.0, "units": []},
            "output_path": "out.mp4"
        }"#;
        let request: BakeRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.viewport_color, DEFAULT_VIEWPORT_COLOR);
        assert_eq!(request.min_side_px, 1080);
        assert!(!request.verbose);
    }
}
