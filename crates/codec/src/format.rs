//! Track and codec format descriptions.

use serde::{Deserialize, Serialize};

pub const MIME_VIDEO_AVC: &str = "video/avc";
pub const MIME_AUDIO_AAC: &str = "audio/mp4a-latm";
pub const MIME_VIDEO_RAW: &str = "video/raw";
pub const MIME_AUDIO_RAW: &str = "audio/raw";

/// Media type of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Video,
    Audio,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => f.write_str("video"),
            Self::Audio => f.write_str("audio"),
        }
    }
}

/// Key/value description of a track or a codec configuration.
///
/// Fields a codec does not need stay `None`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaFormat {
    pub mime: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
    pub bit_rate: Option<u32>,
    pub i_frame_interval_secs: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u32>,
    pub duration_us: Option<i64>,
    #[serde(default)]
    pub rotation_deg: i32,
    /// Out-of-band codec configuration (SPS/PPS, AudioSpecificConfig).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codec_data: Vec<u8>,
}

impl MediaFormat {
    pub fn video(mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            mime: mime.into(),
            width: Some(width),
            height: Some(height),
            ..Self::default()
        }
    }

    pub fn audio(mime: impl Into<String>, sample_rate: u32, channel_count: u32) -> Self {
        Self {
            mime: mime.into(),
            sample_rate: Some(sample_rate),
            channel_count: Some(channel_count),
            ..Self::default()
        }
    }

    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = Some(fps);
        self
    }

    pub fn with_bit_rate(mut self, bit_rate: u32) -> Self {
        self.bit_rate = Some(bit_rate);
        self
    }

    pub fn with_i_frame_interval(mut self, secs: u32) -> Self {
        self.i_frame_interval_secs = Some(secs);
        self
    }

    pub fn with_duration_us(mut self, duration_us: i64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }

    pub fn with_codec_data(mut self, codec_data: Vec<u8>) -> Self {
        self.codec_data = codec_data;
        self
    }

    pub fn is_video(&self) -> bool {
        self.mime.starts_with("video/")
    }

    pub fn is_audio(&self) -> bool {
        self.mime.starts_with("audio/")
    }

    pub fn track_kind(&self) -> Option<TrackKind> {
        if self.is_video() {
            Some(TrackKind::Video)
        } else if self.is_audio() {
            Some(TrackKind::Audio)
        } else {
            None
        }
    }

    /// Bytes per interleaved 16-bit PCM frame.
    pub fn pcm_frame_bytes(&self) -> usize {
        self.channel_count.unwrap_or(2) as usize * 2
    }
}
