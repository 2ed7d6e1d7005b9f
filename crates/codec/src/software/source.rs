use glcv_common::error::{GlcvError, GlcvResult};
use serde::{Deserialize, Serialize};

use crate::buffer::BufferFlags;
use crate::extractor::{MediaExtractor, Sample};
use crate::format::{MediaFormat, MIME_AUDIO_AAC, MIME_VIDEO_AVC};

/// Description of a generated clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticSource {
    #[serde(default)]
    pub video: Option<SyntheticVideo>,
    #[serde(default)]
    pub audio: Option<SyntheticAudio>,
    #[serde(default)]
    pub rotation_deg: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticVideo {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub frame_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticAudio {
    pub sample_rate: u32,
    pub channels: u32,
    /// PCM frames per compressed chunk.
    pub chunk_samples: u32,
    pub chunk_count: u32,
}

impl SyntheticSource {
    /// A silent video clip of `duration_ms`.
    pub fn video(width: u32, height: u32, fps: u32, duration_ms: u64) -> Self {
        let fps = fps.max(1);
        Self {
            video: Some(SyntheticVideo {
                width,
                height,
                fps,
                frame_count: (duration_ms * fps as u64 / 1000) as u32,
            }),
            audio: None,
            rotation_deg: 0,
        }
    }

    /// Add a PCM track of `duration_ms` in 1024-frame chunks.
    pub fn with_audio(mut self, sample_rate: u32, channels: u32, duration_ms: u64) -> Self {
        let chunk_samples = 1024u64;
        let total = duration_ms * sample_rate as u64 / 1000;
        self.audio = Some(SyntheticAudio {
            sample_rate,
            channels,
            chunk_samples: chunk_samples as u32,
            chunk_count: total.div_ceil(chunk_samples) as u32,
        });
        self
    }

    /// A source with audio only.
    pub fn audio_only(sample_rate: u32, channels: u32, duration_ms: u64) -> Self {
        Self {
            video: None,
            audio: None,
            rotation_deg: 0,
        }
        .with_audio(sample_rate, channels, duration_ms)
    }

    fn formats(&self) -> Vec<MediaFormat> {
        let mut formats = Vec::with_capacity(2);
        if let Some(video) = &self.video {
            let mut format = MediaFormat::video(MIME_VIDEO_AVC, video.width, video.height)
                .with_frame_rate(video.fps)
                .with_duration_us(video.frame_count as i64 * 1_000_000 / video.fps.max(1) as i64);
            format.rotation_deg = self.rotation_deg;
            formats.push(format);
        }
        if let Some(audio) = &self.audio {
            let duration_us = audio.chunk_count as i64 * audio.chunk_samples as i64 * 1_000_000
                / audio.sample_rate.max(1) as i64;
            formats.push(
                MediaFormat::audio(MIME_AUDIO_AAC, audio.sample_rate, audio.channels)
                    .with_duration_us(duration_us),
            );
        }
        formats
    }
}

#[derive(Debug, Clone, Copy)]
enum Track {
    Video(SyntheticVideo),
    Audio(SyntheticAudio),
}

impl Track {
    fn sample_count(&self) -> u32 {
        match self {
            Self::Video(v) => v.frame_count,
            Self::Audio(a) => a.chunk_count,
        }
    }

    fn sample_time_us(&self, index: u32) -> i64 {
        match self {
            Self::Video(v) => index as i64 * 1_000_000 / v.fps.max(1) as i64,
            Self::Audio(a) => {
                index as i64 * a.chunk_samples as i64 * 1_000_000 / a.sample_rate.max(1) as i64
            }
        }
    }

    /// First sample index at or after `time_us`.
    fn index_at(&self, time_us: i64) -> u32 {
        let time_us = time_us.max(0);
        let (num, den) = match self {
            Self::Video(v) => (v.fps as i64, 1_000_000),
            Self::Audio(a) => (a.sample_rate as i64, 1_000_000 * a.chunk_samples as i64),
        };
        let index = (time_us * num + den - 1) / den.max(1);
        index.min(self.sample_count() as i64) as u32
    }

    fn payload(&self, index: u32) -> Vec<u8> {
        match self {
            // Compressed video: just the frame index; the decoder paints from it.
            Self::Video(_) => index.to_le_bytes().to_vec(),
            Self::Audio(a) => {
                let value = (index % 1000) as i16;
                let samples = a.chunk_samples as usize * a.channels as usize;
                value
                    .to_le_bytes()
                    .iter()
                    .copied()
                    .cycle()
                    .take(samples * 2)
                    .collect()
            }
        }
    }
}

/// Extractor over a [`SyntheticSource`].
pub struct SyntheticExtractor {
    source: SyntheticSource,
    formats: Vec<MediaFormat>,
    selected: Option<Track>,
    cursor: u32,
    released: bool,
}

impl SyntheticExtractor {
    pub fn new(source: SyntheticSource) -> Self {
        let formats = source.formats();
        Self {
            source,
            formats,
            selected: None,
            cursor: 0,
            released: false,
        }
    }
}

impl MediaExtractor for SyntheticExtractor {
    fn track_count(&self) -> usize {
        self.formats.len()
    }

    fn track_format(&self, index: usize) -> GlcvResult<MediaFormat> {
        self.formats
            .get(index)
            .cloned()
            .ok_or_else(|| GlcvError::codec(format!("No track {index}")))
    }

    fn select_track(&mut self, index: usize) -> GlcvResult<()> {
        let format = self.track_format(index)?;
        let track = match (format.is_video(), &self.source.video, &self.source.audio) {
            (true, Some(video), _) => Track::Video(*video),
            (false, _, Some(audio)) => Track::Audio(*audio),
            _ => return Err(GlcvError::codec(format!("No track {index}"))),
        };
        self.selected = Some(track);
        self.cursor = 0;
        Ok(())
    }

    fn seek_to(&mut self, time_us: i64) -> GlcvResult<()> {
        let track = self
            .selected
            .ok_or_else(|| GlcvError::codec("seek before selecting a track"))?;
        self.cursor = track.index_at(time_us);
        Ok(())
    }

    fn read_sample(&mut self) -> GlcvResult<Option<Sample>> {
        if self.released {
            return Err(GlcvError::codec("read from released extractor"));
        }
        let track = self
            .selected
            .ok_or_else(|| GlcvError::codec("read before selecting a track"))?;
        if self.cursor >= track.sample_count() {
            return Ok(None);
        }

        let index = self.cursor;
        self.cursor += 1;
        let flags = match track {
            Track::Video(_) if index == 0 => BufferFlags::KEY_FRAME,
            Track::Video(_) => BufferFlags::NONE,
            Track::Audio(_) => BufferFlags::KEY_FRAME,
        };
        Ok(Some(Sample {
            data: track.payload(index),
            presentation_time_us: track.sample_time_us(index),
            flags,
        }))
    }

    fn release(&mut self) {
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::find_track;
    use crate::format::TrackKind;

    #[test]
    fn test_video_samples_in_order() {
        let mut extractor = SyntheticExtractor::new(SyntheticSource::video(16, 16, 30, 100));
        let (index, format) = find_track(&extractor, TrackKind::Video).unwrap().unwrap();
        assert_eq!(format.frame_rate, Some(30));
        extractor.select_track(index).unwrap();

        let mut times = Vec::new();
        while let Some(sample) = extractor.read_sample().unwrap() {
            times.push(sample.presentation_time_us);
        }
        assert_eq!(times, vec![0, 33_333, 66_666]);
    }

    #[test]
    fn test_seek_lands_on_next_frame() {
        let mut extractor = SyntheticExtractor::new(SyntheticSource::video(16, 16, 10, 1000));
        extractor.select_track(0).unwrap();
        extractor.seek_to(250_000).unwrap();
        let sample = extractor.read_sample().unwrap().unwrap();
        assert_eq!(sample.presentation_time_us, 300_000);
    }

    #[test]
    fn test_audio_track_follows_video() {
        let source = SyntheticSource::video(16, 16, 30, 1000).with_audio(44_100, 2, 1000);
        let extractor = SyntheticExtractor::new(source);
        assert_eq!(extractor.track_count(), 2);
        let (index, format) = find_track(&extractor, TrackKind::Audio).unwrap().unwrap();
        assert_eq!(index, 1);
        assert_eq!(format.sample_rate, Some(44_100));
    }

    #[test]
    fn test_audio_only_has_no_video_track() {
        let extractor = SyntheticExtractor::new(SyntheticSource::audio_only(44_100, 2, 500));
        assert!(find_track(&extractor, TrackKind::Video).unwrap().is_none());
    }
}
