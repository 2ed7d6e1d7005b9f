//! Demand-driven decoder: one frame per accepted presentation tick.

use std::path::{Path, PathBuf};
use std::time::Duration;

use glcv_codec::{
    find_track, BufferInfo, CodecBackend, FrameSlot, MediaCodec, MediaExtractor, OutputStatus,
    TrackKind,
};
use glcv_common::clock::ms_to_us;
use glcv_common::error::{GlcvError, GlcvResult};

use super::speed::SpeedController;
use crate::encode::{AudioBufferHandle, AudioBufferProvider};

/// Frame rate assumed for tracks that declare none.
const DEFAULT_SOURCE_FPS: u32 = 30;

/// Bounded waits applied to every decoder of a bake.
#[derive(Debug, Clone, Copy)]
pub struct DecoderSettings {
    pub dequeue_timeout: Duration,
    /// Feed/drain steps allowed before the first format change.
    pub warmup_attempts: u32,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            dequeue_timeout: Duration::from_millis(10),
            warmup_attempts: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Unprepared,
    Prepared,
    Advancing,
    Released,
}

/// A demuxer feeding one codec, stepped by hand.
struct TrackPipe {
    extractor: Box<dyn MediaExtractor>,
    codec: Box<dyn MediaCodec>,
    input_done: bool,
    output_done: bool,
    warmed_up: bool,
}

impl TrackPipe {
    fn open(
        backend: &dyn CodecBackend,
        source: &Path,
        kind: TrackKind,
        start_clip_us: i64,
        output: Option<FrameSlot>,
    ) -> GlcvResult<Option<Self>> {
        let mut extractor = backend.create_extractor(source)?;
        let Some((index, format)) = find_track(extractor.as_ref(), kind)? else {
            extractor.release();
            return Ok(None);
        };
        extractor.select_track(index)?;
        if start_clip_us > 0 {
            extractor.seek_to(start_clip_us)?;
        }
        let mut codec = match backend.create_decoder(&format, output) {
            Ok(codec) => codec,
            Err(e) => {
                extractor.release();
                return Err(e);
            }
        };
        if let Err(e) = codec.start() {
            extractor.release();
            return Err(GlcvError::setup(format!("{kind} decoder failed to start: {e}")));
        }
        Ok(Some(Self {
            extractor,
            codec,
            input_done: false,
            output_done: false,
            warmed_up: false,
        }))
    }

    fn feed(&mut self, timeout: Duration) -> GlcvResult<()> {
        if self.input_done {
            return Ok(());
        }
        let Some(index) = self.codec.dequeue_input_buffer(timeout)? else {
            return Ok(());
        };
        match self.extractor.read_sample()? {
            Some(sample) => {
                let size = sample.data.len();
                let buffer = self.codec.input_buffer(index)?;
                buffer.clear();
                buffer.extend_from_slice(&sample.data);
                self.codec
                    .queue_input_buffer(index, size, sample.presentation_time_us, sample.flags)?;
            }
            None => {
                self.codec
                    .queue_input_buffer(index, 0, 0, glcv_codec::BufferFlags::END_OF_STREAM)?;
                self.input_done = true;
            }
        }
        Ok(())
    }

    /// One dequeue attempt. Returns a buffer the caller must release.
    fn drain_one(&mut self, timeout: Duration) -> GlcvResult<Option<(usize, BufferInfo)>> {
        if self.output_done {
            return Ok(None);
        }
        match self.codec.dequeue_output_buffer(timeout)? {
            OutputStatus::TryAgainLater => Ok(None),
            OutputStatus::FormatChanged(format) => {
                tracing::trace!(codec = self.codec.name(), mime = %format.mime, "Decoder output format changed");
                self.warmed_up = true;
                Ok(None)
            }
            OutputStatus::Buffer { index, info } => {
                if info.flags.is_end_of_stream() {
                    self.output_done = true;
                }
                Ok(Some((index, info)))
            }
        }
    }

    fn release(&mut self) {
        if let Err(e) = self.codec.stop() {
            tracing::warn!(codec = self.codec.name(), error = %e, "Failed to stop decoder");
        }
        self.extractor.release();
    }
}

/// Decodes one source into a fixed [`FrameSlot`], one frame per accepted
/// call to [`advance`](Self::advance).
pub struct PassiveDecoder {
    tag: String,
    source: PathBuf,
    start_clip_us: i64,
    decode_audio: bool,
    settings: DecoderSettings,
    output: FrameSlot,
    state: DecoderState,
    video: Option<TrackPipe>,
    audio: Option<TrackPipe>,
    audio_buffer: Option<AudioBufferHandle>,
    speed: SpeedController,
    used: bool,
    frames_accepted: u64,
}

impl PassiveDecoder {
    pub fn new(
        tag: impl Into<String>,
        source: impl Into<PathBuf>,
        start_clip_ms: u64,
        decode_audio: bool,
        settings: DecoderSettings,
    ) -> Self {
        Self {
            tag: tag.into(),
            source: source.into(),
            start_clip_us: ms_to_us(start_clip_ms).unwrap_or(i64::MAX),
            decode_audio,
            settings,
            output: FrameSlot::new(),
            state: DecoderState::Unprepared,
            video: None,
            audio: None,
            audio_buffer: None,
            speed: SpeedController::new(DEFAULT_SOURCE_FPS),
            used: false,
            frames_accepted: 0,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Slot the decoded frames are posted to.
    pub fn frame_slot(&self) -> FrameSlot {
        self.output.clone()
    }

    pub fn is_used(&self) -> bool {
        self.used
    }

    pub fn is_released(&self) -> bool {
        self.state == DecoderState::Released
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Frames the speed controller let through.
    pub fn frames_accepted(&self) -> u64 {
        self.frames_accepted
    }

    /// Open the source, start the codecs, and pump until the video decoder
    /// settles on its output format. Releases everything on failure.
    pub fn prepare(
        &mut self,
        backend: &dyn CodecBackend,
        audio: &mut dyn AudioBufferProvider,
    ) -> GlcvResult<()> {
        if self.state != DecoderState::Unprepared {
            tracing::warn!(tag = %self.tag, "Decoder prepared twice");
            return Ok(());
        }
        if let Err(e) = self.try_prepare(backend, audio) {
            self.release();
            return Err(e);
        }
        self.state = DecoderState::Prepared;
        Ok(())
    }

    fn try_prepare(
        &mut self,
        backend: &dyn CodecBackend,
        audio: &mut dyn AudioBufferProvider,
    ) -> GlcvResult<()> {
        let mut extractor = backend.create_extractor(&self.source)?;
        let fps = find_track(extractor.as_ref(), TrackKind::Video)?
            .map(|(_, format)| format.frame_rate.unwrap_or(DEFAULT_SOURCE_FPS));
        extractor.release();
        let Some(fps) = fps else {
            return Err(GlcvError::setup(format!(
                "No video track in {}",
                self.source.display()
            )));
        };
        self.speed = SpeedController::new(fps);

        self.video = TrackPipe::open(
            backend,
            &self.source,
            TrackKind::Video,
            self.start_clip_us,
            Some(self.output.clone()),
        )?;
        self.warm_up(TrackKind::Video)?;

        if self.decode_audio {
            self.audio = TrackPipe::open(
                backend,
                &self.source,
                TrackKind::Audio,
                self.start_clip_us,
                None,
            )?;
            if self.audio.is_some() {
                self.audio_buffer = Some(audio.provide(&self.tag));
                self.warm_up(TrackKind::Audio)?;
            }
        }

        tracing::debug!(
            tag = %self.tag,
            source = %self.source.display(),
            fps,
            audio = self.audio.is_some(),
            "Decoder prepared"
        );
        Ok(())
    }

    fn warm_up(&mut self, kind: TrackKind) -> GlcvResult<()> {
        for attempt in 1..=self.settings.warmup_attempts {
            self.step(kind)?;
            let pipe = match kind {
                TrackKind::Video => self.video.as_ref(),
                TrackKind::Audio => self.audio.as_ref(),
            };
            match pipe {
                Some(pipe) if pipe.warmed_up => {
                    tracing::trace!(tag = %self.tag, %kind, attempt, "Decoder warmed up");
                    return Ok(());
                }
                Some(pipe) if pipe.output_done => break,
                Some(_) => {}
                None => return Ok(()),
            }
        }
        Err(GlcvError::setup(format!(
            "{kind} decoder for {} produced no output after {} attempts",
            self.tag, self.settings.warmup_attempts
        )))
    }

    /// Decode the next frame if `timestamp_us` is due for this source.
    pub fn advance(&mut self, timestamp_us: i64) -> GlcvResult<()> {
        match self.state {
            DecoderState::Released => {
                tracing::warn!(tag = %self.tag, "Advance on a released decoder");
                return Ok(());
            }
            DecoderState::Unprepared => {
                tracing::warn!(tag = %self.tag, "Advance on an unprepared decoder");
                return Ok(());
            }
            DecoderState::Prepared | DecoderState::Advancing => {}
        }
        if self.is_exhausted() {
            tracing::warn!(tag = %self.tag, "Nothing left for playback");
            return Ok(());
        }
        if !self.speed.test(timestamp_us) {
            return Ok(());
        }

        self.state = DecoderState::Advancing;
        self.used = true;
        self.frames_accepted += 1;
        if self.audio.is_some() {
            self.step(TrackKind::Audio)?;
        }
        self.step(TrackKind::Video)
    }

    fn is_exhausted(&self) -> bool {
        let video_done = self.video.as_ref().map_or(true, |p| p.output_done);
        let audio_done = self.audio.as_ref().map_or(true, |p| p.output_done);
        video_done && audio_done
    }

    /// One feed and one drain attempt on the given track.
    fn step(&mut self, kind: TrackKind) -> GlcvResult<()> {
        let timeout = self.settings.dequeue_timeout;
        match kind {
            TrackKind::Video => {
                let Some(pipe) = self.video.as_mut() else {
                    return Ok(());
                };
                pipe.feed(timeout)?;
                if let Some((index, info)) = pipe.drain_one(timeout)? {
                    pipe.codec.release_output_buffer(index, info.size != 0)?;
                }
            }
            TrackKind::Audio => {
                let Some(pipe) = self.audio.as_mut() else {
                    return Ok(());
                };
                pipe.feed(timeout)?;
                if let Some((index, info)) = pipe.drain_one(timeout)? {
                    if let Some(buffer) = &self.audio_buffer {
                        if info.flags.is_end_of_stream() {
                            buffer.clear();
                        } else {
                            let data = pipe.codec.output_buffer(index)?;
                            let range = info.payload_range(data.len())?;
                            buffer.update(data[range].to_vec());
                        }
                    }
                    pipe.codec.release_output_buffer(index, false)?;
                }
            }
        }
        Ok(())
    }

    /// Stop and release the codecs and demuxers. Safe to call repeatedly
    /// and after a failed [`prepare`](Self::prepare).
    pub fn release(&mut self) {
        if self.state == DecoderState::Released {
            return;
        }
        self.state = DecoderState::Released;
        if let Some(mut pipe) = self.video.take() {
            pipe.release();
        }
        if let Some(mut pipe) = self.audio.take() {
            pipe.release();
        }
        if let Some(buffer) = self.audio_buffer.take() {
            buffer.clear();
        }
        tracing::debug!(tag = %self.tag, frames = self.frames_accepted, "Decoder released");
    }
}

impl Drop for PassiveDecoder {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::AudioProcessor;
    use glcv_codec::software::{SoftwareBackend, SyntheticSource};

    fn backend() -> SoftwareBackend {
        let backend = SoftwareBackend::new();
        backend.register_source("/clips/a.mp4", SyntheticSource::video(16, 16, 30, 2000));
        backend.register_source(
            "/clips/talk.mp4",
            SyntheticSource::video(16, 16, 30, 2000).with_audio(44_100, 2, 2000),
        );
        backend.register_source("/clips/voice.m4a", SyntheticSource::audio_only(44_100, 2, 1000));
        backend
    }

    #[test]
    fn test_prepare_primes_without_posting() {
        let backend = backend();
        let mut audio = AudioProcessor::new();
        let mut decoder = PassiveDecoder::new("a", "/clips/a.mp4", 0, false, DecoderSettings::default());
        decoder.prepare(&backend, &mut audio).unwrap();
        assert!(!decoder.is_used());

        decoder.advance(0).unwrap();
        assert!(decoder.is_used());
        assert!(decoder.frame_slot().has_frame());
        assert_eq!(decoder.frames_accepted(), 1);
    }

    #[test]
    fn test_speed_controller_throttles_advance() {
        let backend = backend();
        let mut audio = AudioProcessor::new();
        let mut decoder = PassiveDecoder::new("a", "/clips/a.mp4", 0, false, DecoderSettings::default());
        decoder.prepare(&backend, &mut audio).unwrap();

        for i in 0..60 {
            decoder.advance(i * 1_000_000 / 60).unwrap();
        }
        assert_eq!(decoder.frames_accepted(), 30);
    }

    #[test]
    fn test_start_clip_skips_ahead() {
        let backend = backend();
        let mut audio = AudioProcessor::new();
        let mut decoder =
            PassiveDecoder::new("a", "/clips/a.mp4", 1000, false, DecoderSettings::default());
        decoder.prepare(&backend, &mut audio).unwrap();
        decoder.advance(0).unwrap();

        let pts = decoder.frame_slot().with_frame(|f| f.pts_us).unwrap();
        assert_eq!(pts, 1_000_000);
    }

    #[test]
    fn test_missing_video_track_is_fatal() {
        let backend = backend();
        let mut audio = AudioProcessor::new();
        let mut decoder =
            PassiveDecoder::new("v", "/clips/voice.m4a", 0, true, DecoderSettings::default());
        let err = decoder.prepare(&backend, &mut audio).unwrap_err();
        assert!(err.is_setup());
        assert!(decoder.is_released());
    }

    #[test]
    fn test_missing_source_fails_prepare() {
        let backend = backend();
        let mut audio = AudioProcessor::new();
        let mut decoder =
            PassiveDecoder::new("x", "/clips/nope.mp4", 0, false, DecoderSettings::default());
        assert!(matches!(
            decoder.prepare(&backend, &mut audio),
            Err(GlcvError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_audio_path_fills_buffer() {
        let backend = backend();
        let mut audio = AudioProcessor::new();
        let mut decoder =
            PassiveDecoder::new("t", "/clips/talk.mp4", 0, true, DecoderSettings::default());
        decoder.prepare(&backend, &mut audio).unwrap();
        assert!(decoder.has_audio());
        assert_eq!(audio.slot_count(), 1);

        decoder.advance(0).unwrap();
        decoder.advance(33_333).unwrap();
        assert!(audio.process_data().is_some());
    }

    #[test]
    fn test_release_is_idempotent_and_silences_advance() {
        let backend = backend();
        let mut audio = AudioProcessor::new();
        let mut decoder = PassiveDecoder::new("a", "/clips/a.mp4", 0, false, DecoderSettings::default());
        decoder.prepare(&backend, &mut audio).unwrap();
        decoder.release();
        decoder.release();
        decoder.advance(0).unwrap();
        assert_eq!(decoder.frames_accepted(), 0);
    }

    #[test]
    fn test_exhausted_decoder_stops_accepting() {
        let backend = backend();
        backend.register_source("/clips/short.mp4", SyntheticSource::video(16, 16, 30, 100));
        let mut audio = AudioProcessor::new();
        let mut decoder =
            PassiveDecoder::new("s", "/clips/short.mp4", 0, false, DecoderSettings::default());
        decoder.prepare(&backend, &mut audio).unwrap();
        for i in 0..30 {
            decoder.advance(i * 33_334).unwrap();
        }
        assert!(decoder.frames_accepted() < 30);
    }
}
