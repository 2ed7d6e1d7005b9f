//! Ties the compositor output and the encoder cores to one muxer session.

use glcv_codec::{CodecBackend, TrackKind};
use glcv_common::error::{GlcvError, GlcvResult};
use serde::Serialize;

use super::audio::AudioEncoderCore;
use super::drain::TrackAddedObserver;
use super::processor::AudioProcessor;
use super::session::{MuxerSession, SharedMuxer};
use super::video::VideoEncoderCore;
use crate::compositor::Compositor;
use crate::request::EncoderConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecorderState {
    Idle,
    Recording,
    Stopped,
}

/// Counters reported when a recording ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecorderStats {
    pub frames_rendered: u64,
    pub video_samples: u64,
    pub audio_samples: u64,
}

pub struct Recorder {
    config: EncoderConfig,
    audio_expected: bool,
    state: RecorderState,
    muxer: Option<SharedMuxer>,
    video: Option<VideoEncoderCore>,
    audio: Option<AudioEncoderCore>,
    stats: RecorderStats,
}

impl Recorder {
    pub fn new(config: EncoderConfig, audio_expected: bool) -> Self {
        Self {
            config,
            audio_expected,
            state: RecorderState::Idle,
            muxer: None,
            video: None,
            audio: None,
            stats: RecorderStats::default(),
        }
    }

    /// Build the muxer session and the encoder cores. The muxer starts
    /// later, once the last expected track reports its format.
    pub fn raise_encoder(&mut self, backend: &dyn CodecBackend) -> GlcvResult<()> {
        if self.state != RecorderState::Idle {
            tracing::warn!("Encoder already raised");
            return Ok(());
        }
        let expected_tracks = if self.audio_expected { 2 } else { 1 };
        let muxer = backend.create_muxer(&self.config.output_path)?;
        let session = MuxerSession::new(muxer, expected_tracks).shared();

        let video = match VideoEncoderCore::new(
            backend,
            &self.config,
            session.clone(),
            Some(start_when_ready(session.clone())),
        ) {
            Ok(core) => core,
            Err(e) => {
                session.borrow_mut().release();
                return Err(e);
            }
        };
        self.video = Some(video);
        self.muxer = Some(session.clone());

        if self.audio_expected {
            match AudioEncoderCore::new(
                backend,
                &self.config,
                session.clone(),
                Some(start_when_ready(session)),
            ) {
                Ok(core) => self.audio = Some(core),
                Err(e) => {
                    self.release();
                    return Err(e);
                }
            }
        }

        self.state = RecorderState::Recording;
        tracing::info!(
            output = %self.config.output_path.display(),
            width = self.config.width,
            height = self.config.height,
            audio = self.audio_expected,
            "Recorder ready"
        );
        Ok(())
    }

    /// Encode the composited scene at `pts_ns`, along with the current
    /// audio chunk.
    pub fn frame_available(
        &mut self,
        pts_ns: i64,
        compositor: &mut Compositor,
        audio: &AudioProcessor,
    ) -> GlcvResult<()> {
        if self.state != RecorderState::Recording {
            return Err(GlcvError::protocol("Frame available while not recording"));
        }
        let video = self
            .video
            .as_mut()
            .ok_or_else(|| GlcvError::protocol("Frame available without a video encoder"))?;

        video.render(compositor.render(), pts_ns)?;
        video.drain(false)?;

        if let Some(core) = self.audio.as_mut() {
            if let Some(chunk) = audio.process_data() {
                core.encode(&chunk, pts_ns / 1_000)?;
            }
            core.drain(false)?;
        }

        self.stats.frames_rendered += 1;
        Ok(())
    }

    /// Drain both encoders to end of stream and finalize the container.
    /// Runs at most once.
    pub fn stop_recording(&mut self) -> GlcvResult<RecorderStats> {
        if self.state != RecorderState::Recording {
            return Ok(self.stats);
        }
        self.state = RecorderState::Stopped;

        let drained = self.drain_to_end();
        self.collect_stats();
        if let Some(core) = self.audio.as_mut() {
            core.release();
        }
        if let Some(core) = self.video.as_mut() {
            core.release();
        }

        let Some(muxer) = self.muxer.take() else {
            return drained.map(|_| self.stats);
        };
        let mut session = muxer.borrow_mut();
        if let Err(e) = drained {
            session.release();
            return Err(e);
        }
        session.finish()?;
        tracing::info!(
            frames = self.stats.frames_rendered,
            video_samples = self.stats.video_samples,
            audio_samples = self.stats.audio_samples,
            "Recording finalized"
        );
        Ok(self.stats)
    }

    fn drain_to_end(&mut self) -> GlcvResult<()> {
        if let Some(core) = self.audio.as_mut() {
            core.drain(true)?;
        }
        if let Some(core) = self.video.as_mut() {
            core.drain(true)?;
        }
        Ok(())
    }

    fn collect_stats(&mut self) {
        self.stats.video_samples = self.video.as_ref().map_or(0, |c| c.samples_written());
        self.stats.audio_samples = self.audio.as_ref().map_or(0, |c| c.samples_written());
    }

    /// Tear down without draining.
    pub fn release(&mut self) {
        self.state = RecorderState::Stopped;
        if let Some(core) = self.audio.as_mut() {
            core.release();
        }
        if let Some(core) = self.video.as_mut() {
            core.release();
        }
        if let Some(muxer) = self.muxer.take() {
            muxer.borrow_mut().release();
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecorderState::Recording
    }

    pub fn stats(&self) -> RecorderStats {
        self.stats
    }
}

fn start_when_ready(session: SharedMuxer) -> TrackAddedObserver {
    Box::new(move |kind: TrackKind| {
        if session.borrow_mut().start_if_ready()? {
            tracing::debug!(%kind, "Last expected track added; muxer running");
        }
        Ok(())
    })
}
