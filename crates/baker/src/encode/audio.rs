//! PCM-fed audio encoder writing into the shared muxer.

use std::time::Instant;

use glcv_codec::{BufferFlags, CodecBackend, MediaCodec, MediaFormat, TrackKind, MIME_AUDIO_AAC};
use glcv_common::error::{GlcvError, GlcvResult};

use super::drain::{DrainTimeouts, TrackAddedObserver, TrackWriter};
use super::session::SharedMuxer;
use crate::request::{AudioSettings, EncoderConfig};

pub struct AudioEncoderCore {
    codec: Box<dyn MediaCodec>,
    writer: TrackWriter,
    timeouts: DrainTimeouts,
    last_pts_us: i64,
    eos_queued: bool,
    chunks_dropped: u64,
    released: bool,
}

impl AudioEncoderCore {
    pub fn new(
        backend: &dyn CodecBackend,
        config: &EncoderConfig,
        muxer: SharedMuxer,
        observer: Option<TrackAddedObserver>,
    ) -> GlcvResult<Self> {
        let AudioSettings {
            sample_rate,
            channels,
            bit_rate,
        } = config.audio;
        let format =
            MediaFormat::audio(MIME_AUDIO_AAC, sample_rate, channels).with_bit_rate(bit_rate);

        let mut codec = backend.create_encoder(&format).map_err(|e| {
            if e.is_setup() {
                e
            } else {
                GlcvError::setup(format!("Audio encoder configuration failed: {e}"))
            }
        })?;
        if let Err(e) = codec.start() {
            let _ = codec.stop();
            return Err(GlcvError::setup(format!("Audio encoder failed to start: {e}")));
        }
        tracing::debug!(codec = codec.name(), sample_rate, channels, bit_rate, "Audio encoder started");

        Ok(Self {
            codec,
            writer: TrackWriter::new(TrackKind::Audio, muxer, observer),
            timeouts: config.timeouts(),
            last_pts_us: 0,
            eos_queued: false,
            chunks_dropped: 0,
            released: false,
        })
    }

    /// Queue one chunk of interleaved 16-bit PCM. An empty chunk ends the
    /// stream.
    pub fn encode(&mut self, pcm: &[u8], pts_us: i64) -> GlcvResult<()> {
        if self.released {
            return Err(GlcvError::protocol("Encode on a released audio encoder"));
        }
        if self.eos_queued {
            tracing::warn!("Audio chunk after end of stream dropped");
            return Ok(());
        }
        let Some(index) = self.codec.dequeue_input_buffer(self.timeouts.dequeue)? else {
            self.chunks_dropped += 1;
            tracing::warn!(pts_us, dropped = self.chunks_dropped, "Audio encoder busy; chunk dropped");
            return Ok(());
        };
        self.queue(index, pcm, pts_us)
    }

    fn queue(&mut self, index: usize, pcm: &[u8], pts_us: i64) -> GlcvResult<()> {
        let buffer = self.codec.input_buffer(index)?;
        buffer.clear();
        buffer.extend_from_slice(pcm);
        if pcm.is_empty() {
            self.codec
                .queue_input_buffer(index, 0, pts_us, BufferFlags::END_OF_STREAM)?;
            self.eos_queued = true;
        } else {
            self.codec
                .queue_input_buffer(index, pcm.len(), pts_us, BufferFlags::NONE)?;
        }
        self.last_pts_us = pts_us;
        Ok(())
    }

    pub fn drain(&mut self, end_of_stream: bool) -> GlcvResult<()> {
        if self.released {
            return Err(GlcvError::protocol("Drain on a released audio encoder"));
        }
        if end_of_stream && !self.eos_queued {
            self.queue_end_of_stream()?;
        }
        self.writer
            .drain(self.codec.as_mut(), end_of_stream, self.timeouts)
    }

    /// Wait for an input slot to carry the EOS flag, draining output in
    /// between so the codec can free one.
    fn queue_end_of_stream(&mut self) -> GlcvResult<()> {
        let started = Instant::now();
        loop {
            if let Some(index) = self.codec.dequeue_input_buffer(self.timeouts.dequeue)? {
                return self.queue(index, &[], self.last_pts_us);
            }
            if started.elapsed() >= self.timeouts.end_of_stream {
                tracing::warn!("No audio input slot freed for end of stream");
                return Ok(());
            }
            self.writer
                .drain(self.codec.as_mut(), false, self.timeouts)?;
        }
    }

    pub fn is_track_added(&self) -> bool {
        self.writer.is_track_added()
    }

    pub fn samples_written(&self) -> u64 {
        self.writer.samples_written()
    }

    pub fn chunks_dropped(&self) -> u64 {
        self.chunks_dropped
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.codec.stop() {
            tracing::warn!(error = %e, "Failed to stop audio encoder");
        }
    }
}

impl Drop for AudioEncoderCore {
    fn drop(&mut self) {
        self.release();
    }
}
