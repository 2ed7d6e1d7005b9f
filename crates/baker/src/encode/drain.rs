//! Output drain loop shared by the encoder cores: format change, codec
//! config, samples and end of stream.

use std::time::{Duration, Instant};

use glcv_codec::{BufferInfo, MediaCodec, OutputStatus, TrackKind};
use glcv_common::error::{GlcvError, GlcvResult};

use super::session::SharedMuxer;

/// Called once, right after an encoder's track reached the muxer.
pub type TrackAddedObserver = Box<dyn FnMut(TrackKind) -> GlcvResult<()>>;

/// Bounded waits applied to one encoder core.
#[derive(Debug, Clone, Copy)]
pub struct DrainTimeouts {
    pub dequeue: Duration,
    pub end_of_stream: Duration,
}

/// Moves encoder output into the muxer session for one track.
pub(crate) struct TrackWriter {
    kind: TrackKind,
    muxer: SharedMuxer,
    track: Option<usize>,
    observer: Option<TrackAddedObserver>,
    samples_written: u64,
    reached_eos: bool,
}

impl TrackWriter {
    pub fn new(kind: TrackKind, muxer: SharedMuxer, observer: Option<TrackAddedObserver>) -> Self {
        Self {
            kind,
            muxer,
            track: None,
            observer,
            samples_written: 0,
            reached_eos: false,
        }
    }

    pub fn is_track_added(&self) -> bool {
        self.track.is_some()
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn reached_eos(&self) -> bool {
        self.reached_eos
    }

    /// Drain everything the codec has ready. With `end_of_stream`, keep
    /// waiting for the EOS buffer until `timeouts.end_of_stream` passes.
    pub fn drain(
        &mut self,
        codec: &mut dyn MediaCodec,
        end_of_stream: bool,
        timeouts: DrainTimeouts,
    ) -> GlcvResult<()> {
        if self.reached_eos {
            return Ok(());
        }
        let started = Instant::now();
        loop {
            match codec.dequeue_output_buffer(timeouts.dequeue)? {
                OutputStatus::TryAgainLater => {
                    if !end_of_stream {
                        return Ok(());
                    }
                    if started.elapsed() >= timeouts.end_of_stream {
                        tracing::warn!(
                            kind = %self.kind,
                            "Encoder did not reach end of stream within {:?}",
                            timeouts.end_of_stream
                        );
                        return Ok(());
                    }
                }
                OutputStatus::FormatChanged(format) => {
                    if self.track.is_some() {
                        return Err(GlcvError::protocol(format!(
                            "{} encoder format changed twice",
                            self.kind
                        )));
                    }
                    let track = self.muxer.borrow_mut().add_track(self.kind, &format)?;
                    self.track = Some(track);
                    if let Some(mut observer) = self.observer.take() {
                        observer(self.kind)?;
                    }
                }
                OutputStatus::Buffer { index, info } => {
                    let size = if info.flags.is_codec_config() {
                        tracing::trace!(kind = %self.kind, "Ignoring codec config buffer");
                        0
                    } else {
                        info.size
                    };
                    if size != 0 {
                        let Some(track) = self.track else {
                            return Err(GlcvError::protocol(format!(
                                "{} encoder wrote sample before track added",
                                self.kind
                            )));
                        };
                        let data = codec.output_buffer(index)?;
                        let info = BufferInfo { size, ..info };
                        self.muxer.borrow_mut().write_sample(track, data, &info)?;
                        self.samples_written += 1;
                    }
                    codec.release_output_buffer(index, false)?;
                    if info.flags.is_end_of_stream() {
                        tracing::debug!(
                            kind = %self.kind,
                            samples = self.samples_written,
                            "Encoder reached end of stream"
                        );
                        self.reached_eos = true;
                        return Ok(());
                    }
                }
            }
        }
    }
}
