//! Surface-fed video encoder writing into the shared muxer.

use glcv_codec::{CodecBackend, InputSurface, MediaCodec, MediaFormat, TrackKind, MIME_VIDEO_AVC};
use glcv_common::error::{GlcvError, GlcvResult};

use super::drain::{DrainTimeouts, TrackAddedObserver, TrackWriter};
use super::session::SharedMuxer;
use crate::request::EncoderConfig;

pub struct VideoEncoderCore {
    codec: Box<dyn MediaCodec>,
    surface: Box<dyn InputSurface>,
    writer: TrackWriter,
    timeouts: DrainTimeouts,
    eos_signaled: bool,
    released: bool,
}

impl VideoEncoderCore {
    /// Configure an H.264 encoder with its input surface and start it.
    pub fn new(
        backend: &dyn CodecBackend,
        config: &EncoderConfig,
        muxer: SharedMuxer,
        observer: Option<TrackAddedObserver>,
    ) -> GlcvResult<Self> {
        let format = MediaFormat::video(MIME_VIDEO_AVC, config.width, config.height)
            .with_bit_rate(config.bit_rate)
            .with_frame_rate(config.fps)
            .with_i_frame_interval(config.i_frame_interval_secs);

        let mut codec = backend.create_encoder(&format).map_err(as_setup)?;
        let mut surface = match codec.create_input_surface() {
            Ok(surface) => surface,
            Err(e) => {
                let _ = codec.stop();
                return Err(as_setup(e));
            }
        };
        if let Err(e) = codec.start() {
            surface.release();
            let _ = codec.stop();
            return Err(as_setup(e));
        }
        tracing::debug!(
            codec = codec.name(),
            width = config.width,
            height = config.height,
            fps = config.fps,
            bit_rate = config.bit_rate,
            "Video encoder started"
        );

        Ok(Self {
            codec,
            surface,
            writer: TrackWriter::new(TrackKind::Video, muxer, observer),
            timeouts: config.timeouts(),
            eos_signaled: false,
            released: false,
        })
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.surface.size()
    }

    /// Submit one composited frame.
    pub fn render(&mut self, rgba: &[u8], pts_ns: i64) -> GlcvResult<()> {
        if self.released || self.eos_signaled {
            return Err(GlcvError::protocol("Frame rendered after video input ended"));
        }
        self.surface.swap_buffers(rgba, pts_ns)
    }

    pub fn drain(&mut self, end_of_stream: bool) -> GlcvResult<()> {
        if self.released {
            return Err(GlcvError::protocol("Drain on a released video encoder"));
        }
        if end_of_stream && !self.eos_signaled {
            self.codec.signal_end_of_input_stream()?;
            self.eos_signaled = true;
        }
        self.writer
            .drain(self.codec.as_mut(), end_of_stream, self.timeouts)
    }

    pub fn is_track_added(&self) -> bool {
        self.writer.is_track_added()
    }

    pub fn samples_written(&self) -> u64 {
        self.writer.samples_written()
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.surface.release();
        if let Err(e) = self.codec.stop() {
            tracing::warn!(error = %e, "Failed to stop video encoder");
        }
    }
}

impl Drop for VideoEncoderCore {
    fn drop(&mut self) {
        self.release();
    }
}

fn as_setup(e: GlcvError) -> GlcvError {
    if e.is_setup() {
        e
    } else {
        GlcvError::setup(format!("Video encoder configuration failed: {e}"))
    }
}
