//! Codec contract shared by encoders and decoders.

use std::time::Duration;

use glcv_common::error::{GlcvError, GlcvResult};

use crate::buffer::{BufferFlags, BufferInfo};
use crate::format::MediaFormat;

/// Result of one output dequeue attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputStatus {
    /// Nothing ready within the timeout. Not an error.
    TryAgainLater,
    /// The codec's output format is now known.
    FormatChanged(MediaFormat),
    /// A filled output buffer. Hand it back with
    /// [`MediaCodec::release_output_buffer`].
    Buffer { index: usize, info: BufferInfo },
}

/// A codec with bounded-wait input and output buffer queues.
///
/// Codecs are owned by exactly one thread and are not required to be
/// `Send`. Every dequeue call blocks for at most `timeout`.
pub trait MediaCodec {
    /// Codec name, for logging.
    fn name(&self) -> &str;

    /// Transition from configured to running.
    fn start(&mut self) -> GlcvResult<()>;

    /// Surface a video encoder reads its frames from. Must be called
    /// before [`start`](Self::start).
    fn create_input_surface(&mut self) -> GlcvResult<Box<dyn InputSurface>> {
        Err(GlcvError::unsupported(format!(
            "{} does not accept surface input",
            self.name()
        )))
    }

    /// Reserve an input slot. `Ok(None)` means none freed up in time.
    fn dequeue_input_buffer(&mut self, timeout: Duration) -> GlcvResult<Option<usize>>;

    /// Writable storage of a reserved input slot.
    fn input_buffer(&mut self, index: usize) -> GlcvResult<&mut Vec<u8>>;

    /// Submit `size` bytes of a reserved input slot.
    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> GlcvResult<()>;

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> GlcvResult<OutputStatus>;

    /// Contents of a dequeued output buffer.
    fn output_buffer(&self, index: usize) -> GlcvResult<&[u8]>;

    /// Return an output buffer. With `render` set, a decoder bound to an
    /// output surface presents the frame there first.
    fn release_output_buffer(&mut self, index: usize, render: bool) -> GlcvResult<()>;

    /// Mark the end of surface input.
    fn signal_end_of_input_stream(&mut self) -> GlcvResult<()>;

    fn stop(&mut self) -> GlcvResult<()>;
}

/// Render target bound to a video encoder.
pub trait InputSurface {
    /// Surface size in pixels.
    fn size(&self) -> (u32, u32);

    /// Submit one RGBA frame stamped with `presentation_time_ns`.
    fn swap_buffers(&mut self, rgba: &[u8], presentation_time_ns: i64) -> GlcvResult<()>;

    fn release(&mut self);
}
