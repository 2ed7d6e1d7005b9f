//! Container writer contract.

use glcv_common::error::GlcvResult;

use crate::buffer::BufferInfo;
use crate::format::MediaFormat;

/// Writes encoded samples of one or more tracks into a container.
///
/// Tracks are added before [`start`](Self::start); samples are written
/// only between `start` and [`stop`](Self::stop).
pub trait MediaMuxer {
    /// Register a track, returning its index.
    fn add_track(&mut self, format: &MediaFormat) -> GlcvResult<usize>;

    fn start(&mut self) -> GlcvResult<()>;

    /// Write `data[info.offset..info.offset + info.size]` to `track`.
    fn write_sample_data(&mut self, track: usize, data: &[u8], info: &BufferInfo)
        -> GlcvResult<()>;

    /// Finalize the container.
    fn stop(&mut self) -> GlcvResult<()>;

    /// Drop any resources without finalizing.
    fn release(&mut self);
}
