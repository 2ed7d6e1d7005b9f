//! Demuxer contract.

use glcv_common::error::GlcvResult;

use crate::buffer::BufferFlags;
use crate::format::{MediaFormat, TrackKind};

/// One compressed sample read from a container.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub data: Vec<u8>,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

/// Reads compressed samples of one selected track.
pub trait MediaExtractor {
    fn track_count(&self) -> usize;

    fn track_format(&self, index: usize) -> GlcvResult<MediaFormat>;

    fn select_track(&mut self, index: usize) -> GlcvResult<()>;

    /// Reposition to the first sample at or after `time_us`.
    fn seek_to(&mut self, time_us: i64) -> GlcvResult<()>;

    /// Next sample of the selected track, `None` once exhausted.
    fn read_sample(&mut self) -> GlcvResult<Option<Sample>>;

    fn release(&mut self);
}

/// First track of the given kind, with its format.
pub fn find_track(
    extractor: &dyn MediaExtractor,
    kind: TrackKind,
) -> GlcvResult<Option<(usize, MediaFormat)>> {
    for index in 0..extractor.track_count() {
        let format = extractor.track_format(index)?;
        if format.track_kind() == Some(kind) {
            return Ok(Some((index, format)));
        }
    }
    Ok(None)
}
