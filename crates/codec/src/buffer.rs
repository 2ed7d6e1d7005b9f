//! Sample metadata and decoded frame storage.

use std::cell::{Cell, RefCell};
use std::ops::BitOr;
use std::rc::Rc;

use glcv_common::error::{GlcvError, GlcvResult};
use serde::{Deserialize, Serialize};

/// Per-buffer flags reported by codecs and extractors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: Self = Self(0);
    pub const KEY_FRAME: Self = Self(1);
    pub const CODEC_CONFIG: Self = Self(1 << 1);
    pub const END_OF_STREAM: Self = Self(1 << 2);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn is_key_frame(self) -> bool {
        self.contains(Self::KEY_FRAME)
    }

    pub fn is_codec_config(self) -> bool {
        self.contains(Self::CODEC_CONFIG)
    }

    pub fn is_end_of_stream(self) -> bool {
        self.contains(Self::END_OF_STREAM)
    }
}

impl BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Describes one sample inside a codec buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferInfo {
    /// Start of the payload within the buffer.
    pub offset: usize,
    /// Payload length in bytes.
    pub size: usize,
    /// Presentation timestamp (µs).
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

impl BufferInfo {
    pub fn new(offset: usize, size: usize, presentation_time_us: i64, flags: BufferFlags) -> Self {
        Self {
            offset,
            size,
            presentation_time_us,
            flags,
        }
    }

    /// Empty buffer marking the end of a stream.
    pub fn end_of_stream(presentation_time_us: i64) -> Self {
        Self::new(0, 0, presentation_time_us, BufferFlags::END_OF_STREAM)
    }

    /// Byte range of the payload within a buffer of `len` bytes.
    pub fn payload_range(&self, len: usize) -> GlcvResult<std::ops::Range<usize>> {
        let end = self.offset.checked_add(self.size).filter(|end| *end <= len);
        match end {
            Some(end) => Ok(self.offset..end),
            None => Err(GlcvError::protocol(format!(
                "Buffer range {}+{} exceeds buffer of {len} bytes",
                self.offset, self.size
            ))),
        }
    }
}

/// A decoded RGBA8 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub pts_us: i64,
    /// Tightly packed RGBA rows.
    pub data: Vec<u8>,
}

impl VideoFrame {
    pub fn from_rgba(width: u32, height: u32, pts_us: i64, data: Vec<u8>) -> GlcvResult<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(GlcvError::codec(format!(
                "RGBA frame {width}x{height} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pts_us,
            data,
        })
    }

    /// RGBA value at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ])
    }
}

/// Output surface of a video decoder.
///
/// Holds the most recently rendered frame. Cloning shares the slot; the
/// decoder posts into it, the compositor samples it. Both live on the bake
/// thread, so the slot is a plain `Rc<RefCell<_>>`.
#[derive(Debug, Clone, Default)]
pub struct FrameSlot {
    inner: Rc<SlotInner>,
}

#[derive(Debug, Default)]
struct SlotInner {
    frame: RefCell<Option<VideoFrame>>,
    posted: Cell<u64>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame.
    pub fn post(&self, frame: VideoFrame) {
        *self.inner.frame.borrow_mut() = Some(frame);
        self.inner.posted.set(self.inner.posted.get() + 1);
    }

    pub fn has_frame(&self) -> bool {
        self.inner.frame.borrow().is_some()
    }

    /// Run `f` against the current frame, if any.
    pub fn with_frame<R>(&self, f: impl FnOnce(&VideoFrame) -> R) -> Option<R> {
        self.inner.frame.borrow().as_ref().map(f)
    }

    pub fn clear(&self) {
        self.inner.frame.borrow_mut().take();
    }

    /// Number of frames posted since creation.
    pub fn frames_posted(&self) -> u64 {
        self.inner.posted.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_flags_combine() {
        let flags = BufferFlags::KEY_FRAME | BufferFlags::END_OF_STREAM;
        assert!(flags.is_key_frame());
        assert!(flags.is_end_of_stream());
        assert!(!flags.is_codec_config());
        assert!(!BufferFlags::NONE.is_end_of_stream());
    }

    #[test]
    fn test_payload_range_checks_bounds() {
        let info = BufferInfo::new(2, 4, 0, BufferFlags::NONE);
        assert_eq!(info.payload_range(6).unwrap(), 2..6);
        assert!(info.payload_range(5).is_err());
    }

    #[test]
    fn test_frame_size_is_checked() {
        assert!(VideoFrame::from_rgba(2, 2, 0, vec![0; 16]).is_ok());
        assert!(VideoFrame::from_rgba(2, 2, 0, vec![0; 15]).is_err());
    }

    #[test]
    fn test_frame_slot_shares_frames() {
        let slot = FrameSlot::new();
        let consumer = slot.clone();
        assert!(!consumer.has_frame());

        slot.post(VideoFrame::from_rgba(1, 1, 42, vec![1, 2, 3, 4]).unwrap());
        assert_eq!(consumer.with_frame(|f| f.pts_us), Some(42));
        assert_eq!(consumer.frames_posted(), 1);

        consumer.clear();
        assert!(!slot.has_frame());
    }

    proptest! {
        #[test]
        fn payload_range_is_inside_buffer(offset in 0usize..4096, size in 0usize..4096, len in 0usize..8192) {
            let info = BufferInfo::new(offset, size, 0, BufferFlags::NONE);
            match info.payload_range(len) {
                Ok(range) => {
                    prop_assert_eq!(range.start, offset);
                    prop_assert_eq!(range.len(), size);
                    prop_assert!(range.end <= len);
                }
                Err(e) => {
                    prop_assert!(e.is_protocol());
                    prop_assert!(offset + size > len);
                }
            }
        }

        #[test]
        fn payload_range_never_overflows(offset in any::<usize>(), size in any::<usize>()) {
            let info = BufferInfo::new(offset, size, 0, BufferFlags::NONE);
            if offset.checked_add(size).is_none() {
                prop_assert!(info.payload_range(usize::MAX).is_err());
            }
        }
    }
}
