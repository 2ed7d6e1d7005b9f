//! Clock and timing utilities for the bake loop.
//!
//! The bake never looks at wall time to decide what to render. Every frame
//! timestamp comes from a [`PresentationClock`] that advances one frame per
//! tick; [`SessionClock`] only measures how long the bake took.

use std::time::Instant;

pub const NANOS_PER_SEC: i64 = 1_000_000_000;
pub const NANOS_PER_MILLI: i64 = 1_000_000;
pub const NANOS_PER_MICRO: i64 = 1_000;

/// Longest timeline whose nanosecond timestamps fit an `i64`.
pub const MAX_TIMELINE_MS: u64 = (i64::MAX / NANOS_PER_MILLI) as u64;

/// Frame-indexed presentation clock.
///
/// The clock starts one frame before zero so the first [`tick`](Self::tick)
/// lands on exactly `0`. Timestamps are derived from the frame index
/// (`index * 1e9 / fps`) rather than accumulated, so no rounding error
/// builds up over long timelines.
#[derive(Debug, Clone)]
pub struct PresentationClock {
    fps: u32,
    frame_index: i64,
}

impl PresentationClock {
    /// Create a clock seeded one frame before zero.
    pub fn new(fps: u32) -> Self {
        Self {
            fps: fps.max(1),
            frame_index: -1,
        }
    }

    /// Advance by one frame and return the new timestamp in nanoseconds.
    pub fn tick(&mut self) -> i64 {
        self.frame_index += 1;
        self.pts_ns()
    }

    /// Current timestamp in nanoseconds.
    pub fn pts_ns(&self) -> i64 {
        (self.frame_index as i128 * NANOS_PER_SEC as i128 / self.fps as i128) as i64
    }

    /// Current timestamp in microseconds.
    pub fn pts_us(&self) -> i64 {
        self.pts_ns() / NANOS_PER_MICRO
    }

    /// Current timestamp in milliseconds.
    pub fn pts_ms(&self) -> i64 {
        self.pts_ns() / NANOS_PER_MILLI
    }

    /// Index of the current frame (-1 before the first tick).
    pub fn frame_index(&self) -> i64 {
        self.frame_index
    }

    /// Nominal frame duration in nanoseconds.
    pub fn frame_duration_ns(&self) -> i64 {
        NANOS_PER_SEC / self.fps as i64
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }
}

/// Wall-clock measurement of a bake session.
#[derive(Debug, Clone)]
pub struct SessionClock {
    /// The instant the session started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,
}

impl SessionClock {
    /// Create a session clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Seconds elapsed since the session started.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at session start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }
}

/// Convert milliseconds to nanoseconds, `None` past [`MAX_TIMELINE_MS`].
pub fn ms_to_ns(ms: u64) -> Option<i64> {
    i64::try_from(ms).ok()?.checked_mul(NANOS_PER_MILLI)
}

/// Convert milliseconds to microseconds, `None` on overflow.
pub fn ms_to_us(ms: u64) -> Option<i64> {
    i64::try_from(ms).ok()?.checked_mul(1_000)
}

/// Convert nanoseconds to microseconds.
pub fn ns_to_us(ns: i64) -> i64 {
    ns / NANOS_PER_MICRO
}
