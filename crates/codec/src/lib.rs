//! glcv Codec Layer
//!
//! A small, MediaCodec-shaped contract between the bake pipeline and
//! whatever actually encodes, decodes, demuxes and muxes media:
//! - [`MediaCodec`]: bounded-wait input/output buffer queues
//! - [`InputSurface`]: render target feeding a video encoder
//! - [`MediaExtractor`] / [`MediaMuxer`]: container in and out
//! - [`CodecBackend`]: factory tying the above to one implementation
//!
//! Two backends ship with the crate: [`software`], deterministic and
//! in-memory, and [`gst`] (feature `gst`), built on GStreamer.

pub mod backend;
pub mod buffer;
pub mod codec;
pub mod extractor;
pub mod format;
pub mod muxer;
pub mod software;

#[cfg(feature = "gst")]
pub mod gst;

pub use backend::*;
pub use buffer::*;
pub use codec::*;
pub use extractor::*;
pub use format::*;
pub use muxer::*;
