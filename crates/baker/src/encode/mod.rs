//! Encoding side of a bake: encoder cores, the shared muxer session, the
//! audio mix point, and the recorder driving them per frame.

mod audio;
mod drain;
mod processor;
mod recorder;
mod session;
mod video;

pub use audio::AudioEncoderCore;
pub use drain::{DrainTimeouts, TrackAddedObserver};
pub use processor::{AudioBufferHandle, AudioBufferProvider, AudioProcessor};
pub use recorder::{Recorder, RecorderStats};
pub use session::{MuxerSession, SharedMuxer};
pub use video::VideoEncoderCore;

#[cfg(test)]
mod tests;
