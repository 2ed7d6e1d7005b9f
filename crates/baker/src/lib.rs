//! glcv Baker
//!
//! Turns a frozen timeline [`Template`](glcv_timeline::Template) into an
//! MP4 file, frame by frame, on a dedicated thread:
//! - **Decode:** passive decoders advance one frame per presentation tick
//! - **Compose:** visible units are drawn into the output surface by z-order
//! - **Encode:** video and audio encoder cores feed one shared muxer
//! - **Drive:** the [`Baker`] clock, progress reporting, and cancellation

pub mod baker;
pub mod compositor;
pub mod decode;
pub mod encode;
pub mod ipc;
pub mod mute;
pub mod probe;
pub mod progress;
pub mod request;

pub use baker::{BakeCanceller, BakeHandle, BakeReport, Baker, Cancellable};
pub use compositor::Compositor;
pub use decode::{DecoderPool, DecoderSettings, PassiveDecoder, SpeedController};
pub use encode::{
    AudioBufferHandle, AudioBufferProvider, AudioEncoderCore, AudioProcessor, Recorder,
    RecorderStats, VideoEncoderCore,
};
pub use ipc::{EventWriter, WorkerCommand, WorkerEvent};
pub use mute::MuteCalculator;
pub use progress::{
    BakeProgress, BroadcastPublisher, CallbackPublisher, EncodeTarget, NullPublisher,
    ProgressPublisher,
};
pub use request::{AudioSettings, BakeRequest, EncoderConfig};
