//! Decoding side of a bake.

mod passive;
mod pool;
mod speed;

pub use passive::{DecoderSettings, PassiveDecoder};
pub use pool::DecoderPool;
pub use speed::SpeedController;
