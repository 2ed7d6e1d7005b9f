//! glcv Timeline Model
//!
//! Defines the data a bake consumes:
//! - **Units:** placed media sources with timing and transform
//! - **Template:** the frozen snapshot of a timeline handed to a bake
//! - **TimeMask:** which units are visible at a given timestamp
//! - **Layout:** output resolution and viewport fitting
//! - **Media:** source kinds and probed metadata

pub mod layout;
pub mod media;
pub mod template;
pub mod time_mask;
pub mod unit;

pub use layout::*;
pub use media::*;
pub use template::*;
pub use time_mask::*;
pub use unit::*;
