//! glcv Common Utilities
//!
//! Shared infrastructure for all glcv crates:
//! - Error types and result aliases
//! - Presentation clock and session timing for the bake loop
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
