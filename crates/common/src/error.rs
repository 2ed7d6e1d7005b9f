//! Error types shared across glcv crates.

use std::path::PathBuf;

/// Top-level error type for glcv operations.
///
/// The variants follow the failure taxonomy of the bake pipeline:
/// `Setup` and `Protocol` abort a bake, everything transient is handled
/// inside the pipeline and never surfaces here.
#[derive(Debug, thiserror::Error)]
pub enum GlcvError {
    /// Encoder/decoder configuration failure, missing video track,
    /// size limit violation.
    #[error("Setup error: {message}")]
    Setup { message: String },

    /// An invariant of the codec/muxer protocol was violated.
    #[error("Protocol violation: {message}")]
    Protocol { message: String },

    #[error("Codec error: {message}")]
    Codec { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Timeline error: {message}")]
    Timeline { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using GlcvError.
pub type GlcvResult<T> = Result<T, GlcvError>;

impl GlcvError {
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup {
            message: msg.into(),
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol {
            message: msg.into(),
        }
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn timeline(msg: impl Into<String>) -> Self {
        Self::Timeline {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Whether this error aborts a bake before the first frame.
    pub fn is_setup(&self) -> bool {
        matches!(self, Self::Setup { .. } | Self::FileNotFound { .. })
    }

    /// Whether this error reports a pipeline invariant violation.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(GlcvError::setup("no video track").is_setup());
        assert!(GlcvError::FileNotFound {
            path: PathBuf::from("/missing.mp4")
        }
        .is_setup());
        assert!(GlcvError::protocol("format changed twice").is_protocol());
        assert!(!GlcvError::codec("busy").is_setup());
    }

    #[test]
    fn test_error_display() {
        let err = GlcvError::protocol("wrote sample before track added");
        assert_eq!(
            err.to_string(),
            "Protocol violation: wrote sample before track added"
        );
    }
}
