//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default bake settings.
    pub bake: BakeDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default bake parameters, overridable per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeDefaults {
    /// Length of the shorter output side in pixels.
    pub min_side_px: u32,

    /// Output frame rate.
    pub fps: u32,

    /// Key-frame interval in seconds.
    pub i_frame_interval_secs: u32,

    /// Target video bitrate (bits/s).
    pub bit_rate: u32,

    /// Audio encoder settings.
    pub audio: AudioDefaults,

    /// Bounded wait for every codec dequeue call (ms).
    pub dequeue_timeout_ms: u64,

    /// Upper bound for the final end-of-stream drain (ms).
    pub eos_drain_deadline_ms: u64,

    /// Feed/drain steps a decoder may take before its first format change.
    pub decoder_warmup_attempts: u32,

    /// Codec backend name ("gst" or "software").
    pub backend: String,
}

/// Audio encoder parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioDefaults {
    pub sample_rate: u32,
    pub channels: u32,
    pub bit_rate: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "glcv_baker=trace,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for BakeDefaults {
    fn default() -> Self {
        Self {
            min_side_px: 1080,
            fps: 30,
            i_frame_interval_secs: 5,
            bit_rate: 4_000_000,
            audio: AudioDefaults::default(),
            dequeue_timeout_ms: 10,
            eos_drain_deadline_ms: 10_000,
            decoder_warmup_attempts: 500,
            backend: "gst".to_string(),
        }
    }
}

impl Default for AudioDefaults {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            bit_rate: 64 * 1024,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("glcv").join("config.json")
}
