//! GStreamer backend.
//!
//! Every codec is a small `appsrc ! ... ! appsink` pipeline driven
//! synchronously from the bake thread. Extraction demuxes through
//! `qtdemux` into per-track app sinks and muxing feeds one `appsrc` per
//! track into `mp4mux`.

mod codec;
mod extractor;
mod muxer;

use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use glcv_common::error::{GlcvError, GlcvResult};
use gst::prelude::*;
use gstreamer as gst;

use crate::backend::CodecBackend;
use crate::buffer::FrameSlot;
use crate::codec::MediaCodec;
use crate::extractor::MediaExtractor;
use crate::format::{MediaFormat, TrackKind, MIME_AUDIO_AAC, MIME_VIDEO_AVC};
use crate::muxer::MediaMuxer;

pub use codec::GstCodec;
pub use extractor::GstExtractor;
pub use muxer::GstMuxer;

const REQUIRED_ELEMENTS: &[&str] = &[
    "appsrc",
    "appsink",
    "videoconvert",
    "x264enc",
    "h264parse",
    "avenc_aac",
    "aacparse",
    "decodebin",
    "qtdemux",
    "mp4mux",
    "filesink",
];

pub struct GstBackend {
    max_surface_size: u32,
}

impl GstBackend {
    pub fn new() -> GlcvResult<Self> {
        init_gstreamer()?;
        Ok(Self {
            max_surface_size: 4096,
        })
    }

    /// Elements this backend needs that the registry does not provide.
    pub fn missing_elements() -> Vec<&'static str> {
        REQUIRED_ELEMENTS
            .iter()
            .copied()
            .filter(|name| gst::ElementFactory::find(name).is_none())
            .collect()
    }
}

impl CodecBackend for GstBackend {
    fn name(&self) -> &str {
        "gst"
    }

    fn is_available(&self) -> bool {
        let missing = Self::missing_elements();
        if !missing.is_empty() {
            tracing::warn!(?missing, "GStreamer elements missing");
        }
        missing.is_empty()
    }

    fn max_surface_size(&self) -> u32 {
        self.max_surface_size
    }

    fn create_encoder(&self, format: &MediaFormat) -> GlcvResult<Box<dyn MediaCodec>> {
        match format.track_kind() {
            Some(TrackKind::Video) => {
                let (w, h) = (format.width.unwrap_or(0), format.height.unwrap_or(0));
                if w == 0 || h == 0 || w > self.max_surface_size || h > self.max_surface_size {
                    return Err(GlcvError::setup(format!(
                        "Encoder surface {w}x{h} outside 1..={}",
                        self.max_surface_size
                    )));
                }
                Ok(Box::new(GstCodec::video_encoder(format)?))
            }
            Some(TrackKind::Audio) => Ok(Box::new(GstCodec::audio_encoder(format)?)),
            None => Err(GlcvError::setup(format!(
                "Unsupported mime type: {}",
                format.mime
            ))),
        }
    }

    fn create_decoder(
        &self,
        format: &MediaFormat,
        output: Option<FrameSlot>,
    ) -> GlcvResult<Box<dyn MediaCodec>> {
        match format.track_kind() {
            Some(TrackKind::Video) => Ok(Box::new(GstCodec::video_decoder(format, output)?)),
            Some(TrackKind::Audio) => Ok(Box::new(GstCodec::audio_decoder(format)?)),
            None => Err(GlcvError::setup(format!(
                "Unsupported mime type: {}",
                format.mime
            ))),
        }
    }

    fn create_extractor(&self, path: &Path) -> GlcvResult<Box<dyn MediaExtractor>> {
        Ok(Box::new(GstExtractor::open(path)?))
    }

    fn create_muxer(&self, path: &Path) -> GlcvResult<Box<dyn MediaMuxer>> {
        Ok(Box::new(GstMuxer::new(path)?))
    }
}

fn init_gstreamer() -> GlcvResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(GlcvError::setup(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

fn escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('"', "\\\"")
}

fn launch_pipeline(launch: &str) -> GlcvResult<gst::Pipeline> {
    let element = gst::parse::launch(launch)
        .map_err(|e| GlcvError::setup(format!("Failed to build pipeline: {e}")))?;
    element
        .dynamic_cast::<gst::Pipeline>()
        .map_err(|_| GlcvError::setup("Launch string did not produce a pipeline"))
}

fn named<T: IsA<gst::Element>>(pipeline: &gst::Pipeline, name: &str) -> GlcvResult<T> {
    pipeline
        .by_name(name)
        .and_then(|e| e.dynamic_cast::<T>().ok())
        .ok_or_else(|| GlcvError::setup(format!("Pipeline has no element named {name}")))
}

fn set_state(pipeline: &gst::Pipeline, state: gst::State, what: &str) -> GlcvResult<()> {
    pipeline
        .set_state(state)
        .map(|_| ())
        .map_err(|e| GlcvError::codec(format!("Failed to set {what} to {state:?}: {e:?}")))
}

/// First error posted on the bus, if any.
fn bus_error(pipeline: &gst::Pipeline) -> Option<String> {
    let bus = pipeline.bus()?;
    let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
    match msg.view() {
        gst::MessageView::Error(e) => Some(format!("{} ({:?})", e.error(), e.debug())),
        _ => None,
    }
}

/// Block until EOS reaches the bus or `deadline` passes.
fn wait_for_eos(pipeline: &gst::Pipeline, name: &str, deadline: Duration) -> GlcvResult<()> {
    let Some(bus) = pipeline.bus() else {
        return Ok(());
    };
    let start = Instant::now();
    loop {
        let elapsed = start.elapsed();
        if elapsed >= deadline {
            tracing::warn!(pipeline = name, "EOS wait timed out after {:?}", deadline);
            return Ok(());
        }
        let remaining = gst::ClockTime::from_nseconds((deadline - elapsed).as_nanos() as u64);
        match bus.timed_pop(remaining) {
            Some(msg) => match msg.view() {
                gst::MessageView::Eos(_) => {
                    tracing::debug!(pipeline = name, "EOS received; pipeline drained");
                    return Ok(());
                }
                gst::MessageView::Error(e) => {
                    return Err(GlcvError::codec(format!(
                        "{name} pipeline error during EOS drain: {}",
                        e.error()
                    )));
                }
                _ => {}
            },
            None => {
                tracing::warn!(pipeline = name, "EOS wait timed out after {:?}", deadline);
                return Ok(());
            }
        }
    }
}

/// Caps an `appsrc` announces for compressed samples of `format`.
fn compressed_caps(format: &MediaFormat) -> GlcvResult<gst::Caps> {
    let codec_data = (!format.codec_data.is_empty())
        .then(|| gst::Buffer::from_slice(format.codec_data.clone()));

    let caps = match format.mime.as_str() {
        MIME_VIDEO_AVC => {
            let mut builder = gst::Caps::builder("video/x-h264")
                .field("stream-format", "avc")
                .field("alignment", "au")
                .field("width", format.width.unwrap_or(0) as i32)
                .field("height", format.height.unwrap_or(0) as i32);
            if let Some(fps) = format.frame_rate {
                builder = builder.field("framerate", gst::Fraction::new(fps as i32, 1));
            }
            if let Some(data) = codec_data {
                builder = builder.field("codec_data", data);
            }
            builder.build()
        }
        MIME_AUDIO_AAC => {
            let mut builder = gst::Caps::builder("audio/mpeg")
                .field("mpegversion", 4i32)
                .field("stream-format", "raw")
                .field("rate", format.sample_rate.unwrap_or(44_100) as i32)
                .field("channels", format.channel_count.unwrap_or(2) as i32);
            if let Some(data) = codec_data {
                builder = builder.field("codec_data", data);
            }
            builder.build()
        }
        other => {
            return Err(GlcvError::setup(format!(
                "No GStreamer caps for mime type {other}"
            )))
        }
    };
    Ok(caps)
}

/// Track format described by negotiated caps.
fn format_from_caps(caps: &gst::CapsRef) -> Option<MediaFormat> {
    let s = caps.structure(0)?;
    let name = s.name().as_str();
    let codec_data = s
        .get::<gst::Buffer>("codec_data")
        .ok()
        .and_then(|b| b.map_readable().ok().map(|m| m.as_slice().to_vec()))
        .unwrap_or_default();

    let mut format = if name.starts_with("video/") {
        let mime = match name {
            "video/x-h264" => MIME_VIDEO_AVC.to_string(),
            "video/x-raw" => crate::format::MIME_VIDEO_RAW.to_string(),
            other => other.to_string(),
        };
        let mut format = MediaFormat::video(
            mime,
            s.get::<i32>("width").unwrap_or(0).max(0) as u32,
            s.get::<i32>("height").unwrap_or(0).max(0) as u32,
        );
        if let Ok(fps) = s.get::<gst::Fraction>("framerate") {
            if fps.denom() > 0 && fps.numer() > 0 {
                format.frame_rate = Some((fps.numer() as f64 / fps.denom() as f64).round() as u32);
            }
        }
        format
    } else if name.starts_with("audio/") {
        let mime = match name {
            "audio/mpeg" => MIME_AUDIO_AAC.to_string(),
            "audio/x-raw" => crate::format::MIME_AUDIO_RAW.to_string(),
            other => other.to_string(),
        };
        MediaFormat::audio(
            mime,
            s.get::<i32>("rate").unwrap_or(44_100).max(1) as u32,
            s.get::<i32>("channels").unwrap_or(2).max(1) as u32,
        )
    } else {
        return None;
    };
    format.codec_data = codec_data;
    Some(format)
}

fn clock_time_us(time: Option<gst::ClockTime>) -> i64 {
    time.map(|t| t.useconds() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_path_quotes() {
        assert_eq!(escape_path(Path::new("a\"b.mp4")), "a\\\"b.mp4");
    }

    #[test]
    fn test_caps_round_trip_keeps_dimensions() {
        if init_gstreamer().is_err() {
            return;
        }
        let format = MediaFormat::video(MIME_VIDEO_AVC, 640, 360)
            .with_frame_rate(30)
            .with_codec_data(vec![1, 2, 3]);
        let caps = compressed_caps(&format).unwrap();
        let back = format_from_caps(&caps).unwrap();
        assert_eq!(back.mime, MIME_VIDEO_AVC);
        assert_eq!((back.width, back.height), (Some(640), Some(360)));
        assert_eq!(back.frame_rate, Some(30));
        assert_eq!(back.codec_data, vec![1, 2, 3]);
    }
}
