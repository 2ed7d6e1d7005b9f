use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use glcv_common::error::{GlcvError, GlcvResult};
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;

use super::{clock_time_us, format_from_caps, set_state};
use crate::buffer::BufferFlags;
use crate::extractor::{MediaExtractor, Sample};
use crate::format::MediaFormat;

const PREROLL_TIMEOUT_SECS: u64 = 10;
const PULL_TIMEOUT_SECS: u64 = 5;

struct Track {
    format: MediaFormat,
    sink: gst_app::AppSink,
}

/// Demuxes an MP4/MOV file into per-track app sinks.
///
/// Unselected tracks drop their samples so the demuxer never stalls on
/// them.
pub struct GstExtractor {
    pipeline: gst::Pipeline,
    tracks: Vec<Track>,
    selected: Option<usize>,
    playing: bool,
}

impl GstExtractor {
    pub fn open(path: &Path) -> GlcvResult<Self> {
        super::init_gstreamer()?;
        if !path.exists() {
            return Err(GlcvError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let pipeline = gst::Pipeline::new();
        let filesrc = gst::ElementFactory::make("filesrc")
            .property("location", path.to_string_lossy().to_string())
            .build()
            .map_err(|e| GlcvError::setup(format!("Failed to create filesrc: {e}")))?;
        let demux = gst::ElementFactory::make("qtdemux")
            .build()
            .map_err(|e| GlcvError::setup(format!("Failed to create qtdemux: {e}")))?;
        pipeline
            .add_many([&filesrc, &demux])
            .map_err(|e| GlcvError::setup(format!("Failed to add elements: {e}")))?;
        filesrc
            .link(&demux)
            .map_err(|e| GlcvError::setup(format!("Failed to link filesrc: {e}")))?;

        let sinks: Arc<Mutex<Vec<gst_app::AppSink>>> = Arc::default();
        let pipeline_weak = pipeline.downgrade();
        let sinks_cb = sinks.clone();
        demux.connect_pad_added(move |_, pad| {
            let Some(pipeline) = pipeline_weak.upgrade() else {
                return;
            };
            let sink = gst_app::AppSink::builder()
                .sync(false)
                .max_buffers(64)
                .build();
            if pipeline.add(&sink).is_err() || sink.sync_state_with_parent().is_err() {
                tracing::warn!(pad = %pad.name(), "Failed to attach track sink");
                return;
            }
            let Some(sink_pad) = sink.static_pad("sink") else {
                return;
            };
            if let Err(e) = pad.link(&sink_pad) {
                tracing::warn!(pad = %pad.name(), error = ?e, "Failed to link demuxer pad");
                return;
            }
            sinks_cb
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(sink);
        });

        set_state(&pipeline, gst::State::Paused, "extractor")?;
        let (result, _, _) = pipeline.state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS));
        if result.is_err() {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(GlcvError::setup(format!(
                "Could not demux {}",
                path.display()
            )));
        }

        let duration_us = pipeline
            .query_duration::<gst::ClockTime>()
            .map(|d| d.useconds() as i64);
        let sinks = std::mem::take(&mut *sinks.lock().unwrap_or_else(PoisonError::into_inner));
        let mut tracks = Vec::with_capacity(sinks.len());
        for sink in sinks {
            let caps = sink.static_pad("sink").and_then(|pad| pad.current_caps());
            let Some(mut format) = caps.as_deref().and_then(format_from_caps) else {
                continue;
            };
            format.duration_us = duration_us;
            tracks.push(Track { format, sink });
        }
        tracing::debug!(path = %path.display(), tracks = tracks.len(), "Opened media");

        Ok(Self {
            pipeline,
            tracks,
            selected: None,
            playing: false,
        })
    }

    fn selected(&self) -> GlcvResult<&Track> {
        self.selected
            .and_then(|i| self.tracks.get(i))
            .ok_or_else(|| GlcvError::codec("no track selected"))
    }
}

impl MediaExtractor for GstExtractor {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> GlcvResult<MediaFormat> {
        self.tracks
            .get(index)
            .map(|t| t.format.clone())
            .ok_or_else(|| GlcvError::codec(format!("No track {index}")))
    }

    fn select_track(&mut self, index: usize) -> GlcvResult<()> {
        if index >= self.tracks.len() {
            return Err(GlcvError::codec(format!("No track {index}")));
        }
        for (i, track) in self.tracks.iter().enumerate() {
            track.sink.set_drop(i != index);
            track.sink.set_max_buffers(if i == index { 64 } else { 1 });
        }
        self.selected = Some(index);
        Ok(())
    }

    fn seek_to(&mut self, time_us: i64) -> GlcvResult<()> {
        self.selected()?;
        let position = gst::ClockTime::from_useconds(time_us.max(0) as u64);
        self.pipeline
            .seek_simple(gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT, position)
            .map_err(|e| GlcvError::codec(format!("Seek to {time_us}us failed: {e}")))
    }

    fn read_sample(&mut self) -> GlcvResult<Option<Sample>> {
        if !self.playing {
            set_state(&self.pipeline, gst::State::Playing, "extractor")?;
            self.playing = true;
        }
        let track = self.selected()?;
        let Some(sample) = track
            .sink
            .try_pull_sample(gst::ClockTime::from_seconds(PULL_TIMEOUT_SECS))
        else {
            if track.sink.is_eos() {
                return Ok(None);
            }
            return Err(GlcvError::codec("Timed out reading a sample"));
        };
        let Some(buffer) = sample.buffer() else {
            return Ok(None);
        };
        let map = buffer
            .map_readable()
            .map_err(|e| GlcvError::codec(format!("Unreadable sample: {e}")))?;
        let flags = if buffer.flags().contains(gst::BufferFlags::DELTA_UNIT) {
            BufferFlags::NONE
        } else {
            BufferFlags::KEY_FRAME
        };
        Ok(Some(Sample {
            data: map.as_slice().to_vec(),
            presentation_time_us: clock_time_us(buffer.pts()),
            flags,
        }))
    }

    fn release(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
        self.playing = false;
    }
}

impl Drop for GstExtractor {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
