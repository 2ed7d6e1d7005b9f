use std::path::{Path, PathBuf};
use std::time::Duration;

use glcv_common::error::{GlcvError, GlcvResult};
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;

use super::{compressed_caps, escape_path, launch_pipeline, named, set_state, wait_for_eos};
use crate::buffer::BufferInfo;
use crate::format::MediaFormat;
use crate::muxer::MediaMuxer;

const EOS_DEADLINE: Duration = Duration::from_secs(10);

/// MP4 writer: one `appsrc` per track into `mp4mux ! filesink`.
pub struct GstMuxer {
    path: PathBuf,
    pipeline: gst::Pipeline,
    mux: gst::Element,
    sources: Vec<gst_app::AppSrc>,
    started: bool,
    stopped: bool,
}

impl GstMuxer {
    pub fn new(path: &Path) -> GlcvResult<Self> {
        super::init_gstreamer()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let launch = format!(
            "mp4mux name=mux faststart=true ! filesink location=\"{}\"",
            escape_path(path)
        );
        let pipeline = launch_pipeline(&launch)?;
        let mux = named::<gst::Element>(&pipeline, "mux")?;
        Ok(Self {
            path: path.to_path_buf(),
            pipeline,
            mux,
            sources: Vec::new(),
            started: false,
            stopped: false,
        })
    }
}

impl MediaMuxer for GstMuxer {
    fn add_track(&mut self, format: &MediaFormat) -> GlcvResult<usize> {
        if self.started {
            return Err(GlcvError::protocol("add_track after muxer start"));
        }
        let index = self.sources.len();
        let appsrc = gst_app::AppSrc::builder()
            .name(format!("track{index}"))
            .caps(&compressed_caps(format)?)
            .format(gst::Format::Time)
            .build();
        self.pipeline
            .add(&appsrc)
            .map_err(|e| GlcvError::setup(format!("Failed to add track source: {e}")))?;
        appsrc
            .link(&self.mux)
            .map_err(|e| GlcvError::setup(format!("Failed to link {} track: {e}", format.mime)))?;
        self.sources.push(appsrc);
        Ok(index)
    }

    fn start(&mut self) -> GlcvResult<()> {
        if self.started {
            return Err(GlcvError::protocol("Muxer started twice"));
        }
        if self.sources.is_empty() {
            return Err(GlcvError::protocol("Muxer started without tracks"));
        }
        set_state(&self.pipeline, gst::State::Playing, "muxer")?;
        self.started = true;
        tracing::debug!(path = %self.path.display(), tracks = self.sources.len(), "Muxer started");
        Ok(())
    }

    fn write_sample_data(
        &mut self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> GlcvResult<()> {
        if !self.started || self.stopped {
            return Err(GlcvError::protocol("Sample written outside start/stop"));
        }
        let source = self
            .sources
            .get(track)
            .ok_or_else(|| GlcvError::protocol(format!("No muxer track {track}")))?;
        let range = info.payload_range(data.len())?;
        if range.is_empty() {
            return Ok(());
        }

        let mut buffer = gst::Buffer::from_slice(data[range].to_vec());
        {
            let buffer_ref = buffer.make_mut();
            let pts = gst::ClockTime::from_useconds(info.presentation_time_us.max(0) as u64);
            buffer_ref.set_pts(pts);
            buffer_ref.set_dts(pts);
            if !info.flags.is_key_frame() {
                buffer_ref.set_flags(gst::BufferFlags::DELTA_UNIT);
            }
        }
        source
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| GlcvError::codec(format!("Muxer rejected sample: {e:?}")))
    }

    fn stop(&mut self) -> GlcvResult<()> {
        if !self.started || self.stopped {
            return Err(GlcvError::protocol("Muxer stopped while not running"));
        }
        self.stopped = true;
        for source in &self.sources {
            if let Err(e) = source.end_of_stream() {
                tracing::warn!(error = ?e, "Failed to end muxer track; output may be truncated");
            }
        }
        let drained = wait_for_eos(&self.pipeline, "muxer", EOS_DEADLINE);
        set_state(&self.pipeline, gst::State::Null, "muxer")?;
        drained
    }

    fn release(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

impl Drop for GstMuxer {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
