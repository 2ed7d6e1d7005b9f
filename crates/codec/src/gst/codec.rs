use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use glcv_common::error::{GlcvError, GlcvResult};
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;

use super::{bus_error, clock_time_us, compressed_caps, format_from_caps, launch_pipeline, named, set_state};
use crate::buffer::{BufferFlags, BufferInfo, FrameSlot, VideoFrame};
use crate::codec::{InputSurface, MediaCodec, OutputStatus};
use crate::format::MediaFormat;

const INPUT_SLOTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    VideoEncoder,
    AudioEncoder,
    VideoDecoder,
    AudioDecoder,
}

struct Output {
    data: Vec<u8>,
    pts_us: i64,
    width: u32,
    height: u32,
}

/// A codec backed by an `appsrc ! ... ! appsink` pipeline.
pub struct GstCodec {
    name: String,
    kind: Kind,
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    appsink: gst_app::AppSink,
    output_slot: Option<FrameSlot>,
    inputs: Vec<Vec<u8>>,
    free_inputs: VecDeque<usize>,
    pending: VecDeque<(Vec<u8>, BufferInfo, u32, u32)>,
    outputs: HashMap<usize, Output>,
    next_output: usize,
    format_emitted: bool,
    surface_created: bool,
    input_eos: bool,
    output_eos: bool,
    started: bool,
}

impl GstCodec {
    fn build(
        name: &str,
        kind: Kind,
        launch: &str,
        input_caps: gst::Caps,
        output_slot: Option<FrameSlot>,
    ) -> GlcvResult<Self> {
        super::init_gstreamer()?;
        let pipeline = launch_pipeline(launch)?;
        let appsrc: gst_app::AppSrc = named(&pipeline, "src")?;
        let appsink: gst_app::AppSink = named(&pipeline, "sink")?;
        appsrc.set_caps(Some(&input_caps));
        appsrc.set_format(gst::Format::Time);

        Ok(Self {
            name: name.to_string(),
            kind,
            pipeline,
            appsrc,
            appsink,
            output_slot,
            inputs: vec![Vec::new(); INPUT_SLOTS],
            free_inputs: (0..INPUT_SLOTS).collect(),
            pending: VecDeque::new(),
            outputs: HashMap::new(),
            next_output: 0,
            format_emitted: false,
            surface_created: false,
            input_eos: false,
            output_eos: false,
            started: false,
        })
    }

    pub fn video_encoder(format: &MediaFormat) -> GlcvResult<Self> {
        let fps = format.frame_rate.unwrap_or(30).max(1);
        let key_int = fps * format.i_frame_interval_secs.unwrap_or(1).max(1);
        let kbps = format.bit_rate.unwrap_or(4_000_000) / 1000;
        let launch = format!(
            "appsrc name=src ! videoconvert ! x264enc speed-preset=veryfast bitrate={kbps} key-int-max={key_int} ! h264parse ! video/x-h264,stream-format=avc,alignment=au ! appsink name=sink sync=false"
        );
        let caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGBA")
            .field("width", format.width.unwrap_or(0) as i32)
            .field("height", format.height.unwrap_or(0) as i32)
            .field("framerate", gst::Fraction::new(fps as i32, 1))
            .build();
        Self::build("gst-video-encoder", Kind::VideoEncoder, &launch, caps, None)
    }

    pub fn audio_encoder(format: &MediaFormat) -> GlcvResult<Self> {
        let bit_rate = format.bit_rate.unwrap_or(128_000);
        let launch = format!(
            "appsrc name=src ! audioconvert ! audioresample ! avenc_aac bitrate={bit_rate} ! aacparse ! audio/mpeg,mpegversion=4,stream-format=raw ! appsink name=sink sync=false"
        );
        Self::build(
            "gst-audio-encoder",
            Kind::AudioEncoder,
            &launch,
            pcm_caps(format),
            None,
        )
    }

    pub fn video_decoder(format: &MediaFormat, output: Option<FrameSlot>) -> GlcvResult<Self> {
        let launch = "appsrc name=src ! decodebin ! videoconvert ! video/x-raw,format=RGBA ! appsink name=sink sync=false";
        Self::build(
            "gst-video-decoder",
            Kind::VideoDecoder,
            launch,
            compressed_caps(format)?,
            output,
        )
    }

    pub fn audio_decoder(format: &MediaFormat) -> GlcvResult<Self> {
        let launch = format!(
            "appsrc name=src ! decodebin ! audioconvert ! audioresample ! audio/x-raw,format=S16LE,layout=interleaved,rate={},channels={} ! appsink name=sink sync=false",
            format.sample_rate.unwrap_or(44_100),
            format.channel_count.unwrap_or(2)
        );
        Self::build(
            "gst-audio-decoder",
            Kind::AudioDecoder,
            &launch,
            compressed_caps(format)?,
            None,
        )
    }

    fn is_encoder(&self) -> bool {
        matches!(self.kind, Kind::VideoEncoder | Kind::AudioEncoder)
    }

    fn ensure_started(&self) -> GlcvResult<()> {
        if self.started {
            Ok(())
        } else {
            Err(GlcvError::codec(format!("{} not started", self.name)))
        }
    }

    fn end_input(&mut self) -> GlcvResult<()> {
        if self.input_eos {
            return Ok(());
        }
        self.input_eos = true;
        self.appsrc
            .end_of_stream()
            .map(|_| ())
            .map_err(|e| GlcvError::codec(format!("{} failed to end input: {e:?}", self.name)))
    }

    /// Pull one sample from the sink into the pending queue.
    fn pull(&mut self, timeout: Duration) -> GlcvResult<()> {
        if let Some(error) = bus_error(&self.pipeline) {
            return Err(GlcvError::codec(format!("{}: {error}", self.name)));
        }
        let wait = gst::ClockTime::from_mseconds(timeout.as_millis() as u64);
        let Some(sample) = self.appsink.try_pull_sample(wait) else {
            if self.appsink.is_eos() && !self.output_eos {
                self.output_eos = true;
                self.pending
                    .push_back((Vec::new(), BufferInfo::end_of_stream(0), 0, 0));
            }
            return Ok(());
        };

        let caps_format = sample.caps().and_then(format_from_caps);
        if !self.format_emitted {
            if let Some(format) = &caps_format {
                // Encoders carry codec config out of band; surface it as a
                // codec-config buffer the way a hardware codec would.
                if self.is_encoder() && !format.codec_data.is_empty() {
                    let info = BufferInfo::new(
                        0,
                        format.codec_data.len(),
                        0,
                        BufferFlags::CODEC_CONFIG,
                    );
                    self.pending.push_back((format.codec_data.clone(), info, 0, 0));
                }
            }
        }

        let Some(buffer) = sample.buffer() else {
            return Ok(());
        };
        let map = buffer
            .map_readable()
            .map_err(|e| GlcvError::codec(format!("{}: unreadable buffer: {e}", self.name)))?;
        let mut flags = BufferFlags::NONE;
        if !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT) {
            flags.insert(BufferFlags::KEY_FRAME);
        }
        let data = map.as_slice().to_vec();
        let info = BufferInfo::new(0, data.len(), clock_time_us(buffer.pts()), flags);
        let (width, height) = caps_format
            .as_ref()
            .map(|f| (f.width.unwrap_or(0), f.height.unwrap_or(0)))
            .unwrap_or((0, 0));
        self.pending.push_back((data, info, width, height));
        Ok(())
    }

    fn output_format(&self) -> MediaFormat {
        self.appsink
            .static_pad("sink")
            .and_then(|pad| pad.current_caps())
            .and_then(|caps| format_from_caps(&caps))
            .unwrap_or_default()
    }
}

impl MediaCodec for GstCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> GlcvResult<()> {
        if self.started {
            return Err(GlcvError::codec(format!("{} cannot start twice", self.name)));
        }
        set_state(&self.pipeline, gst::State::Playing, &self.name)?;
        self.started = true;
        Ok(())
    }

    fn create_input_surface(&mut self) -> GlcvResult<Box<dyn InputSurface>> {
        if self.kind != Kind::VideoEncoder {
            return Err(GlcvError::unsupported(format!(
                "{} does not accept surface input",
                self.name
            )));
        }
        if self.started || self.surface_created {
            return Err(GlcvError::codec("input surface must be created once, before start"));
        }
        self.surface_created = true;
        let (width, height) = self
            .appsrc
            .caps()
            .and_then(|caps| format_from_caps(&caps))
            .map(|f| (f.width.unwrap_or(0), f.height.unwrap_or(0)))
            .unwrap_or((0, 0));
        Ok(Box::new(GstSurface {
            appsrc: self.appsrc.clone(),
            width,
            height,
            released: false,
        }))
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> GlcvResult<Option<usize>> {
        self.ensure_started()?;
        if self.input_eos {
            return Ok(None);
        }
        Ok(self.free_inputs.pop_front())
    }

    fn input_buffer(&mut self, index: usize) -> GlcvResult<&mut Vec<u8>> {
        self.inputs
            .get_mut(index)
            .ok_or_else(|| GlcvError::protocol(format!("No input buffer {index}")))
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> GlcvResult<()> {
        self.ensure_started()?;
        if index >= self.inputs.len() || self.free_inputs.contains(&index) {
            return Err(GlcvError::protocol(format!(
                "Input buffer {index} was not dequeued"
            )));
        }
        let data: Vec<u8> = self.inputs[index]
            .get(..size)
            .ok_or_else(|| GlcvError::protocol(format!("Input size {size} exceeds buffer")))?
            .to_vec();
        self.inputs[index].clear();
        self.free_inputs.push_back(index);

        if size > 0 {
            let mut buffer = gst::Buffer::from_slice(data);
            {
                let buffer_ref = buffer.make_mut();
                buffer_ref.set_pts(gst::ClockTime::from_useconds(presentation_time_us.max(0) as u64));
                if !flags.is_key_frame() && !self.is_encoder() {
                    buffer_ref.set_flags(gst::BufferFlags::DELTA_UNIT);
                }
            }
            self.appsrc
                .push_buffer(buffer)
                .map_err(|e| GlcvError::codec(format!("{} rejected input: {e:?}", self.name)))?;
        }
        if flags.is_end_of_stream() {
            self.end_input()?;
        }
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> GlcvResult<OutputStatus> {
        self.ensure_started()?;
        if self.pending.is_empty() && !self.output_eos {
            self.pull(timeout)?;
        }
        if self.pending.is_empty() {
            return Ok(OutputStatus::TryAgainLater);
        }
        if !self.format_emitted {
            self.format_emitted = true;
            return Ok(OutputStatus::FormatChanged(self.output_format()));
        }
        let Some((data, info, width, height)) = self.pending.pop_front() else {
            return Ok(OutputStatus::TryAgainLater);
        };
        let index = self.next_output;
        self.next_output += 1;
        self.outputs.insert(
            index,
            Output {
                data,
                pts_us: info.presentation_time_us,
                width,
                height,
            },
        );
        Ok(OutputStatus::Buffer { index, info })
    }

    fn output_buffer(&self, index: usize) -> GlcvResult<&[u8]> {
        self.outputs
            .get(&index)
            .map(|o| o.data.as_slice())
            .ok_or_else(|| GlcvError::protocol(format!("No output buffer {index}")))
    }

    fn release_output_buffer(&mut self, index: usize, render: bool) -> GlcvResult<()> {
        let output = self
            .outputs
            .remove(&index)
            .ok_or_else(|| GlcvError::protocol(format!("No output buffer {index}")))?;
        if render && !output.data.is_empty() {
            if let Some(slot) = &self.output_slot {
                slot.post(VideoFrame::from_rgba(
                    output.width,
                    output.height,
                    output.pts_us,
                    output.data,
                )?);
            }
        }
        Ok(())
    }

    fn signal_end_of_input_stream(&mut self) -> GlcvResult<()> {
        self.ensure_started()?;
        if !self.surface_created {
            return Err(GlcvError::protocol(format!(
                "{} has no input surface to end",
                self.name
            )));
        }
        self.end_input()
    }

    fn stop(&mut self) -> GlcvResult<()> {
        self.started = false;
        self.pending.clear();
        self.outputs.clear();
        set_state(&self.pipeline, gst::State::Null, &self.name)
    }
}

impl Drop for GstCodec {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

struct GstSurface {
    appsrc: gst_app::AppSrc,
    width: u32,
    height: u32,
    released: bool,
}

impl InputSurface for GstSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn swap_buffers(&mut self, rgba: &[u8], presentation_time_ns: i64) -> GlcvResult<()> {
        if self.released {
            return Err(GlcvError::render("swap on a released surface"));
        }
        let expected = self.width as usize * self.height as usize * 4;
        if rgba.len() != expected {
            return Err(GlcvError::render(format!(
                "Surface {}x{} expects {expected} bytes, got {}",
                self.width,
                self.height,
                rgba.len()
            )));
        }
        let mut buffer = gst::Buffer::from_slice(rgba.to_vec());
        buffer
            .make_mut()
            .set_pts(gst::ClockTime::from_nseconds(presentation_time_ns.max(0) as u64));
        self.appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| GlcvError::render(format!("Encoder rejected frame: {e:?}")))
    }

    fn release(&mut self) {
        self.released = true;
    }
}

fn pcm_caps(format: &MediaFormat) -> gst::Caps {
    gst::Caps::builder("audio/x-raw")
        .field("format", "S16LE")
        .field("layout", "interleaved")
        .field("rate", format.sample_rate.unwrap_or(44_100) as i32)
        .field("channels", format.channel_count.unwrap_or(2) as i32)
        .build()
}
