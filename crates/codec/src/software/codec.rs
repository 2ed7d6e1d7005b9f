use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use glcv_common::error::{GlcvError, GlcvResult};

use super::SoftwareOptions;
use crate::buffer::{BufferFlags, BufferInfo, FrameSlot, VideoFrame};
use crate::codec::{InputSurface, MediaCodec, OutputStatus};
use crate::format::MediaFormat;

const CODEC_CONFIG: &[u8] = b"glcv-sw-config";

#[derive(Debug)]
enum Role {
    VideoEncoder { key_interval: u64 },
    AudioEncoder,
    VideoDecoder {
        width: u32,
        height: u32,
        output: Option<FrameSlot>,
    },
    AudioDecoder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Configured,
    Started,
    Stopped,
}

#[derive(Debug)]
struct Pending {
    data: Vec<u8>,
    info: BufferInfo,
}

/// Frames swapped into an encoder surface, waiting to be encoded.
#[derive(Debug, Default)]
struct SurfaceInbox {
    frames: VecDeque<(u32, i64)>,
    released: bool,
}

/// Buffer-transforming codec with a fixed output latency.
pub struct SoftwareCodec {
    name: String,
    role: Role,
    state: State,
    output_format: MediaFormat,
    latency: usize,
    inputs: Vec<Vec<u8>>,
    free_inputs: VecDeque<usize>,
    inbox: Option<Rc<RefCell<SurfaceInbox>>>,
    pipeline: VecDeque<Pending>,
    ready: VecDeque<Pending>,
    outputs: HashMap<usize, Pending>,
    next_output: usize,
    format_emitted: bool,
    config_emitted: bool,
    input_eos: bool,
    frames_in: u64,
    last_pts_us: i64,
}

impl SoftwareCodec {
    fn new(name: &str, role: Role, output_format: MediaFormat, latency: usize, slots: usize) -> Self {
        Self {
            name: name.to_string(),
            role,
            state: State::Configured,
            output_format,
            latency,
            inputs: vec![Vec::new(); slots.max(1)],
            free_inputs: (0..slots.max(1)).collect(),
            inbox: None,
            pipeline: VecDeque::new(),
            ready: VecDeque::new(),
            outputs: HashMap::new(),
            next_output: 0,
            format_emitted: false,
            config_emitted: false,
            input_eos: false,
            frames_in: 0,
            last_pts_us: 0,
        }
    }

    pub(super) fn video_encoder(format: &MediaFormat, options: &SoftwareOptions) -> Self {
        let fps = format.frame_rate.unwrap_or(30).max(1) as u64;
        let interval = format.i_frame_interval_secs.unwrap_or(1) as u64;
        let output = format.clone().with_codec_data(CODEC_CONFIG.to_vec());
        Self::new(
            "sw-video-encoder",
            Role::VideoEncoder {
                key_interval: (fps * interval).max(1),
            },
            output,
            options.encoder_latency,
            options.input_slots,
        )
    }

    pub(super) fn audio_encoder(format: &MediaFormat, options: &SoftwareOptions) -> Self {
        let output = format.clone().with_codec_data(CODEC_CONFIG.to_vec());
        Self::new(
            "sw-audio-encoder",
            Role::AudioEncoder,
            output,
            options.encoder_latency,
            options.input_slots,
        )
    }

    pub(super) fn video_decoder(
        format: &MediaFormat,
        output: Option<FrameSlot>,
        options: &SoftwareOptions,
    ) -> GlcvResult<Self> {
        let (width, height) = match (format.width, format.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => return Err(GlcvError::setup("Video decoder format needs a width and height")),
        };
        let mut raw = MediaFormat::video(crate::format::MIME_VIDEO_RAW, width, height);
        raw.frame_rate = format.frame_rate;
        raw.rotation_deg = format.rotation_deg;
        Ok(Self::new(
            "sw-video-decoder",
            Role::VideoDecoder {
                width,
                height,
                output,
            },
            raw,
            options.decoder_latency,
            options.input_slots,
        ))
    }

    pub(super) fn audio_decoder(format: &MediaFormat, options: &SoftwareOptions) -> Self {
        let raw = MediaFormat::audio(
            crate::format::MIME_AUDIO_RAW,
            format.sample_rate.unwrap_or(44_100),
            format.channel_count.unwrap_or(2),
        );
        Self::new(
            "sw-audio-decoder",
            Role::AudioDecoder,
            raw,
            options.decoder_latency,
            options.input_slots,
        )
    }

    fn ensure_started(&self) -> GlcvResult<()> {
        match self.state {
            State::Started => Ok(()),
            State::Configured => Err(GlcvError::codec(format!("{} not started", self.name))),
            State::Stopped => Err(GlcvError::codec(format!("{} already stopped", self.name))),
        }
    }

    fn encode_payload(&self, data: &[u8]) -> Pending {
        let (tag, flags) = match self.role {
            Role::VideoEncoder { key_interval } if self.frames_in % key_interval == 0 => {
                (b"GLCV", BufferFlags::KEY_FRAME)
            }
            Role::VideoEncoder { .. } => (b"GLCV", BufferFlags::NONE),
            _ => (b"GLCA", BufferFlags::KEY_FRAME),
        };
        let mut payload = Vec::with_capacity(12);
        payload.extend_from_slice(tag);
        payload.extend_from_slice(&(self.frames_in as u32).to_le_bytes());
        payload.extend_from_slice(&fnv1a(data).to_le_bytes());
        Pending {
            info: BufferInfo::new(0, payload.len(), self.last_pts_us, flags),
            data: payload,
        }
    }

    fn decode_payload(&self, data: &[u8], flags: BufferFlags) -> Pending {
        let payload = match &self.role {
            Role::VideoDecoder { width, height, .. } => {
                let mut index = [0u8; 4];
                let n = data.len().min(4);
                index[..n].copy_from_slice(&data[..n]);
                paint_frame(*width, *height, u32::from_le_bytes(index))
            }
            _ => data.to_vec(),
        };
        Pending {
            info: BufferInfo::new(0, payload.len(), self.last_pts_us, flags),
            data: payload,
        }
    }

    /// Run one unit of input through the codec.
    fn process(&mut self, data: &[u8], pts_us: i64, flags: BufferFlags) {
        self.last_pts_us = pts_us;
        let pending = match self.role {
            Role::VideoEncoder { .. } | Role::AudioEncoder => {
                if !self.config_emitted {
                    self.config_emitted = true;
                    self.ready.push_back(Pending {
                        data: CODEC_CONFIG.to_vec(),
                        info: BufferInfo::new(0, CODEC_CONFIG.len(), 0, BufferFlags::CODEC_CONFIG),
                    });
                }
                self.encode_payload(data)
            }
            _ => self.decode_payload(data, flags),
        };
        self.frames_in += 1;
        self.pipeline.push_back(pending);
        while self.pipeline.len() > self.latency {
            if let Some(p) = self.pipeline.pop_front() {
                self.ready.push_back(p);
            }
        }
    }

    fn flush_end_of_stream(&mut self) {
        self.input_eos = true;
        self.ready.extend(self.pipeline.drain(..));
        self.ready.push_back(Pending {
            data: Vec::new(),
            info: BufferInfo::end_of_stream(self.last_pts_us),
        });
    }

    fn pull_surface_frames(&mut self) {
        let Some(inbox) = self.inbox.clone() else {
            return;
        };
        let frames: Vec<(u32, i64)> = inbox.borrow_mut().frames.drain(..).collect();
        for (checksum, pts_ns) in frames {
            self.process(&checksum.to_le_bytes(), pts_ns / 1_000, BufferFlags::NONE);
        }
    }
}

impl MediaCodec for SoftwareCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> GlcvResult<()> {
        if self.state != State::Configured {
            return Err(GlcvError::codec(format!("{} cannot start twice", self.name)));
        }
        self.state = State::Started;
        Ok(())
    }

    fn create_input_surface(&mut self) -> GlcvResult<Box<dyn InputSurface>> {
        if !matches!(self.role, Role::VideoEncoder { .. }) {
            return Err(GlcvError::unsupported(format!(
                "{} does not accept surface input",
                self.name
            )));
        }
        if self.state != State::Configured || self.inbox.is_some() {
            return Err(GlcvError::codec("input surface must be created once, before start"));
        }
        let inbox = Rc::new(RefCell::new(SurfaceInbox::default()));
        self.inbox = Some(inbox.clone());
        Ok(Box::new(SoftwareSurface {
            inbox,
            width: self.output_format.width.unwrap_or(0),
            height: self.output_format.height.unwrap_or(0),
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
        if self.free_inputs.contains(&index) || index >= self.inputs.len() {
            return Err(GlcvError::protocol(format!(
                "Input buffer {index} was not dequeued"
            )));
        }
        let data = self.inputs[index]
            .get(..size)
            .ok_or_else(|| GlcvError::protocol(format!("Input size {size} exceeds buffer")))?
            .to_vec();
        self.inputs[index].clear();
        self.free_inputs.push_back(index);

        if size > 0 {
            self.process(&data, presentation_time_us, flags);
        } else {
            self.last_pts_us = presentation_time_us;
        }
        if flags.is_end_of_stream() {
            self.flush_end_of_stream();
        }
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> GlcvResult<OutputStatus> {
        self.ensure_started()?;
        self.pull_surface_frames();

        if self.ready.is_empty() {
            return Ok(OutputStatus::TryAgainLater);
        }
        if !self.format_emitted {
            self.format_emitted = true;
            return Ok(OutputStatus::FormatChanged(self.output_format.clone()));
        }

        let Some(pending) = self.ready.pop_front() else {
            return Ok(OutputStatus::TryAgainLater);
        };
        let index = self.next_output;
        self.next_output += 1;
        let info = pending.info;
        self.outputs.insert(index, pending);
        Ok(OutputStatus::Buffer { index, info })
    }

    fn output_buffer(&self, index: usize) -> GlcvResult<&[u8]> {
        self.outputs
            .get(&index)
            .map(|p| p.data.as_slice())
            .ok_or_else(|| GlcvError::protocol(format!("No output buffer {index}")))
    }

    fn release_output_buffer(&mut self, index: usize, render: bool) -> GlcvResult<()> {
        let pending = self
            .outputs
            .remove(&index)
            .ok_or_else(|| GlcvError::protocol(format!("No output buffer {index}")))?;

        if let Role::VideoDecoder {
            width,
            height,
            output: Some(slot),
        } = &self.role
        {
            if render && !pending.data.is_empty() {
                let frame = VideoFrame::from_rgba(
                    *width,
                    *height,
                    pending.info.presentation_time_us,
                    pending.data,
                )?;
                slot.post(frame);
            }
        }
        Ok(())
    }

    fn signal_end_of_input_stream(&mut self) -> GlcvResult<()> {
        self.ensure_started()?;
        if self.inbox.is_none() {
            return Err(GlcvError::protocol(format!(
                "{} has no input surface to end",
                self.name
            )));
        }
        if !self.input_eos {
            self.pull_surface_frames();
            self.flush_end_of_stream();
        }
        Ok(())
    }

    fn stop(&mut self) -> GlcvResult<()> {
        self.state = State::Stopped;
        self.pipeline.clear();
        self.ready.clear();
        self.outputs.clear();
        if let Some(inbox) = &self.inbox {
            inbox.borrow_mut().frames.clear();
        }
        Ok(())
    }
}

struct SoftwareSurface {
    inbox: Rc<RefCell<SurfaceInbox>>,
    width: u32,
    height: u32,
}

impl InputSurface for SoftwareSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn swap_buffers(&mut self, rgba: &[u8], presentation_time_ns: i64) -> GlcvResult<()> {
        let mut inbox = self.inbox.borrow_mut();
        if inbox.released {
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
        inbox.frames.push_back((fnv1a(rgba), presentation_time_ns));
        Ok(())
    }

    fn release(&mut self) {
        let mut inbox = self.inbox.borrow_mut();
        inbox.released = true;
        inbox.frames.clear();
    }
}

fn fnv1a(data: &[u8]) -> u32 {
    data.iter().fold(0x811c_9dc5u32, |hash, byte| {
        (hash ^ *byte as u32).wrapping_mul(0x0100_0193)
    })
}

/// Solid frame whose color encodes the source frame index.
fn paint_frame(width: u32, height: u32, index: u32) -> Vec<u8> {
    let pixel = [
        (index.wrapping_mul(37) % 256) as u8,
        (index.wrapping_mul(11) % 256) as u8,
        200,
        255,
    ];
    pixel
        .iter()
        .copied()
        .cycle()
        .take(width as usize * height as usize * 4)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{MIME_AUDIO_AAC, MIME_VIDEO_AVC};

    const TIMEOUT: Duration = Duration::from_millis(10);

    fn options(latency: usize) -> SoftwareOptions {
        SoftwareOptions {
            encoder_latency: latency,
            decoder_latency: latency,
            ..SoftwareOptions::default()
        }
    }

    #[test]
    fn test_encoder_reports_format_before_config_and_samples() {
        let format = MediaFormat::video(MIME_VIDEO_AVC, 2, 2).with_frame_rate(30);
        let mut codec = SoftwareCodec::video_encoder(&format, &options(0));
        let mut surface = codec.create_input_surface().unwrap();
        codec.start().unwrap();

        assert_eq!(
            codec.dequeue_output_buffer(TIMEOUT).unwrap(),
            OutputStatus::TryAgainLater
        );

        surface.swap_buffers(&[0u8; 16], 0).unwrap();
        assert!(matches!(
            codec.dequeue_output_buffer(TIMEOUT).unwrap(),
            OutputStatus::FormatChanged(_)
        ));
        match codec.dequeue_output_buffer(TIMEOUT).unwrap() {
            OutputStatus::Buffer { index, info } => {
                assert!(info.flags.is_codec_config());
                codec.release_output_buffer(index, false).unwrap();
            }
            other => panic!("unexpected {other:?}"),
        }
        match codec.dequeue_output_buffer(TIMEOUT).unwrap() {
            OutputStatus::Buffer { index, info } => {
                assert!(info.flags.is_key_frame());
                assert_eq!(info.size, 12);
                assert_eq!(codec.output_buffer(index).unwrap().len(), 12);
                codec.release_output_buffer(index, false).unwrap();
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_latency_holds_output_until_eos() {
        let format = MediaFormat::video(MIME_VIDEO_AVC, 1, 1);
        let mut codec = SoftwareCodec::video_encoder(&format, &options(3));
        let mut surface = codec.create_input_surface().unwrap();
        codec.start().unwrap();

        surface.swap_buffers(&[0u8; 4], 0).unwrap();
        // Only the codec config is ready.
        assert!(matches!(
            codec.dequeue_output_buffer(TIMEOUT).unwrap(),
            OutputStatus::FormatChanged(_)
        ));
        let mut seen = Vec::new();
        loop {
            match codec.dequeue_output_buffer(TIMEOUT).unwrap() {
                OutputStatus::Buffer { index, info } => {
                    seen.push(info);
                    codec.release_output_buffer(index, false).unwrap();
                }
                OutputStatus::TryAgainLater => break,
                OutputStatus::FormatChanged(_) => panic!("format changed twice"),
            }
        }
        assert_eq!(seen.len(), 1);

        codec.signal_end_of_input_stream().unwrap();
        let mut eos = false;
        while let OutputStatus::Buffer { index, info } = codec.dequeue_output_buffer(TIMEOUT).unwrap() {
            codec.release_output_buffer(index, false).unwrap();
            if info.flags.is_end_of_stream() {
                eos = true;
                break;
            }
        }
        assert!(eos);
    }

    #[test]
    fn test_audio_encoder_eos_without_data_still_reports_format() {
        let format = MediaFormat::audio(MIME_AUDIO_AAC, 44_100, 2);
        let mut codec = SoftwareCodec::audio_encoder(&format, &options(2));
        codec.start().unwrap();
        let index = codec.dequeue_input_buffer(TIMEOUT).unwrap().unwrap();
        codec
            .queue_input_buffer(index, 0, 0, BufferFlags::END_OF_STREAM)
            .unwrap();
        assert!(matches!(
            codec.dequeue_output_buffer(TIMEOUT).unwrap(),
            OutputStatus::FormatChanged(_)
        ));
        match codec.dequeue_output_buffer(TIMEOUT).unwrap() {
            OutputStatus::Buffer { info, .. } => assert!(info.flags.is_end_of_stream()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(codec.dequeue_input_buffer(TIMEOUT).unwrap(), None);
    }

    #[test]
    fn test_video_decoder_renders_into_slot() {
        let format = MediaFormat::video(MIME_VIDEO_AVC, 2, 2);
        let slot = FrameSlot::new();
        let mut codec = SoftwareCodec::video_decoder(&format, Some(slot.clone()), &options(0)).unwrap();
        codec.start().unwrap();

        let index = codec.dequeue_input_buffer(TIMEOUT).unwrap().unwrap();
        codec.input_buffer(index).unwrap().extend_from_slice(&7u32.to_le_bytes());
        codec
            .queue_input_buffer(index, 4, 233_333, BufferFlags::KEY_FRAME)
            .unwrap();

        assert!(matches!(
            codec.dequeue_output_buffer(TIMEOUT).unwrap(),
            OutputStatus::FormatChanged(_)
        ));
        let OutputStatus::Buffer { index, .. } = codec.dequeue_output_buffer(TIMEOUT).unwrap() else {
            panic!("expected a decoded frame");
        };
        codec.release_output_buffer(index, true).unwrap();

        assert_eq!(slot.with_frame(|f| f.pts_us), Some(233_333));
        assert_eq!(slot.with_frame(|f| f.pixel(0, 0)), Some(Some([3, 77, 200, 255])));
    }

    #[test]
    fn test_dequeue_before_start_fails() {
        let format = MediaFormat::audio(MIME_AUDIO_AAC, 44_100, 2);
        let mut codec = SoftwareCodec::audio_encoder(&format, &options(0));
        assert!(codec.dequeue_input_buffer(TIMEOUT).is_err());
        assert!(codec.create_input_surface().is_err());
    }
}
