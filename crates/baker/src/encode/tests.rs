use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use glcv_codec::software::{MemoryMuxer, MuxerLog, SoftwareBackend};
use glcv_codec::{
    BufferFlags, BufferInfo, MediaCodec, MediaFormat, OutputStatus, TrackKind, MIME_VIDEO_AVC,
};
use glcv_common::error::GlcvResult;

use super::drain::{DrainTimeouts, TrackWriter};
use super::*;
use crate::request::{AudioSettings, EncoderConfig};

/// Codec that replays a fixed list of dequeue results.
struct ScriptedCodec {
    script: VecDeque<OutputStatus>,
    payload: Vec<u8>,
    released: Vec<usize>,
}

impl ScriptedCodec {
    fn new(script: Vec<OutputStatus>) -> Self {
        Self {
            script: script.into(),
            payload: vec![7; 16],
            released: Vec::new(),
        }
    }
}

impl MediaCodec for ScriptedCodec {
    fn name(&self) -> &str {
        "scripted"
    }

    fn start(&mut self) -> GlcvResult<()> {
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> GlcvResult<Option<usize>> {
        Ok(None)
    }

    fn input_buffer(&mut self, _index: usize) -> GlcvResult<&mut Vec<u8>> {
        Ok(&mut self.payload)
    }

    fn queue_input_buffer(
        &mut self,
        _index: usize,
        _size: usize,
        _pts_us: i64,
        _flags: BufferFlags,
    ) -> GlcvResult<()> {
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> GlcvResult<OutputStatus> {
        Ok(self.script.pop_front().unwrap_or(OutputStatus::TryAgainLater))
    }

    fn output_buffer(&self, _index: usize) -> GlcvResult<&[u8]> {
        Ok(&self.payload)
    }

    fn release_output_buffer(&mut self, index: usize, _render: bool) -> GlcvResult<()> {
        self.released.push(index);
        Ok(())
    }

    fn signal_end_of_input_stream(&mut self) -> GlcvResult<()> {
        Ok(())
    }

    fn stop(&mut self) -> GlcvResult<()> {
        Ok(())
    }
}

const TIMEOUTS: DrainTimeouts = DrainTimeouts {
    dequeue: Duration::from_millis(1),
    end_of_stream: Duration::from_millis(20),
};

fn video_format() -> MediaFormat {
    MediaFormat::video(MIME_VIDEO_AVC, 16, 16)
}

fn buffer(index: usize, pts_us: i64, flags: BufferFlags) -> OutputStatus {
    OutputStatus::Buffer {
        index,
        info: BufferInfo::new(0, 16, pts_us, flags),
    }
}

fn shared_session(expected: usize) -> (SharedMuxer, MuxerLog) {
    let muxer = MemoryMuxer::new(Path::new("encode-test.mp4"), false);
    let log = muxer.log();
    (MuxerSession::new(Box::new(muxer), expected).shared(), log)
}

fn config(dir_name: &str) -> EncoderConfig {
    EncoderConfig {
        output_path: std::env::temp_dir().join(dir_name).join("out.mp4"),
        width: 16,
        height: 16,
        fps: 30,
        i_frame_interval_secs: 5,
        bit_rate: 1_000_000,
        audio: AudioSettings {
            sample_rate: 44_100,
            channels: 2,
            bit_rate: 65_536,
        },
        dequeue_timeout: Duration::from_millis(1),
        eos_drain_deadline: Duration::from_millis(200),
        decoder_warmup_attempts: 50,
    }
}

#[test]
fn test_writer_rejects_second_format_change() {
    let (muxer, _) = shared_session(1);
    let mut codec = ScriptedCodec::new(vec![
        OutputStatus::FormatChanged(video_format()),
        OutputStatus::FormatChanged(video_format()),
    ]);
    let mut writer = TrackWriter::new(TrackKind::Video, muxer, None);

    let err = writer.drain(&mut codec, false, TIMEOUTS).unwrap_err();
    assert!(err.is_protocol());
    assert!(err.to_string().contains("format changed twice"));
}

#[test]
fn test_writer_rejects_sample_before_track() {
    let (muxer, _) = shared_session(1);
    let mut codec = ScriptedCodec::new(vec![buffer(0, 0, BufferFlags::KEY_FRAME)]);
    let mut writer = TrackWriter::new(TrackKind::Video, muxer, None);

    let err = writer.drain(&mut codec, false, TIMEOUTS).unwrap_err();
    assert!(err.is_protocol());
    assert!(!writer.is_track_added());
}

#[test]
fn test_writer_skips_codec_config_and_stops_at_eos() {
    let (muxer, log) = shared_session(1);
    let mut codec = ScriptedCodec::new(vec![
        OutputStatus::FormatChanged(video_format()),
        buffer(0, 0, BufferFlags::CODEC_CONFIG),
        buffer(1, 0, BufferFlags::KEY_FRAME),
        buffer(2, 33_333, BufferFlags::NONE),
        OutputStatus::Buffer {
            index: 3,
            info: BufferInfo::end_of_stream(33_333),
        },
        buffer(4, 66_666, BufferFlags::NONE),
    ]);
    let observed = std::rc::Rc::new(std::cell::Cell::new(0));
    let seen = observed.clone();
    let observer: TrackAddedObserver = Box::new(move |kind| {
        assert_eq!(kind, TrackKind::Video);
        seen.set(seen.get() + 1);
        Ok(())
    });
    let mut writer = TrackWriter::new(TrackKind::Video, muxer.clone(), Some(observer));

    writer.drain(&mut codec, true, TIMEOUTS).unwrap();
    assert!(writer.reached_eos());
    assert_eq!(writer.samples_written(), 2);
    assert_eq!(observed.get(), 1);
    assert_eq!(codec.released, vec![0, 1, 2, 3]);

    // Draining after EOS is a no-op.
    writer.drain(&mut codec, true, TIMEOUTS).unwrap();
    assert_eq!(codec.script.len(), 1);

    muxer.borrow_mut().finish().unwrap();
    let record = log.snapshot();
    assert_eq!(record.video_track().unwrap().sample_count(), 2);
}

#[test]
fn test_writer_gives_up_waiting_for_eos() {
    let (muxer, _) = shared_session(1);
    let mut codec = ScriptedCodec::new(vec![OutputStatus::FormatChanged(video_format())]);
    let mut writer = TrackWriter::new(TrackKind::Video, muxer, None);

    writer.drain(&mut codec, true, TIMEOUTS).unwrap();
    assert!(writer.is_track_added());
    assert!(!writer.reached_eos());
}

#[test]
fn test_video_core_encodes_rendered_frames() {
    let backend = SoftwareBackend::new();
    let (muxer, log) = shared_session(1);
    let config = config("glcv-encode-video");
    let mut core = VideoEncoderCore::new(&backend, &config, muxer.clone(), None).unwrap();
    assert_eq!(core.surface_size(), (16, 16));

    let frame = vec![0u8; 16 * 16 * 4];
    for i in 0..5i64 {
        core.render(&frame, i * 33_333_333).unwrap();
        core.drain(false).unwrap();
    }
    assert!(core.is_track_added());
    core.drain(true).unwrap();
    assert_eq!(core.samples_written(), 5);

    core.release();
    core.release();
    muxer.borrow_mut().finish().unwrap();
    assert_eq!(log.snapshot().video_track().unwrap().sample_count(), 5);
}

#[test]
fn test_video_core_rejects_oversized_surface() {
    let backend = SoftwareBackend::new();
    let (muxer, _) = shared_session(1);
    let mut config = config("glcv-encode-oversized");
    config.width = 10_000;
    let err = VideoEncoderCore::new(&backend, &config, muxer, None)
        .err()
        .unwrap();
    assert!(err.is_setup());
}

#[test]
fn test_audio_core_end_of_stream_without_input() {
    let backend = SoftwareBackend::new();
    let (muxer, log) = shared_session(1);
    let config = config("glcv-encode-audio");
    let mut core = AudioEncoderCore::new(&backend, &config, muxer.clone(), None).unwrap();

    core.encode(&[1u8; 256], 0).unwrap();
    core.encode(&[2u8; 256], 23_219).unwrap();
    core.drain(true).unwrap();
    assert!(core.is_track_added());
    assert_eq!(core.samples_written(), 2);
    assert_eq!(core.chunks_dropped(), 0);

    core.release();
    muxer.borrow_mut().finish().unwrap();
    assert_eq!(log.snapshot().audio_track().unwrap().sample_count(), 2);
}

#[test]
fn test_recorder_stop_is_single_shot() {
    let backend = SoftwareBackend::new();
    let config = config("glcv-encode-recorder");
    let output = config.output_path.clone();
    let mut recorder = Recorder::new(config, false);
    recorder.raise_encoder(&backend).unwrap();
    assert!(recorder.is_recording());

    let mut compositor = crate::compositor::Compositor::new(
        glcv_timeline::Resolution::new(16, 16),
        1.0,
        crate::request::DEFAULT_VIEWPORT_COLOR,
    );
    let audio = AudioProcessor::new();
    for i in 0..3i64 {
        recorder
            .frame_available(i * 33_333_333, &mut compositor, &audio)
            .unwrap();
    }

    let stats = recorder.stop_recording().unwrap();
    assert_eq!(stats.frames_rendered, 3);
    assert_eq!(stats.video_samples, 3);
    assert_eq!(stats.audio_samples, 0);
    assert!(!recorder.is_recording());
    assert_eq!(recorder.stop_recording().unwrap(), stats);

    let record = backend.muxer_log(&output).unwrap().snapshot();
    assert!(record.stopped);
    assert!(record.audio_track().is_none());
    let _ = std::fs::remove_dir_all(output.parent().unwrap());
}
