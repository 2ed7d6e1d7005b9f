//! Demux, decode, re-encode and mux a synthetic clip through the public
//! backend contract.

use std::time::Duration;

use glcv_codec::software::{SoftwareBackend, SyntheticSource};
use glcv_codec::{
    find_track, BufferFlags, CodecBackend, FrameSlot, MediaFormat, OutputStatus, TrackKind,
    MIME_VIDEO_AVC,
};

const TIMEOUT: Duration = Duration::from_millis(5);

#[test]
fn test_transcode_synthetic_clip() {
    let backend = SoftwareBackend::new();
    let source = std::env::temp_dir().join("glcv-transcode-source.mp4");
    let output = std::env::temp_dir().join(format!("glcv-transcode-{}.json", std::process::id()));
    backend.register_source(&source, SyntheticSource::video(8, 8, 10, 1000));

    let mut extractor = backend.create_extractor(&source).unwrap();
    let (track, format) = find_track(extractor.as_ref(), TrackKind::Video)
        .unwrap()
        .unwrap();
    extractor.select_track(track).unwrap();
    extractor.seek_to(200_000).unwrap();

    let slot = FrameSlot::new();
    let mut decoder = backend.create_decoder(&format, Some(slot.clone())).unwrap();
    decoder.start().unwrap();

    let mut encoder = backend
        .create_encoder(&MediaFormat::video(MIME_VIDEO_AVC, 8, 8).with_frame_rate(10))
        .unwrap();
    let mut surface = encoder.create_input_surface().unwrap();
    encoder.start().unwrap();

    let mut muxer = backend.create_muxer(&output).unwrap();
    let mut mux_track = None;
    let mut decoded_pts = Vec::new();
    let mut input_done = false;
    let mut decoder_done = false;

    while !decoder_done {
        if !input_done {
            if let Some(index) = decoder.dequeue_input_buffer(TIMEOUT).unwrap() {
                match extractor.read_sample().unwrap() {
                    Some(sample) => {
                        let size = sample.data.len();
                        decoder.input_buffer(index).unwrap().extend_from_slice(&sample.data);
                        decoder
                            .queue_input_buffer(index, size, sample.presentation_time_us, sample.flags)
                            .unwrap();
                    }
                    None => {
                        decoder
                            .queue_input_buffer(index, 0, 0, BufferFlags::END_OF_STREAM)
                            .unwrap();
                        input_done = true;
                    }
                }
            }
        }

        match decoder.dequeue_output_buffer(TIMEOUT).unwrap() {
            OutputStatus::Buffer { index, info } => {
                decoder.release_output_buffer(index, info.size != 0).unwrap();
                decoder_done = info.flags.is_end_of_stream();
                if info.size != 0 {
                    let pts_us = slot.with_frame(|f| f.pts_us).unwrap();
                    decoded_pts.push(pts_us);
                    let rgba = slot.with_frame(|f| f.data.clone()).unwrap();
                    surface.swap_buffers(&rgba, pts_us * 1_000).unwrap();
                }
            }
            OutputStatus::FormatChanged(raw) => assert_eq!(raw.width, Some(8)),
            OutputStatus::TryAgainLater => {}
        }
    }
    encoder.signal_end_of_input_stream().unwrap();

    loop {
        match encoder.dequeue_output_buffer(TIMEOUT).unwrap() {
            OutputStatus::FormatChanged(format) => {
                mux_track = Some(muxer.add_track(&format).unwrap());
                muxer.start().unwrap();
            }
            OutputStatus::Buffer { index, info } => {
                if !info.flags.is_codec_config() && info.size != 0 {
                    let data = encoder.output_buffer(index).unwrap().to_vec();
                    muxer
                        .write_sample_data(mux_track.unwrap(), &data, &info)
                        .unwrap();
                }
                encoder.release_output_buffer(index, false).unwrap();
                if info.flags.is_end_of_stream() {
                    break;
                }
            }
            OutputStatus::TryAgainLater => panic!("encoder stalled after end of stream"),
        }
    }
    muxer.stop().unwrap();
    muxer.release();
    decoder.stop().unwrap();
    encoder.stop().unwrap();
    surface.release();
    extractor.release();

    assert_eq!(decoded_pts.first(), Some(&200_000));
    assert_eq!(decoded_pts.len(), 8);
    assert_eq!(slot.frames_posted(), 8);

    let record = backend.muxer_log(&output).unwrap().snapshot();
    let video = record.video_track().unwrap();
    assert_eq!(video.sample_count(), 8);
    assert!(video.samples[0].flags.is_key_frame());
    assert_eq!(video.last_presentation_time_us(), Some(900_000));
    assert!(std::fs::read_to_string(&output).unwrap().contains("video/avc"));
    let _ = std::fs::remove_file(&output);
}
