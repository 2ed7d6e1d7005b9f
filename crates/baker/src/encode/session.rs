//! The muxer shared by the encoder cores of one bake.

use std::cell::RefCell;
use std::rc::Rc;

use glcv_codec::{BufferInfo, MediaFormat, MediaMuxer, TrackKind};
use glcv_common::error::{GlcvError, GlcvResult};

/// Muxer session handle shared by the video and audio cores.
pub type SharedMuxer = Rc<RefCell<MuxerSession>>;

struct PendingSample {
    track: usize,
    data: Vec<u8>,
    info: BufferInfo,
}

/// Wraps a [`MediaMuxer`] with start gating.
///
/// The container can only start once every expected track is known, yet
/// encoders begin producing as soon as their own format settles. Samples
/// that arrive early are held and written in arrival order at start.
pub struct MuxerSession {
    muxer: Box<dyn MediaMuxer>,
    expected_tracks: usize,
    tracks: Vec<TrackKind>,
    pending: Vec<PendingSample>,
    samples_written: Vec<u64>,
    started: bool,
    stopped: bool,
    released: bool,
}

impl MuxerSession {
    pub fn new(muxer: Box<dyn MediaMuxer>, expected_tracks: usize) -> Self {
        Self {
            muxer,
            expected_tracks: expected_tracks.max(1),
            tracks: Vec::new(),
            pending: Vec::new(),
            samples_written: Vec::new(),
            started: false,
            stopped: false,
            released: false,
        }
    }

    pub fn shared(self) -> SharedMuxer {
        Rc::new(RefCell::new(self))
    }

    pub fn add_track(&mut self, kind: TrackKind, format: &MediaFormat) -> GlcvResult<usize> {
        if self.started || self.stopped {
            return Err(GlcvError::protocol(format!(
                "{kind} track added after the muxer started"
            )));
        }
        if self.tracks.contains(&kind) {
            return Err(GlcvError::protocol(format!("{kind} track added twice")));
        }
        let index = self.muxer.add_track(format)?;
        self.tracks.push(kind);
        if self.samples_written.len() <= index {
            self.samples_written.resize(index + 1, 0);
        }
        tracing::debug!(%kind, index, mime = %format.mime, "Muxer track added");
        Ok(index)
    }

    /// Start the muxer once every expected track has been added.
    pub fn start_if_ready(&mut self) -> GlcvResult<bool> {
        if self.started || self.tracks.len() < self.expected_tracks {
            return Ok(self.started);
        }
        self.start()?;
        Ok(true)
    }

    fn start(&mut self) -> GlcvResult<()> {
        self.muxer.start()?;
        self.started = true;
        let pending = std::mem::take(&mut self.pending);
        tracing::debug!(
            tracks = self.tracks.len(),
            flushed = pending.len(),
            "Muxer started"
        );
        for sample in pending {
            self.write_now(sample.track, &sample.data, &sample.info)?;
        }
        Ok(())
    }

    pub fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> GlcvResult<()> {
        if self.stopped {
            return Err(GlcvError::protocol("Sample written after the muxer stopped"));
        }
        if track >= self.samples_written.len() {
            return Err(GlcvError::protocol(format!("No muxer track {track}")));
        }
        if self.started {
            return self.write_now(track, data, info);
        }
        let range = info.payload_range(data.len())?;
        self.pending.push(PendingSample {
            track,
            info: BufferInfo::new(0, range.len(), info.presentation_time_us, info.flags),
            data: data[range].to_vec(),
        });
        Ok(())
    }

    fn write_now(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> GlcvResult<()> {
        self.muxer.write_sample_data(track, data, info)?;
        self.samples_written[track] += 1;
        Ok(())
    }

    /// Stop the container, starting it first with whatever tracks exist
    /// when an expected track never showed up.
    pub fn finish(&mut self) -> GlcvResult<()> {
        if self.stopped {
            return Ok(());
        }
        if !self.started {
            if self.tracks.is_empty() {
                self.stopped = true;
                return Err(GlcvError::protocol("Muxer finished without any track"));
            }
            tracing::warn!(
                added = self.tracks.len(),
                expected = self.expected_tracks,
                "Starting muxer with missing tracks"
            );
            self.start()?;
        }
        self.stopped = true;
        self.muxer.stop()?;
        self.release();
        Ok(())
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.muxer.release();
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn has_track(&self, kind: TrackKind) -> bool {
        self.tracks.contains(&kind)
    }

    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    pub fn samples_written(&self, track: usize) -> u64 {
        self.samples_written.get(track).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glcv_codec::software::MemoryMuxer;
    use glcv_codec::{BufferFlags, MIME_AUDIO_AAC, MIME_VIDEO_AVC};
    use std::path::Path;

    fn session(expected: usize) -> (MuxerSession, glcv_codec::software::MuxerLog) {
        let muxer = MemoryMuxer::new(Path::new("session.mp4"), false);
        let log = muxer.log();
        (MuxerSession::new(Box::new(muxer), expected), log)
    }

    fn sample(pts: i64) -> BufferInfo {
        BufferInfo::new(0, 4, pts, BufferFlags::NONE)
    }

    #[test]
    fn test_holds_samples_until_all_tracks_added() {
        let (mut session, log) = session(2);
        let video = session
            .add_track(TrackKind::Video, &MediaFormat::video(MIME_VIDEO_AVC, 8, 8))
            .unwrap();
        assert!(!session.start_if_ready().unwrap());

        session.write_sample(video, &[1; 4], &sample(0)).unwrap();
        session.write_sample(video, &[1; 4], &sample(33_333)).unwrap();
        assert_eq!(session.pending_samples(), 2);
        assert!(!log.snapshot().started);

        session
            .add_track(TrackKind::Audio, &MediaFormat::audio(MIME_AUDIO_AAC, 44_100, 2))
            .unwrap();
        assert!(session.start_if_ready().unwrap());
        assert_eq!(session.pending_samples(), 0);

        let record = log.snapshot();
        assert!(record.started);
        let times: Vec<i64> = record.video_track().unwrap().samples.iter().map(|s| s.presentation_time_us).collect();
        assert_eq!(times, vec![0, 33_333]);
        assert_eq!(session.samples_written(video), 2);
    }

    #[test]
    fn test_finish_starts_with_missing_audio() {
        let (mut session, log) = session(2);
        let video = session
            .add_track(TrackKind::Video, &MediaFormat::video(MIME_VIDEO_AVC, 8, 8))
            .unwrap();
        session.write_sample(video, &[1; 4], &sample(0)).unwrap();
        session.finish().unwrap();

        let record = log.snapshot();
        assert!(record.started && record.stopped);
        assert_eq!(record.tracks.len(), 1);
        assert_eq!(record.video_track().unwrap().sample_count(), 1);
    }

    #[test]
    fn test_finish_twice_is_harmless() {
        let (mut session, _) = session(1);
        session
            .add_track(TrackKind::Video, &MediaFormat::video(MIME_VIDEO_AVC, 8, 8))
            .unwrap();
        session.start_if_ready().unwrap();
        session.finish().unwrap();
        session.finish().unwrap();
        assert!(session.is_stopped());
    }

    #[test]
    fn test_rejects_duplicate_and_late_tracks() {
        let (mut session, _) = session(1);
        let format = MediaFormat::video(MIME_VIDEO_AVC, 8, 8);
        session.add_track(TrackKind::Video, &format).unwrap();
        assert!(session.add_track(TrackKind::Video, &format).unwrap_err().is_protocol());

        session.start_if_ready().unwrap();
        let audio = MediaFormat::audio(MIME_AUDIO_AAC, 44_100, 2);
        assert!(session.add_track(TrackKind::Audio, &audio).unwrap_err().is_protocol());
    }

    #[test]
    fn test_finish_without_tracks_fails() {
        let (mut session, _) = session(1);
        assert!(session.finish().unwrap_err().is_protocol());
        assert!(session.write_sample(0, &[0], &sample(0)).is_err());
    }
}
