use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use glcv_common::error::{GlcvError, GlcvResult};
use serde::Serialize;

use crate::buffer::{BufferFlags, BufferInfo};
use crate::format::MediaFormat;
use crate::muxer::MediaMuxer;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MuxedSample {
    pub presentation_time_us: i64,
    pub size: usize,
    pub flags: BufferFlags,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MuxedTrack {
    pub format: MediaFormat,
    pub samples: Vec<MuxedSample>,
}

impl MuxedTrack {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn last_presentation_time_us(&self) -> Option<i64> {
        self.samples.last().map(|s| s.presentation_time_us)
    }
}

/// Everything a [`MemoryMuxer`] accepted.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MuxerRecord {
    pub path: PathBuf,
    pub tracks: Vec<MuxedTrack>,
    pub started: bool,
    pub stopped: bool,
    pub released: bool,
}

impl MuxerRecord {
    pub fn video_track(&self) -> Option<&MuxedTrack> {
        self.tracks.iter().find(|t| t.format.is_video())
    }

    pub fn audio_track(&self) -> Option<&MuxedTrack> {
        self.tracks.iter().find(|t| t.format.is_audio())
    }
}

/// Shared view of a muxer's record, readable after the muxer is gone.
#[derive(Debug, Clone, Default)]
pub struct MuxerLog(Arc<Mutex<MuxerRecord>>);

impl MuxerLog {
    pub fn snapshot(&self) -> MuxerRecord {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn update<R>(&self, f: impl FnOnce(&mut MuxerRecord) -> R) -> R {
        f(&mut self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Muxer that records samples instead of writing a container.
pub struct MemoryMuxer {
    log: MuxerLog,
    write_manifest: bool,
}

impl MemoryMuxer {
    pub fn new(path: &Path, write_manifest: bool) -> Self {
        let log = MuxerLog::default();
        log.update(|r| r.path = path.to_path_buf());
        Self {
            log,
            write_manifest,
        }
    }

    pub fn log(&self) -> MuxerLog {
        self.log.clone()
    }

    fn write_manifest(&self) -> GlcvResult<()> {
        let record = self.log.snapshot();
        if let Some(parent) = record.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&record)?;
        std::fs::write(&record.path, json)?;
        Ok(())
    }
}

impl MediaMuxer for MemoryMuxer {
    fn add_track(&mut self, format: &MediaFormat) -> GlcvResult<usize> {
        self.log.update(|r| {
            if r.started {
                return Err(GlcvError::protocol("add_track after muxer start"));
            }
            r.tracks.push(MuxedTrack {
                format: format.clone(),
                samples: Vec::new(),
            });
            Ok(r.tracks.len() - 1)
        })
    }

    fn start(&mut self) -> GlcvResult<()> {
        self.log.update(|r| {
            if r.started {
                return Err(GlcvError::protocol("Muxer started twice"));
            }
            if r.tracks.is_empty() {
                return Err(GlcvError::protocol("Muxer started without tracks"));
            }
            r.started = true;
            Ok(())
        })
    }

    fn write_sample_data(
        &mut self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> GlcvResult<()> {
        let range = info.payload_range(data.len())?;
        self.log.update(|r| {
            if !r.started || r.stopped {
                return Err(GlcvError::protocol("Sample written outside start/stop"));
            }
            let target = r
                .tracks
                .get_mut(track)
                .ok_or_else(|| GlcvError::protocol(format!("No muxer track {track}")))?;
            if let Some(last) = target.last_presentation_time_us() {
                if info.presentation_time_us < last {
                    return Err(GlcvError::protocol(format!(
                        "Track {track} timestamp went backwards: {} < {last}",
                        info.presentation_time_us
                    )));
                }
            }
            target.samples.push(MuxedSample {
                presentation_time_us: info.presentation_time_us,
                size: range.len(),
                flags: info.flags,
            });
            Ok(())
        })
    }

    fn stop(&mut self) -> GlcvResult<()> {
        self.log.update(|r| {
            if !r.started || r.stopped {
                return Err(GlcvError::protocol("Muxer stopped while not running"));
            }
            r.stopped = true;
            Ok(())
        })?;
        if self.write_manifest {
            self.write_manifest()?;
        }
        Ok(())
    }

    fn release(&mut self) {
        self.log.update(|r| r.released = true);
    }
}
