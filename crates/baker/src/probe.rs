//! Source metadata lookup.

use std::path::Path;

use glcv_codec::{find_track, CodecBackend, TrackKind};
use glcv_common::error::{GlcvError, GlcvResult};
use glcv_timeline::{probe_image, MediaKind, MediaMetadata, Orientation};

/// Probe `path`: images by header, videos through the backend's demuxer.
pub fn probe_media(backend: &dyn CodecBackend, path: &Path) -> GlcvResult<MediaMetadata> {
    if MediaKind::from_path(path) == MediaKind::Image {
        return probe_image(path);
    }

    let mut extractor = backend.create_extractor(path)?;
    let video = find_track(extractor.as_ref(), TrackKind::Video);
    let audio = find_track(extractor.as_ref(), TrackKind::Audio);
    extractor.release();

    let Some((_, format)) = video? else {
        return Err(GlcvError::setup(format!(
            "No video track in {}",
            path.display()
        )));
    };
    let metadata = MediaMetadata {
        kind: MediaKind::Video,
        width: format.width.unwrap_or(0),
        height: format.height.unwrap_or(0),
        duration_ms: format.duration_us.map_or(0, |us| us.max(0) as u64 / 1_000),
        orientation: Orientation::from_degrees(format.rotation_deg),
        has_audio: audio?.is_some(),
    };
    tracing::debug!(
        path = %path.display(),
        width = metadata.width,
        height = metadata.height,
        duration_ms = metadata.duration_ms,
        has_audio = metadata.has_audio,
        "Probed media"
    );
    Ok(metadata)
}
