//! The passive decoders of one bake, keyed by unit id.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use glcv_codec::{CodecBackend, FrameSlot};
use glcv_common::error::GlcvResult;
use glcv_timeline::{UnitId, Visibility};

use super::passive::{DecoderSettings, PassiveDecoder};
use crate::encode::AudioBufferProvider;

struct PoolEntry {
    id: UnitId,
    decoder: PassiveDecoder,
}

/// Arena of decoders. Entries are removed by swap-remove once their unit
/// went out of view after playing.
#[derive(Default)]
pub struct DecoderPool {
    entries: Vec<PoolEntry>,
    positions: HashMap<UnitId, usize>,
    ids: HashMap<String, UnitId>,
    retired_frames: BTreeMap<String, u64>,
}

impl DecoderPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder for unit `id`. It is prepared later by
    /// [`prepare`](Self::prepare).
    pub fn create_decoder(
        &mut self,
        id: UnitId,
        tag: &str,
        source: impl Into<PathBuf>,
        start_clip_ms: u64,
        decode_audio: bool,
        settings: DecoderSettings,
    ) -> FrameSlot {
        let decoder = PassiveDecoder::new(tag, source, start_clip_ms, decode_audio, settings);
        let slot = decoder.frame_slot();
        if let Some(&position) = self.positions.get(&id) {
            tracing::warn!(tag, id = id.index(), "Replacing registered decoder");
            let mut old = std::mem::replace(&mut self.entries[position].decoder, decoder);
            old.release();
            self.ids.retain(|_, v| *v != id);
        } else {
            self.positions.insert(id, self.entries.len());
            self.entries.push(PoolEntry { id, decoder });
        }
        self.ids.insert(tag.to_string(), id);
        slot
    }

    pub fn prepare(
        &mut self,
        backend: &dyn CodecBackend,
        audio: &mut dyn AudioBufferProvider,
    ) -> GlcvResult<()> {
        for entry in &mut self.entries {
            entry.decoder.prepare(backend, audio)?;
        }
        Ok(())
    }

    /// Advance visible decoders and retire the ones that played and went
    /// out of view. Decoders that never played stay pending.
    pub fn advance(&mut self, timestamp_us: i64, visibility: &Visibility) -> GlcvResult<()> {
        let mut position = 0;
        while position < self.entries.len() {
            let entry = &mut self.entries[position];
            if visibility.is_visible(entry.id) {
                entry.decoder.advance(timestamp_us)?;
                position += 1;
            } else if entry.decoder.is_used() {
                let mut retired = self.swap_remove(position);
                retired.decoder.release();
                self.retire(&retired.decoder);
            } else {
                position += 1;
            }
        }
        Ok(())
    }

    fn swap_remove(&mut self, position: usize) -> PoolEntry {
        let entry = self.entries.swap_remove(position);
        self.positions.remove(&entry.id);
        self.ids.remove(entry.decoder.tag());
        if let Some(moved) = self.entries.get(position) {
            self.positions.insert(moved.id, position);
        }
        entry
    }

    fn retire(&mut self, decoder: &PassiveDecoder) {
        *self
            .retired_frames
            .entry(decoder.tag().to_string())
            .or_default() += decoder.frames_accepted();
    }

    /// Release every remaining decoder.
    pub fn release(&mut self) {
        for mut entry in std::mem::take(&mut self.entries) {
            entry.decoder.release();
            self.retire(&entry.decoder);
        }
        self.positions.clear();
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.ids.contains_key(tag)
    }

    pub fn decoder(&self, tag: &str) -> Option<&PassiveDecoder> {
        let id = self.ids.get(tag)?;
        let position = self.positions.get(id)?;
        self.entries.get(*position).map(|e| &e.decoder)
    }

    /// Speed-controller accepted frames per tag, over live and retired
    /// decoders.
    pub fn frames_accepted(&self) -> BTreeMap<String, u64> {
        let mut totals = self.retired_frames.clone();
        for entry in &self.entries {
            *totals.entry(entry.decoder.tag().to_string()).or_default() +=
                entry.decoder.frames_accepted();
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::AudioProcessor;
    use glcv_codec::software::{SoftwareBackend, SyntheticSource};

    fn pool_with(backend: &SoftwareBackend, tags: &[&str]) -> DecoderPool {
        let mut pool = DecoderPool::new();
        for (i, tag) in tags.iter().enumerate() {
            let path = format!("/clips/{tag}.mp4");
            backend.register_source(path.clone(), SyntheticSource::video(16, 16, 30, 2000));
            pool.create_decoder(UnitId(i), tag, path, 0, false, DecoderSettings::default());
        }
        let mut audio = AudioProcessor::new();
        pool.prepare(backend, &mut audio).unwrap();
        pool
    }

    #[test]
    fn test_never_visible_decoders_stay_pending() {
        let backend = SoftwareBackend::new();
        let mut pool = pool_with(&backend, &["a", "b"]);
        let only_a = Visibility::from_flags(vec![true, false]);
        for i in 0..5 {
            pool.advance(i * 33_334, &only_a).unwrap();
        }
        assert_eq!(pool.len(), 2);
        assert!(!pool.decoder("b").unwrap().is_used());
    }

    #[test]
    fn test_used_then_hidden_decoder_is_released() {
        let backend = SoftwareBackend::new();
        let mut pool = pool_with(&backend, &["a", "b", "c"]);
        pool.advance(0, &Visibility::from_flags(vec![true, false, false]))
            .unwrap();
        pool.advance(33_334, &Visibility::from_flags(vec![false, true, false]))
            .unwrap();

        assert!(!pool.contains("a"));
        assert_eq!(pool.len(), 2);
        // "c" moved into a's position and is still reachable by tag.
        assert!(pool.decoder("c").is_some());
        assert!(pool.decoder("b").unwrap().is_used());

        let frames = pool.frames_accepted();
        assert_eq!(frames.get("a"), Some(&1));
        assert_eq!(frames.get("b"), Some(&1));
    }

    #[test]
    fn test_release_empties_pool() {
        let backend = SoftwareBackend::new();
        let mut pool = pool_with(&backend, &["a"]);
        pool.release();
        pool.release();
        assert!(pool.is_empty());
    }
}
