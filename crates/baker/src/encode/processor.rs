//! Per-source PCM slots and the mix point the audio encoder pulls from.

use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Default)]
struct AudioBuffer {
    tag: String,
    data: Option<Vec<u8>>,
}

/// Shared handle to one source's latest decoded PCM chunk.
///
/// The decoder of that source writes, the [`AudioProcessor`] reads. Both
/// live on the bake thread.
#[derive(Debug, Clone)]
pub struct AudioBufferHandle(Rc<RefCell<AudioBuffer>>);

impl AudioBufferHandle {
    fn new(tag: &str) -> Self {
        Self(Rc::new(RefCell::new(AudioBuffer {
            tag: tag.to_string(),
            data: None,
        })))
    }

    pub fn tag(&self) -> String {
        self.0.borrow().tag.clone()
    }

    /// Replace the buffered chunk. An empty chunk empties the slot.
    pub fn update(&self, data: Vec<u8>) {
        self.0.borrow_mut().data = (!data.is_empty()).then_some(data);
    }

    pub fn clear(&self) {
        self.0.borrow_mut().data = None;
    }

    pub fn has_data(&self) -> bool {
        self.0.borrow().data.is_some()
    }

    pub fn size(&self) -> usize {
        self.0.borrow().data.as_ref().map_or(0, Vec::len)
    }

    fn snapshot(&self) -> Option<Vec<u8>> {
        self.0.borrow().data.clone()
    }
}

/// Hands out audio slots to decoders.
pub trait AudioBufferProvider {
    fn provide(&mut self, tag: &str) -> AudioBufferHandle;
}

/// Collects every source's slot and picks the chunk to encode each tick.
#[derive(Debug, Default)]
pub struct AudioProcessor {
    slots: Vec<AudioBufferHandle>,
}

impl AudioProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The chunk to encode this tick: of all populated slots, the one
    /// registered last. Slots keep their data until their decoder
    /// replaces or clears it.
    pub fn process_data(&self) -> Option<Vec<u8>> {
        self.slots.iter().rev().find_map(AudioBufferHandle::snapshot)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

impl AudioBufferProvider for AudioProcessor {
    fn provide(&mut self, tag: &str) -> AudioBufferHandle {
        let handle = AudioBufferHandle::new(tag);
        self.slots.push(handle.clone());
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_slots_no_data() {
        let mut processor = AudioProcessor::new();
        assert!(processor.process_data().is_none());
        processor.provide("a");
        assert!(processor.process_data().is_none());
    }

    #[test]
    fn test_last_populated_slot_wins() {
        let mut processor = AudioProcessor::new();
        let a = processor.provide("a");
        let b = processor.provide("b");
        let c = processor.provide("c");

        a.update(vec![1; 4]);
        b.update(vec![2; 4]);
        assert_eq!(processor.process_data(), Some(vec![2; 4]));

        c.update(vec![3; 2]);
        assert_eq!(processor.process_data(), Some(vec![3; 2]));

        c.clear();
        b.update(Vec::new());
        assert_eq!(processor.process_data(), Some(vec![1; 4]));
        assert_eq!(processor.slot_count(), 3);
    }

    #[test]
    fn test_data_survives_reads() {
        let mut processor = AudioProcessor::new();
        let a = processor.provide("a");
        a.update(vec![9; 8]);
        assert_eq!(processor.process_data(), processor.process_data());
        assert_eq!(a.size(), 8);
        assert_eq!(a.tag(), "a");
    }
}
