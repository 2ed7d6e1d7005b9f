//! Bake progress events and the sinks they are published to.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Stage a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodeTarget {
    Video,
    /// Reserved for a separate audio mix stage.
    Audio,
}

/// Progress of a bake.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BakeProgress {
    pub target: EncodeTarget,
    /// Fraction done in `[0, 1]`.
    pub progress: f32,
    pub completed: bool,
}

impl BakeProgress {
    pub fn video(progress: f32, completed: bool) -> Self {
        Self {
            target: EncodeTarget::Video,
            progress: if progress.is_finite() {
                progress.clamp(0.0, 1.0)
            } else {
                0.0
            },
            completed,
        }
    }

    pub fn percent(&self) -> f32 {
        self.progress * 100.0
    }
}

/// Receives progress on the bake thread, synchronously, once per frame.
pub trait ProgressPublisher: Send {
    fn publish(&self, progress: BakeProgress);
}

/// Callback invoked with every progress update.
pub type ProgressCallback = Box<dyn Fn(BakeProgress) + Send>;

pub struct CallbackPublisher {
    callback: ProgressCallback,
}

impl CallbackPublisher {
    pub fn new(callback: impl Fn(BakeProgress) + Send + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl ProgressPublisher for CallbackPublisher {
    fn publish(&self, progress: BakeProgress) {
        (self.callback)(progress);
    }
}

/// Fans progress out to any number of subscribers. A subscriber
/// unsubscribes by dropping its receiver.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<BakeProgress>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BakeProgress> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressPublisher for BroadcastPublisher {
    fn publish(&self, progress: BakeProgress) {
        // No subscribers is fine.
        let _ = self.sender.send(progress);
    }
}

/// Discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

impl ProgressPublisher for NullPublisher {
    fn publish(&self, _progress: BakeProgress) {}
}
