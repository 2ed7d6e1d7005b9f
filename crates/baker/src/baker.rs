//! The frame-sync driver.
//!
//! A bake runs on its own `baker-thread`. The thread owns every codec,
//! the compositor and the muxer, and works through a queue of
//! [`BakerMessage`]s: `Start` builds the pipeline, each `Frame` renders
//! one presentation tick and posts the next, and `Stop` finalizes the
//! output. Callers keep a [`BakeHandle`] to cancel or wait.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use glcv_codec::CodecBackend;
use glcv_common::clock::{ms_to_ns, ns_to_us, PresentationClock, SessionClock, NANOS_PER_MILLI};
use glcv_common::config::BakeDefaults;
use glcv_common::error::{GlcvError, GlcvResult};
use glcv_timeline::{MediaKind, TimeMask, UnitId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::compositor::Compositor;
use crate::decode::DecoderPool;
use crate::encode::{AudioProcessor, Recorder, RecorderStats};
use crate::mute::MuteCalculator;
use crate::probe::probe_media;
use crate::progress::{BakeProgress, ProgressPublisher};
use crate::request::{BakeRequest, EncoderConfig};

/// Something that can be asked to stop early.
pub trait Cancellable {
    fn cancel(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BakerMessage {
    Start,
    Frame,
    Stop,
}

/// Outcome of a bake that ended without error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BakeReport {
    pub output_path: PathBuf,
    pub frames_rendered: u64,
    pub video_samples: u64,
    pub audio_samples: u64,
    /// Speed-controller accepted frames per unit tag.
    pub decoder_frames: BTreeMap<String, u64>,
    /// False when the bake was cancelled.
    pub completed: bool,
    /// Wall-clock start, RFC 3339.
    pub started_at: String,
    pub elapsed_secs: f64,
}

impl BakeReport {
    pub fn decoder_frames_total(&self) -> u64 {
        self.decoder_frames.values().sum()
    }
}

pub struct Baker;

impl Baker {
    /// Validate `request` and start baking it on a new thread.
    pub fn bake(
        request: BakeRequest,
        backend: Arc<dyn CodecBackend>,
        publisher: Box<dyn ProgressPublisher>,
    ) -> GlcvResult<BakeHandle> {
        Self::bake_with_defaults(request, backend, publisher, &BakeDefaults::default())
    }

    /// Like [`bake`](Self::bake), with codec timeouts from `defaults`.
    pub fn bake_with_defaults(
        request: BakeRequest,
        backend: Arc<dyn CodecBackend>,
        publisher: Box<dyn ProgressPublisher>,
        defaults: &BakeDefaults,
    ) -> GlcvResult<BakeHandle> {
        request.validate()?;
        let config = request.encoder_config(defaults, backend.max_surface_size())?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        let worker = BakeWorker {
            request,
            config,
            backend,
            publisher,
            stop: stop.clone(),
            sender: sender.clone(),
        };
        let finished_flag = finished.clone();
        let thread = std::thread::Builder::new()
            .name("baker-thread".to_string())
            .spawn(move || {
                let result = worker.run(receiver);
                finished_flag.store(true, Ordering::SeqCst);
                result
            })?;

        sender
            .send(BakerMessage::Start)
            .map_err(|_| GlcvError::codec("Bake thread exited before start"))?;

        Ok(BakeHandle {
            canceller: BakeCanceller { sender, stop },
            finished,
            thread: Some(thread),
        })
    }
}

/// Cloneable cancel switch of one bake.
#[derive(Debug, Clone)]
pub struct BakeCanceller {
    sender: mpsc::UnboundedSender<BakerMessage>,
    stop: Arc<AtomicBool>,
}

impl BakeCanceller {
    pub fn is_cancelled(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

impl Cancellable for BakeCanceller {
    fn cancel(&self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Bake cancellation requested");
        // The worker may already be gone.
        let _ = self.sender.send(BakerMessage::Stop);
    }
}

/// Handle to a running bake.
#[derive(Debug)]
pub struct BakeHandle {
    canceller: BakeCanceller,
    finished: Arc<AtomicBool>,
    thread: Option<JoinHandle<GlcvResult<BakeReport>>>,
}

impl BakeHandle {
    pub fn canceller(&self) -> BakeCanceller {
        self.canceller.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Block until the bake thread exits.
    pub fn join(mut self) -> GlcvResult<BakeReport> {
        let thread = self
            .thread
            .take()
            .ok_or_else(|| GlcvError::protocol("Bake already joined"))?;
        thread
            .join()
            .map_err(|_| GlcvError::codec("Bake thread panicked"))?
    }

    /// Wait for the bake without blocking the async runtime.
    pub async fn wait(self) -> GlcvResult<BakeReport> {
        tokio::task::spawn_blocking(move || self.join())
            .await
            .map_err(|e| GlcvError::Other(anyhow::anyhow!("Bake wait failed: {e}")))?
    }
}

impl Cancellable for BakeHandle {
    fn cancel(&self) {
        self.canceller.cancel();
    }
}

struct BakeWorker {
    request: BakeRequest,
    config: EncoderConfig,
    backend: Arc<dyn CodecBackend>,
    publisher: Box<dyn ProgressPublisher>,
    stop: Arc<AtomicBool>,
    sender: mpsc::UnboundedSender<BakerMessage>,
}

impl BakeWorker {
    fn run(self, mut receiver: mpsc::UnboundedReceiver<BakerMessage>) -> GlcvResult<BakeReport> {
        let clock = SessionClock::start();
        let mut session: Option<BakeSession> = None;
        let mut stats = RecorderStats::default();
        let mut completed = false;

        while let Some(message) = receiver.blocking_recv() {
            match message {
                BakerMessage::Start => {
                    if session.is_some() {
                        tracing::warn!("Bake already started");
                        continue;
                    }
                    if self.is_stopping() {
                        tracing::debug!("Bake cancelled before start");
                        break;
                    }
                    match BakeSession::start(&self.request, &self.config, self.backend.as_ref()) {
                        Ok(started) => session = Some(started),
                        Err(e) => {
                            tracing::error!(error = %e, "Bake failed to start");
                            return Err(e);
                        }
                    }
                    self.post(BakerMessage::Frame);
                }
                BakerMessage::Frame => {
                    if self.is_stopping() {
                        tracing::trace!("Frame after cancel ignored");
                        continue;
                    }
                    let Some(active) = session.as_mut() else {
                        continue;
                    };
                    match active.generate_frame(self.publisher.as_ref(), &self.stop) {
                        Ok(true) => self.post(BakerMessage::Frame),
                        Ok(false) => {
                            stats = active.stop()?;
                            completed = true;
                            break;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Bake failed");
                            active.release();
                            return Err(e);
                        }
                    }
                }
                BakerMessage::Stop => {
                    if let Some(active) = session.as_mut() {
                        stats = active.stop()?;
                    }
                    break;
                }
            }
        }

        let report = BakeReport {
            output_path: self.request.output_path.clone(),
            frames_rendered: stats.frames_rendered,
            video_samples: stats.video_samples,
            audio_samples: stats.audio_samples,
            decoder_frames: session
                .as_ref()
                .map(|s| s.pool.frames_accepted())
                .unwrap_or_default(),
            completed,
            started_at: clock.epoch_wall().to_string(),
            elapsed_secs: clock.elapsed_secs(),
        };
        tracing::info!(
            output = %report.output_path.display(),
            frames = report.frames_rendered,
            completed = report.completed,
            elapsed_secs = report.elapsed_secs,
            "Bake finished"
        );
        Ok(report)
    }

    fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn post(&self, message: BakerMessage) {
        // The receiver lives on this thread for as long as we run.
        let _ = self.sender.send(message);
    }
}

/// Everything one bake builds on its thread.
struct BakeSession {
    mask: TimeMask,
    clock: PresentationClock,
    total_ns: i64,
    verbose: bool,
    compositor: Compositor,
    pool: DecoderPool,
    audio: AudioProcessor,
    recorder: Recorder,
    stopped: Option<RecorderStats>,
}

impl BakeSession {
    fn start(
        request: &BakeRequest,
        config: &EncoderConfig,
        backend: &dyn CodecBackend,
    ) -> GlcvResult<Self> {
        let template = &request.template;
        let mask = TimeMask::from_units(&template.units);
        let total_ns = ms_to_ns(mask.duration_ms()).ok_or_else(|| {
            GlcvError::timeline(format!("Timeline of {}ms is too long", mask.duration_ms()))
        })?;
        let mut compositor =
            Compositor::new(config.resolution(), template.aspect_ratio, request.viewport_color);
        let mut pool = DecoderPool::new();
        let mut audio = AudioProcessor::new();
        let mut mute = MuteCalculator::new();
        let settings = config.decoder_settings();

        for (index, unit) in template.units.iter().enumerate() {
            let id = UnitId(index);
            let metadata = probe_media(backend, &unit.source)?;
            match metadata.kind {
                MediaKind::Image => {
                    mute.add_entry(&unit.tag, true, false);
                    let image = image::open(&unit.source)
                        .map_err(|e| {
                            GlcvError::setup(format!(
                                "Cannot decode image {}: {e}",
                                unit.source.display()
                            ))
                        })?
                        .to_rgba8();
                    compositor.add_image_layer(id, &unit.tag, unit.z_position, unit.transform, image);
                }
                MediaKind::Video => {
                    let muted = mute.add_entry(&unit.tag, unit.muted_audio, metadata.has_audio);
                    let slot = pool.create_decoder(
                        id,
                        &unit.tag,
                        unit.source.clone(),
                        unit.start_clip_ms,
                        !muted,
                        settings,
                    );
                    compositor.add_video_layer(
                        id,
                        &unit.tag,
                        unit.z_position,
                        unit.transform,
                        slot,
                        metadata.orientation,
                    );
                }
            }
        }

        let audio_expected = mute.should_sound_at_least_one();
        let mut recorder = Recorder::new(config.clone(), audio_expected);
        recorder.raise_encoder(backend)?;
        if let Err(e) = pool.prepare(backend, &mut audio) {
            recorder.release();
            pool.release();
            return Err(e);
        }

        tracing::info!(
            units = template.units.len(),
            duration_ms = mask.duration_ms(),
            fps = config.fps,
            width = config.width,
            height = config.height,
            audio = audio_expected,
            "Bake started"
        );

        Ok(Self {
            total_ns,
            mask,
            clock: PresentationClock::new(config.fps),
            verbose: request.verbose,
            compositor,
            pool,
            audio,
            recorder,
            stopped: None,
        })
    }

    /// Render one tick. Returns false once the timeline is exhausted.
    fn generate_frame(
        &mut self,
        publisher: &dyn ProgressPublisher,
        stop: &AtomicBool,
    ) -> GlcvResult<bool> {
        let pts_ns = self.clock.tick();
        let t_ms = pts_ns / NANOS_PER_MILLI;
        let visibility = self.mask.visibility_at(t_ms);
        if self.verbose {
            let visible: Vec<&str> = visibility
                .visible_ids()
                .filter_map(|id| self.mask.tag_of(id))
                .collect();
            tracing::trace!(frame = self.clock.frame_index(), pts_ms = t_ms, ?visible, "Frame tick");
        }

        self.compositor.apply_visibility(&visibility);
        self.pool.advance(ns_to_us(pts_ns), &visibility)?;

        let has_frames = pts_ns <= self.total_ns;
        let progress = if self.total_ns > 0 {
            pts_ns as f64 / self.total_ns as f64
        } else {
            1.0
        };
        if !stop.load(Ordering::SeqCst) {
            publisher.publish(BakeProgress::video(progress as f32, !has_frames));
        }

        if has_frames {
            self.recorder
                .frame_available(pts_ns, &mut self.compositor, &self.audio)?;
        }
        Ok(has_frames)
    }

    /// Finalize the output and release the decoders. Runs at most once.
    fn stop(&mut self) -> GlcvResult<RecorderStats> {
        if let Some(stats) = self.stopped {
            return Ok(stats);
        }
        let result = self.recorder.stop_recording();
        self.pool.release();
        let stats = result?;
        self.stopped = Some(stats);
        Ok(stats)
    }

    /// Tear everything down without finalizing.
    fn release(&mut self) {
        self.recorder.release();
        self.pool.release();
    }
}
