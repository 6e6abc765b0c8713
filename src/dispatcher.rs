//! The streaming detection loop.
//!
//! One `DetectionDispatcher` exists per run. Each iteration takes a settings
//! snapshot, fetches a chunk, reassembles and decodes a frame, runs detection,
//! and delivers an annotated JPEG when something was found and a destination is
//! registered. Per-iteration failures never end the loop; they are reported as
//! `IterationOutcome::Failed` and retried after the regular pause.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::cancel::CancelToken;
use crate::detect::{DetectionResult, Detector};
use crate::frame::{decode_jpeg, encode_jpeg, FrameAssembler};
use crate::ingest::StreamSource;
use crate::settings::SharedConfig;
use crate::transport::DeliveryChannel;

pub const DEFAULT_PAUSE: Duration = Duration::from_millis(100);
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(2);
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Loop timing and output encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Pause between iterations.
    pub pause: Duration,
    /// Extra pause after a successful delivery.
    pub cooldown: Duration,
    pub jpeg_quality: u8,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            pause: DEFAULT_PAUSE,
            cooldown: DEFAULT_COOLDOWN,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// What a single iteration did.
#[derive(Debug)]
pub enum IterationOutcome {
    /// No complete, decodable frame was available.
    NoFrame,
    /// A frame was analysed and nothing passed the threshold.
    NoDetections,
    /// Objects were found but no destination is registered.
    Undelivered { detections: DetectionResult },
    /// An annotated frame was handed to the delivery channel.
    Delivered { detections: DetectionResult },
    /// Fetch, inference, encoding, or delivery failed.
    Failed(anyhow::Error),
    /// The run was cancelled while waiting on the stream.
    Cancelled,
}

impl IterationOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, IterationOutcome::Delivered { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, IterationOutcome::Failed(_))
    }
}

/// Counters for one run, shared with the supervisor.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    iterations: AtomicU64,
    frames: AtomicU64,
    detections: AtomicU64,
    deliveries: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of `DispatcherStats`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub iterations: u64,
    pub frames: u64,
    pub detections: u64,
    pub deliveries: u64,
    pub failures: u64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            iterations: self.iterations.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &IterationOutcome) {
        if matches!(outcome, IterationOutcome::Cancelled) {
            return;
        }
        self.iterations.fetch_add(1, Ordering::Relaxed);
        match outcome {
            IterationOutcome::Undelivered { detections } => {
                self.detections
                    .fetch_add(detections.len() as u64, Ordering::Relaxed);
            }
            IterationOutcome::Delivered { detections } => {
                self.detections
                    .fetch_add(detections.len() as u64, Ordering::Relaxed);
                self.deliveries.fetch_add(1, Ordering::Relaxed);
            }
            IterationOutcome::Failed(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

pub struct DetectionDispatcher {
    settings: SharedConfig,
    source: Box<dyn StreamSource>,
    detector: Box<dyn Detector>,
    delivery: Arc<dyn DeliveryChannel>,
    config: DispatcherConfig,
    assembler: FrameAssembler,
    stats: Arc<DispatcherStats>,
    cancel: CancelToken,
}

impl DetectionDispatcher {
    pub fn new(
        settings: SharedConfig,
        source: Box<dyn StreamSource>,
        detector: Box<dyn Detector>,
        delivery: Arc<dyn DeliveryChannel>,
        config: DispatcherConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            settings,
            source,
            detector,
            delivery,
            config,
            assembler: FrameAssembler::new(),
            stats: Arc::new(DispatcherStats::default()),
            cancel,
        }
    }

    /// Share counters with an existing stats handle.
    pub fn with_stats(mut self, stats: Arc<DispatcherStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<DispatcherStats> {
        Arc::clone(&self.stats)
    }

    /// Run one iteration. Errors are folded into `IterationOutcome::Failed`.
    pub async fn step(&mut self) -> IterationOutcome {
        let outcome = match self.try_step().await {
            Ok(outcome) => outcome,
            Err(err) => IterationOutcome::Failed(err),
        };
        self.stats.record(&outcome);
        outcome
    }

    async fn try_step(&mut self) -> Result<IterationOutcome> {
        let snapshot = self.settings.snapshot();

        let chunk = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(IterationOutcome::Cancelled),
            chunk = self.source.fetch(&snapshot.stream_url) => chunk?,
        };

        let Some(encoded) = self.assembler.push(&chunk) else {
            return Ok(IterationOutcome::NoFrame);
        };
        let Some(frame) = decode_jpeg(&encoded) else {
            return Ok(IterationOutcome::NoFrame);
        };
        self.stats.frames.fetch_add(1, Ordering::Relaxed);

        let detections = self
            .detector
            .infer(&frame, snapshot.threshold)
            .context("run detection")?;
        if detections.is_empty() {
            return Ok(IterationOutcome::NoDetections);
        }
        let Some(destination) = snapshot.destination else {
            return Ok(IterationOutcome::Undelivered { detections });
        };

        let annotated = self
            .detector
            .render(&frame, &detections)
            .context("annotate frame")?;
        let jpeg = encode_jpeg(&annotated, self.config.jpeg_quality)?;
        self.delivery
            .send_photo(destination, jpeg)
            .await
            .with_context(|| format!("deliver detections to chat {}", destination))?;
        // Frames queued during the cool-down would be stale; reconnect instead.
        self.source.reset();
        self.assembler.reset();
        Ok(IterationOutcome::Delivered { detections })
    }

    /// Wait before the next iteration.
    pub fn pause_after(&self, outcome: &IterationOutcome) -> Duration {
        match outcome {
            IterationOutcome::Delivered { .. } => self.config.cooldown + self.config.pause,
            IterationOutcome::Cancelled => Duration::ZERO,
            _ => self.config.pause,
        }
    }

    /// Iterate until the run is cancelled.
    pub async fn run(mut self) -> StatsSnapshot {
        log::info!(
            "detection dispatcher started (detector: {})",
            self.detector.name()
        );
        while !self.cancel.is_cancelled() {
            let outcome = self.step().await;
            log_outcome(&outcome);
            if matches!(outcome, IterationOutcome::Cancelled) {
                break;
            }
            let wait = self.pause_after(&outcome);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        let stats = self.stats.snapshot();
        log::info!(
            "detection dispatcher stopped after {} iterations ({} deliveries, {} failures)",
            stats.iterations,
            stats.deliveries,
            stats.failures
        );
        stats
    }
}

fn log_outcome(outcome: &IterationOutcome) {
    match outcome {
        IterationOutcome::NoFrame => log::debug!("no frame in chunk"),
        IterationOutcome::NoDetections => log::debug!("frame analysed, no detections"),
        IterationOutcome::Undelivered { detections } => log::info!(
            "detected {} but no destination is registered",
            detections.summary()
        ),
        IterationOutcome::Delivered { detections } => {
            log::info!("delivered frame with {}", detections.summary())
        }
        IterationOutcome::Failed(err) => log::warn!("detection iteration failed: {:#}", err),
        IterationOutcome::Cancelled => log::debug!("stream wait cancelled"),
    }
}
