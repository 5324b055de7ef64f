//! Per-frame detection loop.
//!
//! While capture is active, each refresh tick takes the newest frame from the
//! video sink, runs detection at most once per new frame, and hands the
//! result to the overlay target. Ticks are strictly sequential: the loop owns
//! the detector handle by value, so a detect or mode switch can never overlap
//! another.

use crate::controller::CaptureState;
use crate::refresh::RefreshSignal;
use facemark_core::{DetectionResult, DetectorHandle, LandmarkEngine};
use facemark_hw::VideoSink;
use tokio::sync::watch;

/// Scheduling state of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    NotRunning,
    Scheduled,
    Running,
}

/// Where results go: the render surface and its companions.
pub trait OverlayTarget {
    /// Match the surface to the frame. Called before any drawing each tick.
    fn resize(&mut self, width: u32, height: u32);

    fn render(&mut self, result: &DetectionResult);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub detections: u64,
    /// Ticks that reused the previous result because the frame had not advanced.
    pub reused: u64,
    pub failures: u64,
    pub renders: u64,
    /// Results dropped because capture stopped while detect was pending.
    pub discarded: u64,
}

/// What the loop hands back when it exits.
pub struct LoopExit<E, T> {
    pub detector: DetectorHandle<E>,
    pub target: T,
    pub stats: LoopStats,
}

enum Tick {
    /// Rendered, reused or failed; keep going.
    Continue,
    /// Capture went away or detection cannot proceed.
    Halt,
}

pub struct DetectionLoop<E, T, R> {
    detector: DetectorHandle<E>,
    target: T,
    refresh: R,
    sink: VideoSink,
    capture: watch::Receiver<CaptureState>,
    state: watch::Sender<LoopState>,
    last_seen_ms: Option<f64>,
    last_result: Option<DetectionResult>,
    stats: LoopStats,
}

impl<E, T, R> DetectionLoop<E, T, R>
where
    E: LandmarkEngine,
    T: OverlayTarget,
    R: RefreshSignal,
{
    pub fn new(
        detector: DetectorHandle<E>,
        target: T,
        refresh: R,
        sink: VideoSink,
        capture: watch::Receiver<CaptureState>,
    ) -> Self {
        let (state, _rx) = watch::channel(LoopState::NotRunning);
        Self {
            detector,
            target,
            refresh,
            sink,
            capture,
            state,
            last_seen_ms: None,
            last_result: None,
            stats: LoopStats::default(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Run until capture leaves Active (or the refresh source ends).
    pub async fn run(mut self) -> LoopExit<E, T> {
        self.state.send_replace(LoopState::Scheduled);

        while self.capture_active() {
            self.state.send_replace(LoopState::Running);
            if let Tick::Halt = self.tick().await {
                break;
            }
            if !self.capture_active() {
                break;
            }
            self.state.send_replace(LoopState::Scheduled);
            // A capture change ends the wait early so a stop is seen at once.
            let more = tokio::select! {
                more = self.refresh.next_refresh() => more,
                changed = self.capture.changed() => changed.is_ok(),
            };
            if !more {
                tracing::debug!("refresh source ended");
                break;
            }
        }

        self.state.send_replace(LoopState::NotRunning);
        let stats = self.stats;
        tracing::info!(
            ticks = stats.ticks,
            detections = stats.detections,
            reused = stats.reused,
            failures = stats.failures,
            renders = stats.renders,
            discarded = stats.discarded,
            "detection loop stopped"
        );

        LoopExit {
            detector: self.detector,
            target: self.target,
            stats,
        }
    }

    async fn tick(&mut self) -> Tick {
        self.stats.ticks += 1;

        let Some(frame) = self.sink.current() else {
            tracing::trace!("no frame yet");
            return Tick::Continue;
        };

        self.target.resize(frame.width, frame.height);

        if let Err(e) = self.detector.ensure_stream_mode().await {
            tracing::error!(error = %e, "failed to switch detector to stream mode");
            return Tick::Halt;
        }
        if !self.capture_active() {
            return Tick::Halt;
        }

        if self.last_seen_ms != Some(frame.timestamp_ms) {
            self.last_seen_ms = Some(frame.timestamp_ms);
            let outcome = self
                .detector
                .detect(&frame.data, frame.width, frame.height, frame.timestamp_ms)
                .await;

            if !self.capture_active() {
                self.stats.discarded += 1;
                tracing::debug!("capture stopped during detect; result discarded");
                return Tick::Halt;
            }

            match outcome {
                Ok(result) => {
                    self.stats.detections += 1;
                    self.last_result = Some(result);
                }
                Err(e) => {
                    self.stats.failures += 1;
                    tracing::warn!(error = %e, timestamp_ms = frame.timestamp_ms, "detection failed");
                    return Tick::Continue;
                }
            }
        } else {
            self.stats.reused += 1;
        }

        if let Some(result) = &self.last_result {
            self.target.render(result);
            self.stats.renders += 1;
        }
        Tick::Continue
    }

    fn capture_active(&mut self) -> bool {
        *self.capture.borrow_and_update() == CaptureState::Active
    }
}
