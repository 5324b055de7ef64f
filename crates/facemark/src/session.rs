//! Ties capture, the detector and the detection loop together.
//!
//! The detector handle and overlay target are lent to the loop task while
//! capture is active and handed back when it exits, so a restart reuses the
//! same initialized engine.

use crate::controller::{CaptureController, CaptureState, StartOutcome};
use crate::detection_loop::{DetectionLoop, LoopExit, LoopStats, OverlayTarget};
use crate::refresh::RefreshSignal;
use facemark_core::{DetectorHandle, LandmarkEngine};
use facemark_hw::{CaptureError, CaptureHost, VideoSink};
use tokio::task::JoinHandle;

/// Why a running session stopped on its own.
#[derive(Debug)]
pub enum Ended {
    /// The detection loop exited, e.g. after a detector failure.
    Loop(Option<LoopStats>),
    /// The camera stream ended. Capture is back to Idle and the loop is
    /// winding down; `stop` reclaims it.
    Capture(CaptureError),
}

/// What a toggle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggled {
    Started(StartOutcome),
    Stopped,
}

pub struct Session<H: CaptureHost, E, T, R> {
    controller: CaptureController<H>,
    detector: Option<DetectorHandle<E>>,
    target: Option<T>,
    refresh: Box<dyn FnMut(VideoSink) -> R>,
    active: Option<JoinHandle<LoopExit<E, T>>>,
}

impl<H, E, T, R> Session<H, E, T, R>
where
    H: CaptureHost,
    E: LandmarkEngine + 'static,
    T: OverlayTarget + 'static,
    R: RefreshSignal + 'static,
{
    /// `refresh` builds a fresh refresh source for each capture run.
    pub fn new(
        controller: CaptureController<H>,
        target: T,
        refresh: impl FnMut(VideoSink) -> R + 'static,
    ) -> Self {
        Self {
            controller,
            detector: None,
            target: Some(target),
            refresh: Box::new(refresh),
            active: None,
        }
    }

    /// Hand over an initialized engine. Capture refuses to start before this.
    pub fn install_detector(&mut self, engine: E) {
        self.detector = Some(DetectorHandle::new(engine));
    }

    pub fn detector_ready(&self) -> bool {
        self.detector.is_some()
    }

    pub fn capture_state(&self) -> CaptureState {
        self.controller.state()
    }

    pub fn supports_capture(&self) -> bool {
        self.controller.supports_capture()
    }

    /// Start capture and the detection loop.
    ///
    /// Must run inside a `LocalSet`; the loop is spawned onto it.
    pub async fn start(&mut self) -> Result<StartOutcome, CaptureError> {
        if let Some(handle) = &self.active {
            if !handle.is_finished() {
                return Ok(StartOutcome::AlreadyActive);
            }
        }
        if self.reclaim().await.is_some() && self.controller.state() == CaptureState::Active {
            // The loop gave up on its own; release the camera before retrying.
            self.controller.stop();
        }

        let ready = self.detector.is_some() && self.target.is_some();
        let outcome = self.controller.start(ready).await?;
        if outcome != StartOutcome::Started {
            return Ok(outcome);
        }

        let (Some(detector), Some(target)) = (self.detector.take(), self.target.take()) else {
            return Ok(StartOutcome::NotReady);
        };
        let sink = self.controller.sink();
        let refresh = (self.refresh)(sink.clone());
        let detection = DetectionLoop::new(detector, target, refresh, sink, self.controller.subscribe());
        self.active = Some(tokio::task::spawn_local(detection.run()));
        Ok(outcome)
    }

    /// Stop capture and wait for the loop to hand back the detector.
    ///
    /// Returns the finished loop's counters, or None if nothing was running.
    pub async fn stop(&mut self) -> Option<LoopStats> {
        self.controller.stop();
        self.reclaim().await
    }

    pub async fn toggle(&mut self) -> Result<Toggled, CaptureError> {
        if self.controller.state() == CaptureState::Active {
            self.stop().await;
            Ok(Toggled::Stopped)
        } else {
            Ok(Toggled::Started(self.start().await?))
        }
    }

    /// Wait for the running loop to exit or the camera stream to end by
    /// itself. Pending forever if no loop is running. Cancel-safe.
    pub async fn wait(&mut self) -> Ended {
        let Some(handle) = self.active.as_mut() else {
            return std::future::pending().await;
        };
        tokio::select! {
            joined = handle => {
                self.active = None;
                Ended::Loop(self.restore(joined))
            }
            err = self.controller.stream_ended() => Ended::Capture(err),
        }
    }

    /// The overlay target, when no loop currently holds it.
    pub fn target(&self) -> Option<&T> {
        self.target.as_ref()
    }

    async fn reclaim(&mut self) -> Option<LoopStats> {
        let handle = self.active.take()?;
        let joined = handle.await;
        self.restore(joined)
    }

    fn restore(&mut self, joined: Result<LoopExit<E, T>, tokio::task::JoinError>) -> Option<LoopStats> {
        match joined {
            Ok(exit) => {
                self.detector = Some(exit.detector);
                self.target = Some(exit.target);
                Some(exit.stats)
            }
            Err(e) => {
                tracing::error!(error = %e, "detection loop task failed; detector lost");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::tests::{constraints, FakeHost, HostLog};
    use crate::detection_loop::tests::{frame, EngineLog, FakeEngine, RecordingTarget};
    use std::rc::Rc;
    use tokio::task::LocalSet;

    /// Publishes a new frame every tick, 16.7ms apart, forever.
    struct TickRefresh {
        sink: VideoSink,
        next_ts: f64,
    }

    impl RefreshSignal for TickRefresh {
        async fn next_refresh(&mut self) -> bool {
            tokio::task::yield_now().await;
            self.next_ts += 16.7;
            self.sink.publish(frame(self.next_ts));
            true
        }
    }

    type TestSession = Session<FakeHost, FakeEngine, RecordingTarget, TickRefresh>;

    fn session(supported: bool) -> (TestSession, Rc<HostLog>) {
        let (host, host_log) = FakeHost::new(supported);
        let controller = CaptureController::new(host, constraints());
        let session = Session::new(controller, RecordingTarget::default(), |sink: VideoSink| {
            sink.publish(frame(0.0));
            TickRefresh { sink, next_ts: 0.0 }
        });
        (session, host_log)
    }

    async fn engine() -> (FakeEngine, Rc<EngineLog>) {
        let log = Rc::new(EngineLog::default());
        (FakeEngine::initialize(Rc::clone(&log)).await.unwrap(), log)
    }

    async fn wait_for_detects(log: &EngineLog, n: usize) {
        while log.detect_calls.get() < n {
            log.entered.notified().await;
        }
    }

    #[tokio::test]
    async fn test_unsupported_host_never_touches_engine() {
        LocalSet::new()
            .run_until(async {
                let (mut s, host_log) = session(false);
                let (engine, log) = engine().await;
                s.install_detector(engine);

                assert_eq!(s.start().await.unwrap(), StartOutcome::Unsupported);
                assert_eq!(s.capture_state(), CaptureState::Idle);
                assert_eq!(host_log.requests.get(), 0);
                assert_eq!(log.detect_calls.get(), 0);
                assert_eq!(log.mode_switches.get(), 0);
                assert_eq!(s.stop().await, None);
            })
            .await;
    }

    #[tokio::test]
    async fn test_start_before_detector_is_refused() {
        LocalSet::new()
            .run_until(async {
                let (mut s, host_log) = session(true);
                assert_eq!(s.start().await.unwrap(), StartOutcome::NotReady);
                assert_eq!(host_log.requests.get(), 0);
            })
            .await;
    }

    #[tokio::test]
    async fn test_start_stop_restart_reuses_detector() {
        LocalSet::new()
            .run_until(async {
                let (mut s, host_log) = session(true);
                let (engine, log) = engine().await;
                s.install_detector(engine);

                assert_eq!(s.start().await.unwrap(), StartOutcome::Started);
                assert_eq!(s.start().await.unwrap(), StartOutcome::AlreadyActive);
                wait_for_detects(&log, 3).await;

                let stats = s.stop().await.unwrap();
                assert!(stats.detections >= 2);
                assert_eq!(s.capture_state(), CaptureState::Stopped);
                assert_eq!(host_log.tracks_released.get(), 1);
                assert!(s.detector_ready());
                assert!(s.target().unwrap().renders() >= 2);

                assert_eq!(s.start().await.unwrap(), StartOutcome::Started);
                let before = log.detect_calls.get();
                wait_for_detects(&log, before + 1).await;
                s.stop().await.unwrap();

                // The engine was switched to stream mode once, across both runs.
                assert_eq!(log.mode_switches.get(), 1);
                assert_eq!(host_log.requests.get(), 2);
            })
            .await;
    }

    #[tokio::test]
    async fn test_toggle_flips_capture() {
        LocalSet::new()
            .run_until(async {
                let (mut s, _host_log) = session(true);
                let (engine, _log) = engine().await;
                s.install_detector(engine);

                assert_eq!(s.toggle().await.unwrap(), Toggled::Started(StartOutcome::Started));
                assert_eq!(s.capture_state(), CaptureState::Active);
                assert_eq!(s.toggle().await.unwrap(), Toggled::Stopped);
                assert_eq!(s.capture_state(), CaptureState::Stopped);
            })
            .await;
    }

    #[tokio::test]
    async fn test_camera_ending_stops_loop_and_allows_restart() {
        LocalSet::new()
            .run_until(async {
                let (mut s, host_log) = session(true);
                let (engine, log) = engine().await;
                s.install_detector(engine);

                assert_eq!(s.start().await.unwrap(), StartOutcome::Started);
                wait_for_detects(&log, 2).await;

                host_log.end_stream("camera unplugged");
                let ended = s.wait().await;
                assert!(matches!(ended, Ended::Capture(CaptureError::Ended(_))));
                assert_eq!(s.capture_state(), CaptureState::Idle);

                let stats = s.stop().await.unwrap();
                assert!(stats.detections >= 1);
                assert!(s.detector_ready());
                assert_eq!(host_log.tracks_released.get(), 1);

                assert_eq!(s.start().await.unwrap(), StartOutcome::Started);
                assert_eq!(host_log.requests.get(), 2);
                s.stop().await.unwrap();
            })
            .await;
    }

    #[tokio::test]
    async fn test_denied_camera_keeps_detector() {
        LocalSet::new()
            .run_until(async {
                let (host, _host_log) = FakeHost::new(true);
                let mut host = host;
                host.deny = true;
                let controller = CaptureController::new(host, constraints());
                let mut s: TestSession =
                    Session::new(controller, RecordingTarget::default(), |sink: VideoSink| {
                        TickRefresh { sink, next_ts: 0.0 }
                    });
                let (engine, _log) = engine().await;
                s.install_detector(engine);

                assert!(matches!(s.start().await, Err(CaptureError::PermissionDenied(_))));
                assert_eq!(s.capture_state(), CaptureState::Idle);
                assert!(s.detector_ready());
            })
            .await;
    }
}
