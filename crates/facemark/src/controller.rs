//! Capture controller: owns the camera stream and the capture state.

use facemark_hw::{
    CaptureError, CaptureHost, MediaStream, StreamConstraints, StreamEnd, VideoSink,
};
use tokio::sync::watch;

/// Lifecycle of the camera stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Requesting,
    Active,
    Stopped,
}

/// What a start request did. Refusals are not errors: nothing was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyActive,
    /// The host has no camera capability.
    Unsupported,
    /// The detector is not initialized yet.
    NotReady,
}

pub struct CaptureController<H: CaptureHost> {
    host: H,
    constraints: StreamConstraints,
    sink: VideoSink,
    stream: Option<H::Stream>,
    ended: Option<StreamEnd>,
    state: watch::Sender<CaptureState>,
}

impl<H: CaptureHost> CaptureController<H> {
    pub fn new(host: H, constraints: StreamConstraints) -> Self {
        let (state, _rx) = watch::channel(CaptureState::Idle);
        Self {
            host,
            constraints,
            sink: VideoSink::new(),
            stream: None,
            ended: None,
            state,
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureState> {
        self.state.subscribe()
    }

    /// The sink attached streams publish into.
    pub fn sink(&self) -> VideoSink {
        self.sink.clone()
    }

    pub fn supports_capture(&self) -> bool {
        self.host.supports_capture()
    }

    /// Request the camera and attach it to the sink.
    ///
    /// Refuses without touching state when the host cannot capture or the
    /// detector is not ready. A refused or failed request returns to Idle.
    pub async fn start(&mut self, detector_ready: bool) -> Result<StartOutcome, CaptureError> {
        if !self.host.supports_capture() {
            tracing::warn!("camera capture is not supported on this host");
            return Ok(StartOutcome::Unsupported);
        }
        if !detector_ready {
            tracing::info!("detector not loaded yet; capture not started");
            return Ok(StartOutcome::NotReady);
        }
        if matches!(self.state(), CaptureState::Active | CaptureState::Requesting) {
            return Ok(StartOutcome::AlreadyActive);
        }

        self.set_state(CaptureState::Requesting);
        tracing::info!(device = %self.constraints.device, "requesting camera stream");

        let mut stream = match self.host.request_stream(&self.constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "camera request failed");
                self.set_state(CaptureState::Idle);
                return Err(e);
            }
        };

        if let Err(e) = stream.attach(self.sink.clone()) {
            tracing::warn!(error = %e, "failed to attach camera stream");
            stream.stop();
            self.set_state(CaptureState::Idle);
            return Err(e);
        }

        self.ended = Some(stream.ended());
        self.stream = Some(stream);
        self.set_state(CaptureState::Active);
        tracing::info!("capture active");
        Ok(StartOutcome::Started)
    }

    /// Stop all tracks and release the camera. No-op unless Active.
    ///
    /// Returns whether anything was stopped.
    pub fn stop(&mut self) -> bool {
        if self.state() != CaptureState::Active {
            return false;
        }
        let released = self.release();
        self.set_state(CaptureState::Stopped);
        tracing::info!(released, "capture stopped");
        true
    }

    /// Wait for the active stream to end without being asked to, e.g. an
    /// unplugged camera. The stream is then released, the sink cleared and
    /// the state returned to Idle so a new start can be attempted.
    ///
    /// Pending while no stream is active. Cancel-safe.
    pub async fn stream_ended(&mut self) -> CaptureError {
        let Some(ended) = self.ended.as_mut() else {
            return std::future::pending().await;
        };
        let reason = loop {
            if let Some(reason) = ended.borrow_and_update().clone() {
                break reason;
            }
            if ended.changed().await.is_err() {
                break ended
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| "capture worker exited".to_string());
            }
        };

        let released = self.release();
        self.set_state(CaptureState::Idle);
        tracing::warn!(reason = %reason, released, "camera stream ended");
        CaptureError::Ended(reason)
    }

    fn release(&mut self) -> usize {
        self.ended = None;
        let released = self.stream.take().map(|mut s| s.stop()).unwrap_or(0);
        self.sink.clear();
        released
    }

    fn set_state(&self, next: CaptureState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(from = ?prev, to = ?next, "capture state");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use facemark_hw::Frame;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::time::Duration;

    /// Counters shared between a fake host and the streams it hands out.
    #[derive(Default)]
    pub(crate) struct HostLog {
        pub requests: Cell<usize>,
        pub tracks_released: Cell<usize>,
        pub sink: RefCell<Option<VideoSink>>,
        /// Ends the most recently granted stream from the camera side.
        pub end: RefCell<Option<watch::Sender<Option<String>>>>,
    }

    impl HostLog {
        pub fn end_stream(&self, reason: &str) {
            if let Some(end) = self.end.borrow().as_ref() {
                end.send_replace(Some(reason.to_string()));
            }
        }
    }

    pub(crate) struct FakeStream {
        log: Rc<HostLog>,
        live: bool,
        ended: StreamEnd,
    }

    impl MediaStream for FakeStream {
        fn attach(&mut self, sink: VideoSink) -> Result<(), CaptureError> {
            *self.log.sink.borrow_mut() = Some(sink);
            Ok(())
        }

        fn ended(&self) -> StreamEnd {
            self.ended.clone()
        }

        fn stop(&mut self) -> usize {
            if !self.live {
                return 0;
            }
            self.live = false;
            self.log.tracks_released.set(self.log.tracks_released.get() + 1);
            1
        }
    }

    pub(crate) struct FakeHost {
        pub supported: bool,
        pub deny: bool,
        pub log: Rc<HostLog>,
    }

    impl FakeHost {
        pub fn new(supported: bool) -> (Self, Rc<HostLog>) {
            let log = Rc::new(HostLog::default());
            (
                Self {
                    supported,
                    deny: false,
                    log: Rc::clone(&log),
                },
                log,
            )
        }
    }

    impl CaptureHost for FakeHost {
        type Stream = FakeStream;

        fn supports_capture(&self) -> bool {
            self.supported
        }

        async fn request_stream(
            &mut self,
            _constraints: &StreamConstraints,
        ) -> Result<FakeStream, CaptureError> {
            self.log.requests.set(self.log.requests.get() + 1);
            if self.deny {
                return Err(CaptureError::PermissionDenied("user refused".into()));
            }
            let (end, ended) = watch::channel(None);
            *self.log.end.borrow_mut() = Some(end);
            Ok(FakeStream {
                log: Rc::clone(&self.log),
                live: true,
                ended,
            })
        }
    }

    pub(crate) fn constraints() -> StreamConstraints {
        StreamConstraints {
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
        }
    }

    #[tokio::test]
    async fn test_start_unsupported_is_noop() {
        let (host, log) = FakeHost::new(false);
        let mut controller = CaptureController::new(host, constraints());
        let outcome = controller.start(true).await.unwrap();
        assert_eq!(outcome, StartOutcome::Unsupported);
        assert_eq!(controller.state(), CaptureState::Idle);
        assert_eq!(log.requests.get(), 0);
    }

    #[tokio::test]
    async fn test_start_before_detector_ready_is_noop() {
        let (host, log) = FakeHost::new(true);
        let mut controller = CaptureController::new(host, constraints());
        let outcome = controller.start(false).await.unwrap();
        assert_eq!(outcome, StartOutcome::NotReady);
        assert_eq!(controller.state(), CaptureState::Idle);
        assert_eq!(log.requests.get(), 0);
    }

    #[tokio::test]
    async fn test_start_attaches_stream_to_sink() {
        let (host, log) = FakeHost::new(true);
        let mut controller = CaptureController::new(host, constraints());
        assert_eq!(controller.start(true).await.unwrap(), StartOutcome::Started);
        assert_eq!(controller.state(), CaptureState::Active);

        let attached = log.sink.borrow().clone().unwrap();
        attached.publish(Frame::from_rgb(vec![0; 3], 1, 1, 16.7).unwrap());
        assert_eq!(controller.sink().current().unwrap().timestamp_ms, 16.7);

        assert_eq!(controller.start(true).await.unwrap(), StartOutcome::AlreadyActive);
        assert_eq!(log.requests.get(), 1);
    }

    #[tokio::test]
    async fn test_denied_request_returns_to_idle() {
        let (mut host, log) = FakeHost::new(true);
        host.deny = true;
        let mut controller = CaptureController::new(host, constraints());
        let mut states = controller.subscribe();

        let result = controller.start(true).await;
        assert!(matches!(result, Err(CaptureError::PermissionDenied(_))));
        assert_eq!(controller.state(), CaptureState::Idle);
        assert!(states.has_changed().unwrap());
        assert_eq!(log.requests.get(), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (host, log) = FakeHost::new(true);
        let mut controller = CaptureController::new(host, constraints());
        controller.start(true).await.unwrap();
        controller
            .sink()
            .publish(Frame::from_rgb(vec![0; 3], 1, 1, 1.0).unwrap());

        assert!(controller.stop());
        assert_eq!(controller.state(), CaptureState::Stopped);
        assert!(controller.sink().current().is_none());

        assert!(!controller.stop());
        assert_eq!(controller.state(), CaptureState::Stopped);
        assert_eq!(log.tracks_released.get(), 1);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let (host, log) = FakeHost::new(true);
        let mut controller = CaptureController::new(host, constraints());
        controller.start(true).await.unwrap();
        controller.stop();
        assert_eq!(controller.start(true).await.unwrap(), StartOutcome::Started);
        assert_eq!(controller.state(), CaptureState::Active);
        assert_eq!(log.requests.get(), 2);
    }

    #[tokio::test]
    async fn test_stream_ending_on_its_own_leaves_active() {
        let (host, log) = FakeHost::new(true);
        let mut controller = CaptureController::new(host, constraints());
        controller.start(true).await.unwrap();
        let mut states = controller.subscribe();
        controller
            .sink()
            .publish(Frame::from_rgb(vec![0; 3], 1, 1, 1.0).unwrap());

        log.end_stream("dequeue: No such device");
        let err = controller.stream_ended().await;
        assert!(matches!(err, CaptureError::Ended(ref reason) if reason.contains("No such device")));
        assert_eq!(controller.state(), CaptureState::Idle);
        assert!(states.has_changed().unwrap());
        assert!(controller.sink().current().is_none());
        assert_eq!(log.tracks_released.get(), 1);

        // Nothing left to end, and a fresh start works.
        let again = tokio::time::timeout(Duration::from_millis(20), controller.stream_ended()).await;
        assert!(again.is_err());
        assert!(!controller.stop());
        assert_eq!(controller.start(true).await.unwrap(), StartOutcome::Started);
        assert_eq!(log.requests.get(), 2);
    }

    #[tokio::test]
    async fn test_stream_producer_vanishing_counts_as_ended() {
        let (host, log) = FakeHost::new(true);
        let mut controller = CaptureController::new(host, constraints());
        controller.start(true).await.unwrap();

        log.end.borrow_mut().take();
        let err = controller.stream_ended().await;
        assert!(matches!(err, CaptureError::Ended(_)));
        assert_eq!(controller.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_stop_does_not_report_an_end() {
        let (host, log) = FakeHost::new(true);
        let mut controller = CaptureController::new(host, constraints());
        controller.start(true).await.unwrap();
        controller.stop();
        log.end_stream("late failure");
        let waited = tokio::time::timeout(Duration::from_millis(20), controller.stream_ended()).await;
        assert!(waited.is_err());
        assert_eq!(controller.state(), CaptureState::Stopped);
    }
}
