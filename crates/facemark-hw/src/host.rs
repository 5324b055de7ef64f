//! Capture host: the seam between the capture controller and the camera.
//!
//! `CaptureHost` hands out `MediaStream`s the way a browser hands out
//! `MediaStream`s from `getUserMedia`; the V4L2 implementation backs each
//! stream with a dedicated capture thread.

use crate::camera::{Camera, CameraError};
use crate::probe;
use crate::sink::VideoSink;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;

/// How long `stop` waits for the capture thread before leaving it detached.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_millis(500);
const STOP_JOIN_POLL: Duration = Duration::from_millis(5);

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("camera busy")]
    Busy,
    #[error("capture worker failed: {0}")]
    Worker(String),
    #[error("camera stream ended: {0}")]
    Ended(String),
}

impl From<CameraError> for CaptureError {
    fn from(e: CameraError) -> Self {
        match e {
            CameraError::PermissionDenied(msg) => CaptureError::PermissionDenied(msg),
            CameraError::DeviceBusy => CaptureError::Busy,
            other => CaptureError::Unavailable(other.to_string()),
        }
    }
}

/// What to ask the host for when requesting a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConstraints {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

/// Set to the reason once a stream stops delivering frames on its own.
///
/// A closed channel with no reason means the producer went away silently.
pub type StreamEnd = watch::Receiver<Option<String>>;

/// A granted camera stream.
pub trait MediaStream {
    /// Start delivering frames into `sink`.
    fn attach(&mut self, sink: VideoSink) -> Result<(), CaptureError>;

    /// Reports an end the consumer did not ask for. A stream stopped via
    /// [`MediaStream::stop`] never reports one.
    fn ended(&self) -> StreamEnd;

    /// Stop every hardware track and release the device.
    ///
    /// Returns how many tracks were released by this call; a second call
    /// releases nothing.
    fn stop(&mut self) -> usize;
}

/// Host environment able to grant camera streams.
#[allow(async_fn_in_trait)]
pub trait CaptureHost {
    type Stream: MediaStream;

    /// Whether the host exposes camera access at all.
    fn supports_capture(&self) -> bool;

    /// Request a stream; suspends until the device is granted or refused.
    async fn request_stream(
        &mut self,
        constraints: &StreamConstraints,
    ) -> Result<Self::Stream, CaptureError>;
}

/// V4L2-backed capture host.
#[derive(Debug, Default, Clone, Copy)]
pub struct V4lHost;

impl CaptureHost for V4lHost {
    type Stream = V4lStream;

    fn supports_capture(&self) -> bool {
        probe::supports_capture()
    }

    async fn request_stream(
        &mut self,
        constraints: &StreamConstraints,
    ) -> Result<V4lStream, CaptureError> {
        let StreamConstraints {
            device,
            width,
            height,
        } = constraints.clone();

        let camera = tokio::task::spawn_blocking(move || Camera::open(&device, width, height))
            .await
            .map_err(|e| CaptureError::Worker(format!("camera open task failed: {e}")))??;

        let (end_tx, end_rx) = watch::channel(None);
        Ok(V4lStream {
            device_path: camera.device_path.clone(),
            camera: Some(camera),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            end_tx: Some(end_tx),
            end_rx,
        })
    }
}

/// A single-track V4L2 stream.
///
/// The camera is owned by the stream until attached, then by the capture
/// thread; dropping it on either side closes the device.
pub struct V4lStream {
    device_path: String,
    camera: Option<Camera>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    end_tx: Option<watch::Sender<Option<String>>>,
    end_rx: StreamEnd,
}

impl MediaStream for V4lStream {
    fn attach(&mut self, sink: VideoSink) -> Result<(), CaptureError> {
        let camera = self
            .camera
            .take()
            .ok_or_else(|| CaptureError::Worker("stream already attached or stopped".into()))?;
        let stop = Arc::clone(&self.stop);
        let end = self.end_tx.take();

        let handle = thread::Builder::new()
            .name("facemark-capture".into())
            .spawn(move || {
                tracing::info!(device = %camera.device_path, "capture thread started");
                match camera.stream_into(&sink, &stop) {
                    Ok(published) => {
                        tracing::info!(published, "capture thread exiting");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "capture thread failed");
                        if let Some(end) = end {
                            end.send_replace(Some(e.to_string()));
                        }
                    }
                }
            })
            .map_err(|e| CaptureError::Worker(format!("failed to spawn capture thread: {e}")))?;

        self.worker = Some(handle);
        Ok(())
    }

    fn ended(&self) -> StreamEnd {
        self.end_rx.clone()
    }

    /// Signals the capture thread and waits a bounded time for it. The
    /// thread dequeues at most one more buffer before it sees the flag, so
    /// one left detached still closes the device when it finishes.
    fn stop(&mut self) -> usize {
        self.stop.store(true, Ordering::Release);

        let mut released = 0;
        if let Some(handle) = self.worker.take() {
            match join_within(handle, STOP_JOIN_TIMEOUT) {
                Some(Ok(())) => {}
                Some(Err(_)) => {
                    tracing::warn!(device = %self.device_path, "capture thread panicked");
                }
                None => tracing::warn!(
                    device = %self.device_path,
                    timeout_ms = STOP_JOIN_TIMEOUT.as_millis() as u64,
                    "capture thread still running; leaving it to exit on its own"
                ),
            }
            released += 1;
        }
        if self.camera.take().is_some() {
            released += 1;
        }

        if released > 0 {
            tracing::info!(device = %self.device_path, "camera released");
        }
        released
    }
}

impl Drop for V4lStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Join `handle` if it finishes within `timeout`, or None if it is still
/// running, in which case it is left detached.
fn join_within(handle: JoinHandle<()>, timeout: Duration) -> Option<thread::Result<()>> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(STOP_JOIN_POLL);
    }
    Some(handle.join())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_errors_map_to_capture_errors() {
        assert!(matches!(
            CaptureError::from(CameraError::PermissionDenied("/dev/video0".into())),
            CaptureError::PermissionDenied(_)
        ));
        assert!(matches!(
            CaptureError::from(CameraError::DeviceBusy),
            CaptureError::Busy
        ));
        assert!(matches!(
            CaptureError::from(CameraError::DeviceNotFound("/dev/video9".into())),
            CaptureError::Unavailable(_)
        ));
    }

    #[test]
    fn test_join_within_finished_thread() {
        let quick = thread::spawn(|| thread::sleep(Duration::from_millis(10)));
        assert!(matches!(join_within(quick, Duration::from_secs(5)), Some(Ok(()))));

        let panicked = thread::spawn(|| panic!("capture failed"));
        assert!(matches!(join_within(panicked, Duration::from_secs(5)), Some(Err(_))));
    }

    #[test]
    fn test_join_within_gives_up_on_stuck_thread() {
        let (release, wait) = std::sync::mpsc::channel::<()>();
        let stuck = thread::spawn(move || {
            let _ = wait.recv();
        });
        let started = Instant::now();
        assert!(join_within(stuck, Duration::from_millis(30)).is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
        release.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_request_missing_device_is_unavailable() {
        let mut host = V4lHost;
        let constraints = StreamConstraints {
            device: "/dev/facemark-no-such-camera".into(),
            width: 640,
            height: 480,
        };
        let result = host.request_stream(&constraints).await;
        assert!(matches!(result, Err(CaptureError::Unavailable(_))));
    }
}
