//! The landmark engine capability and the handle the detection loop drives.

use crate::model::ModelResolveError;
use crate::types::{Delegate, DetectionResult, RunningMode};
use thiserror::Error;

/// The engine could not be brought up. Fatal to capture.
#[derive(Error, Debug)]
pub enum InitializationError {
    #[error("model asset unavailable: {0}")]
    ModelUnavailable(#[from] ModelResolveError),
    #[error("no model configured; set a model path or URL")]
    NoModelConfigured,
    #[error("delegate '{0}' is not available on this machine")]
    DelegateUnavailable(Delegate),
    #[error("model rejected: {0}")]
    InvalidModel(String),
    #[error("engine setup task failed: {0}")]
    Task(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A single detect (or mode switch) call failed. Never fatal to the loop.
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("timestamp {timestamp_ms}ms precedes previous {previous_ms}ms in stream mode")]
    NonMonotonicTimestamp { timestamp_ms: f64, previous_ms: f64 },
    #[error("frame buffer is {actual} bytes, expected {expected}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("malformed engine output: {0}")]
    MalformedOutput(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// An opaque face-landmark engine.
///
/// Calls are issued one at a time from a single task; implementations may
/// assume `detect` and `set_mode` never overlap.
#[allow(async_fn_in_trait)]
pub trait LandmarkEngine: Sized {
    type Config;

    /// Bring the engine up. May suspend for a long time (download, compile).
    async fn initialize(config: Self::Config) -> Result<Self, InitializationError>;

    /// Mode the engine is currently configured for.
    fn running_mode(&self) -> RunningMode;

    /// Reconfigure the engine. Must complete before the next `detect`.
    async fn set_mode(&mut self, mode: RunningMode) -> Result<(), DetectionError>;

    /// Detect faces in a packed RGB24 frame.
    ///
    /// In [`RunningMode::Stream`], `timestamp_ms` must not decrease between
    /// calls; engines reject a decreasing timestamp with
    /// [`DetectionError::NonMonotonicTimestamp`].
    async fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        timestamp_ms: f64,
    ) -> Result<DetectionResult, DetectionError>;
}

/// An initialized engine together with the mode the loop has put it in.
pub struct DetectorHandle<E> {
    engine: E,
    mode: RunningMode,
}

impl<E: LandmarkEngine> DetectorHandle<E> {
    pub fn new(engine: E) -> Self {
        let mode = engine.running_mode();
        Self { engine, mode }
    }

    pub fn mode(&self) -> RunningMode {
        self.mode
    }

    /// Switch to stream mode if still in image mode.
    ///
    /// Returns true when a switch was performed. Once in stream mode this is
    /// a no-op, so calling it on every tick switches exactly once.
    pub async fn ensure_stream_mode(&mut self) -> Result<bool, DetectionError> {
        if self.mode == RunningMode::Stream {
            return Ok(false);
        }
        self.engine.set_mode(RunningMode::Stream).await?;
        self.mode = RunningMode::Stream;
        tracing::info!("detector switched to stream mode");
        Ok(true)
    }

    pub async fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        timestamp_ms: f64,
    ) -> Result<DetectionResult, DetectionError> {
        self.engine.detect(rgb, width, height, timestamp_ms).await
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn into_inner(self) -> E {
        self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingEngine {
        mode: RunningMode,
        mode_switches: usize,
        fail_switch: bool,
    }

    impl LandmarkEngine for CountingEngine {
        type Config = bool;

        async fn initialize(fail_switch: bool) -> Result<Self, InitializationError> {
            Ok(Self {
                mode: RunningMode::Image,
                mode_switches: 0,
                fail_switch,
            })
        }

        fn running_mode(&self) -> RunningMode {
            self.mode
        }

        async fn set_mode(&mut self, mode: RunningMode) -> Result<(), DetectionError> {
            if self.fail_switch {
                return Err(DetectionError::InferenceFailed("switch refused".into()));
            }
            self.mode = mode;
            self.mode_switches += 1;
            Ok(())
        }

        async fn detect(
            &mut self,
            _rgb: &[u8],
            _width: u32,
            _height: u32,
            _timestamp_ms: f64,
        ) -> Result<DetectionResult, DetectionError> {
            Ok(DetectionResult::empty())
        }
    }

    #[tokio::test]
    async fn test_ensure_stream_mode_switches_once() {
        let mut handle = DetectorHandle::new(CountingEngine::initialize(false).await.unwrap());
        assert_eq!(handle.mode(), RunningMode::Image);

        assert!(handle.ensure_stream_mode().await.unwrap());
        for _ in 0..10 {
            assert!(!handle.ensure_stream_mode().await.unwrap());
        }

        assert_eq!(handle.mode(), RunningMode::Stream);
        assert_eq!(handle.engine().mode_switches, 1);
    }

    #[tokio::test]
    async fn test_failed_switch_leaves_image_mode() {
        let mut handle = DetectorHandle::new(CountingEngine::initialize(true).await.unwrap());
        assert!(handle.ensure_stream_mode().await.is_err());
        assert_eq!(handle.mode(), RunningMode::Image);
    }
}
