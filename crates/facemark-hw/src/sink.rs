//! The video sink: a single-slot holder for the newest decoded frame.

use crate::frame::Frame;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared slot exposing the newest frame of an attached stream.
///
/// Producers overwrite the slot; readers always see the latest frame and
/// never a backlog. Cloning yields another handle onto the same slot.
#[derive(Clone)]
pub struct VideoSink {
    tx: Arc<watch::Sender<Option<Arc<Frame>>>>,
}

impl VideoSink {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the current frame.
    pub fn publish(&self, frame: Frame) {
        self.tx.send_replace(Some(Arc::new(frame)));
    }

    /// The newest frame, if any has been published since the last clear.
    pub fn current(&self) -> Option<Arc<Frame>> {
        self.tx.borrow().clone()
    }

    /// Drop the held frame (stream detached).
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// Subscribe to frame-change notifications.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Frame>>> {
        self.tx.subscribe()
    }
}

impl Default for VideoSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ts: f64) -> Frame {
        Frame::from_rgb(vec![0; 3], 1, 1, ts).unwrap()
    }

    #[test]
    fn test_sink_starts_empty() {
        assert!(VideoSink::new().current().is_none());
    }

    #[test]
    fn test_sink_keeps_only_newest() {
        let sink = VideoSink::new();
        sink.publish(frame(1.0));
        sink.publish(frame(2.0));
        assert_eq!(sink.current().unwrap().timestamp_ms, 2.0);
    }

    #[test]
    fn test_clones_share_slot() {
        let sink = VideoSink::new();
        let reader = sink.clone();
        sink.publish(frame(33.3));
        assert_eq!(reader.current().unwrap().timestamp_ms, 33.3);
        sink.clear();
        assert!(reader.current().is_none());
    }

    #[tokio::test]
    async fn test_subscriber_notified_on_publish() {
        let sink = VideoSink::new();
        let mut rx = sink.subscribe();
        sink.publish(frame(5.0));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().unwrap().timestamp_ms, 5.0);
    }
}
