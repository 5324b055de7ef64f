//! facemark-hw — Hardware abstraction for live camera capture.
//!
//! Provides V4L2-based camera access, RGB frame conversion, the capability
//! probe, and the capture host that hands out live media streams.

pub mod camera;
pub mod frame;
pub mod host;
pub mod probe;
pub mod sink;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use host::{
    CaptureError, CaptureHost, MediaStream, StreamConstraints, StreamEnd, V4lHost, V4lStream,
};
pub use probe::supports_capture;
pub use sink::VideoSink;
