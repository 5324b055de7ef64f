//! Webcam access over V4L2.
//!
//! A [`Camera`] is opened on the calling thread, then moved onto the capture
//! thread where [`Camera::stream_into`] pumps RGB frames into a [`VideoSink`].

use crate::frame::{self, Frame, FrameError};
use crate::sink::VideoSink;
use serde::Serialize;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::{Capabilities, Flags};
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// `/dev/video0` through `/dev/video15` are scanned when listing devices.
const MAX_DEVICE_INDEX: u32 = 16;

const STREAM_BUFFERS: u32 = 4;

/// EBUSY.
const ERRNO_BUSY: i32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera at {0}")]
    DeviceNotFound(String),
    #[error("not allowed to open {0}")]
    PermissionDenied(String),
    #[error("camera capture failed: {0}")]
    CaptureFailed(String),
    #[error("camera is in use by another process")]
    DeviceBusy,
    #[error("could not agree on a pixel format: {0}")]
    FormatNegotiationFailed(String),
    #[error("device does not support video capture")]
    StreamingNotSupported,
}

/// A capture device found by [`Camera::list_devices`].
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

impl DeviceInfo {
    fn from_caps(path: String, caps: Capabilities) -> Self {
        Self {
            path,
            name: caps.card,
            driver: caps.driver,
            bus: caps.bus,
        }
    }
}

/// Pixel layouts the camera may hand back after negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 4:2:2, what UVC webcams offer by default.
    Yuyv,
    Rgb24,
    Grey,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"RGB3" => Some(Self::Rgb24),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }

    /// Decode one raw buffer into packed RGB24.
    pub fn to_rgb(self, raw: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
        match self {
            Self::Yuyv => frame::yuyv_to_rgb(raw, width, height),
            Self::Grey => frame::grey_to_rgb(raw, width, height),
            Self::Rgb24 => {
                let expected = (width as usize) * (height as usize) * 3;
                // Drivers may pad the buffer; anything shorter is a torn frame.
                raw.get(..expected)
                    .map(<[u8]>::to_vec)
                    .ok_or(FrameError::InvalidLength {
                        format: "RGB24",
                        expected,
                        actual: raw.len(),
                    })
            }
        }
    }
}

pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub pixel_format: PixelFormat,
}

impl Camera {
    /// Open `device_path` and ask for YUYV at `width`×`height`.
    ///
    /// The driver has the last word on resolution and format; the negotiated
    /// values are what frames will carry.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        let device = open_device(device_path)?;
        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("query capabilities: {e}")))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }
        tracing::info!(device = device_path, card = %caps.card, driver = %caps.driver, "camera opened");

        let mut requested = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("read format: {e}")))?;
        requested.fourcc = FourCC::new(b"YUYV");
        requested.width = width;
        requested.height = height;
        let granted = device
            .set_format(&requested)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("set format: {e}")))?;

        let pixel_format = PixelFormat::from_fourcc(granted.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "driver offered {}, expected YUYV, RGB3 or GREY",
                granted.fourcc
            ))
        })?;

        if (granted.width, granted.height) != (width, height) {
            tracing::info!(
                requested_width = width,
                requested_height = height,
                width = granted.width,
                height = granted.height,
                "driver adjusted resolution"
            );
        }
        tracing::debug!(format = ?pixel_format, "pixel format negotiated");

        Ok(Self {
            device,
            width: granted.width,
            height: granted.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    /// Publish frames into `sink` until `stop` is raised.
    ///
    /// The sink holds only the newest frame, so a slow consumer skips frames
    /// rather than queueing them. Timestamps count from the start of the
    /// stream. Returns how many frames were published.
    pub fn stream_into(&self, sink: &VideoSink, stop: &AtomicBool) -> Result<u64, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("start mmap stream: {e}")))?;

        let epoch = Instant::now();
        let mut published = 0u64;
        while !stop.load(Ordering::Acquire) {
            let (raw, meta) = stream
                .next()
                .map_err(|e| CameraError::CaptureFailed(format!("dequeue: {e}")))?;

            let data = match self.pixel_format.to_rgb(raw, self.width, self.height) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(error = %e, sequence = meta.sequence, "dropping undecodable frame");
                    continue;
                }
            };
            sink.publish(Frame {
                data,
                width: self.width,
                height: self.height,
                timestamp_ms: epoch.elapsed().as_secs_f64() * 1000.0,
                sequence: meta.sequence,
            });
            published += 1;
        }
        Ok(published)
    }

    /// Every `/dev/videoN` that advertises video capture.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_DEVICE_INDEX)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities
                    .contains(Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo::from_caps(path, caps))
            })
            .collect()
    }
}

fn open_device(path: &str) -> Result<Device, CameraError> {
    if !Path::new(path).exists() {
        return Err(CameraError::DeviceNotFound(path.to_string()));
    }
    Device::with_path(path).map_err(|e| classify_open_error(path, e))
}

fn classify_open_error(path: &str, e: io::Error) -> CameraError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        CameraError::PermissionDenied(path.to_string())
    } else if e.raw_os_error() == Some(ERRNO_BUSY) {
        CameraError::DeviceBusy
    } else {
        CameraError::DeviceNotFound(format!("{path}: {e}"))
    }
}
