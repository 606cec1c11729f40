//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, Frame};
use serde::Serialize;
use std::io;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Number of mmap buffers queued while streaming.
const STREAM_BUFFERS: u32 = 4;

/// Name fragments that suggest a regular colour webcam.
const PREFERRED_NAME_HINTS: [&str; 5] = ["rgb", "hd", "integrated", "facetime", "front"];

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

impl CameraError {
    /// Actionable message for the person operating the camera.
    pub fn user_hint(&self) -> &'static str {
        match self {
            CameraError::FormatNegotiationFailed(_) => {
                "That camera isn't available at the requested resolution. Try another camera."
            }
            CameraError::PermissionDenied(_) => {
                "Camera permission denied. Add your user to the 'video' group or fix the device permissions."
            }
            _ => {
                "Could not access the camera. Close other apps that may be using it, or try another camera."
            }
        }
    }

    /// Busy and permission failures, whichever call reported them.
    fn access(device_path: &str, err: &io::Error) -> Option<Self> {
        match err.raw_os_error() {
            Some(16) => Some(CameraError::DeviceBusy), // EBUSY
            _ if err.kind() == io::ErrorKind::PermissionDenied => {
                Some(CameraError::PermissionDenied(device_path.to_string()))
            }
            _ => None,
        }
    }

    fn from_open(device_path: &str, err: io::Error) -> Self {
        Self::access(device_path, &err).unwrap_or_else(|| match err.kind() {
            io::ErrorKind::NotFound => CameraError::DeviceNotFound(device_path.to_string()),
            _ => CameraError::DeviceNotFound(format!("{device_path}: {err}")),
        })
    }

    /// Format or buffer setup failure. A camera held by another process
    /// usually fails here rather than at open.
    fn from_setup(device_path: &str, err: io::Error, otherwise: impl FnOnce(io::Error) -> Self) -> Self {
        Self::access(device_path, &err).unwrap_or_else(|| otherwise(err))
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

impl DeviceInfo {
    fn looks_infrared(&self) -> bool {
        let name = self.name.to_lowercase();
        name.contains("infrared") || name.split(|c: char| !c.is_alphanumeric()).any(|w| w == "ir")
    }
}

/// Pick the device most likely to be a colour, user-facing webcam.
///
/// Prefers a name hinting at RGB/HD/integrated/front cameras (and never an IR
/// sensor), then falls back to the first device.
pub fn preferred_device(devices: &[DeviceInfo]) -> Option<&DeviceInfo> {
    devices
        .iter()
        .find(|d| {
            let name = d.name.to_lowercase();
            !d.looks_infrared() && PREFERRED_NAME_HINTS.iter().any(|hint| name.contains(hint))
        })
        .or_else(|| devices.first())
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion JPEG, one JPEG image per buffer.
    Mjpg,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(PixelFormat::Yuyv)
        } else if fourcc == FourCC::new(b"MJPG") {
            Some(PixelFormat::Mjpg)
        } else {
            None
        }
    }
}

/// V4L2 camera device handle. Dropping it releases the device.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera (e.g. "/dev/video0") and negotiate `width`×`height`.
    ///
    /// YUYV is requested; MJPG is accepted when the driver offers only that
    /// at the requested size.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| CameraError::from_open(device_path, e))?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::from_setup(device_path, e, |e| {
                CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
            })
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::from_setup(device_path, e, |e| {
                CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
            })
        })?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV or MJPG)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc: negotiated.fourcc,
            pixel_format,
        })
    }

    /// Open the preferred device among those currently attached.
    pub fn open_preferred(width: u32, height: u32) -> Result<Self, CameraError> {
        let devices = Self::list_devices();
        let device = preferred_device(&devices)
            .ok_or_else(|| CameraError::DeviceNotFound("no video capture devices".to_string()))?;
        tracing::info!(device = %device.path, name = %device.name, "auto-selected camera");
        Self::open(&device.path, width, height)
    }

    /// Frames per second reported by the driver, if known.
    pub fn fps(&self) -> Option<f32> {
        let params = self.device.params().ok()?;
        let interval = params.interval;
        (interval.numerator > 0).then(|| interval.denominator as f32 / interval.numerator as f32)
    }

    /// Start streaming. The stream borrows the camera; drop it to stop.
    pub fn stream(&self) -> Result<FrameStream<'_>, CameraError> {
        let inner = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS).map_err(|e| {
            CameraError::from_setup(&self.device_path, e, |e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })
        })?;
        Ok(FrameStream { camera: self, inner })
    }

    /// Capture a single frame on a short-lived stream.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        self.stream()?.next_frame()
    }

    /// Convert a raw buffer to RGB based on the negotiated format.
    fn buf_to_rgb(&self, buf: &[u8]) -> Result<image::RgbImage, CameraError> {
        let converted = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height),
            PixelFormat::Mjpg => frame::mjpeg_to_rgb(buf),
        };
        converted.map_err(|e| CameraError::CaptureFailed(format!("{:?} conversion failed: {e}", self.pixel_format)))
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

/// An active capture stream on a [`Camera`].
pub struct FrameStream<'a> {
    camera: &'a Camera,
    inner: MmapStream<'a>,
}

impl FrameStream<'_> {
    /// Block until the next frame is available and convert it to RGB.
    pub fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .inner
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;
        let image = self.camera.buf_to_rgb(buf)?;
        Ok(Frame {
            image,
            timestamp: Instant::now(),
            sequence,
        })
    }
}
