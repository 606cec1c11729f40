//! rememberme-hw — Webcam access for the recognition loop.
//!
//! Provides V4L2 device discovery, camera selection, continuous RGB capture
//! and lightweight capture diagnostics.

pub mod camera;
pub mod frame;

pub use camera::{preferred_device, Camera, CameraError, DeviceInfo, FrameStream, PixelFormat};
pub use frame::{Frame, FrameError};
