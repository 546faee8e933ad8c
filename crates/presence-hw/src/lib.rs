//! presence-hw — Webcam access for the capture wizard.
//!
//! Provides V4L2-based camera capture, pixel conversion to JPEG stills,
//! and a [`presence_core::MediaSource`] implementation backed by a camera
//! worker thread.

pub mod camera;
pub mod frame;
pub mod stream;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use stream::{CameraStream, StreamSettings, V4lSource};
