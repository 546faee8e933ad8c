//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::{Capabilities, Flags};
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Fraction of near-black pixels above which a frame is discarded.
const DARK_FRAME_THRESHOLD: f32 = 0.95;
/// Mapped buffers per capture stream.
const BUFFER_COUNT: u32 = 4;
/// `/dev/video0` .. `/dev/video{N-1}` are probed by [`Camera::list_devices`].
const MAX_VIDEO_NODES: u32 = 16;
const EBUSY: i32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera at {0}")]
    NotFound(String),
    #[error("camera {0} is in use by another program")]
    Busy(String),
    #[error("{0} is not a video capture device")]
    NotCapture(String),
    #[error("unsupported camera format: {0}")]
    Format(String),
    #[error("camera i/o error: {0}")]
    Io(String),
    #[error("no usable frame after {0} attempts")]
    NoUsableFrame(usize),
    #[error("camera thread exited")]
    ChannelClosed,
}

/// A video capture node found by [`Camera::list_devices`].
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel layouts the camera can deliver that we know how to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed YUV 4:2:2, two bytes per pixel.
    Yuyv,
    /// Motion-JPEG: every buffer is a complete JPEG.
    Mjpg,
}

impl PixelFormat {
    pub fn fourcc(self) -> FourCC {
        match self {
            PixelFormat::Yuyv => FourCC::new(b"YUYV"),
            PixelFormat::Mjpg => FourCC::new(b"MJPG"),
        }
    }

    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        [PixelFormat::Yuyv, PixelFormat::Mjpg]
            .into_iter()
            .find(|f| f.fourcc() == fourcc)
    }
}

/// An opened webcam with a negotiated resolution and pixel format.
pub struct Camera {
    device: Device,
    path: String,
    pub width: u32,
    pub height: u32,
    format: PixelFormat,
}

impl Camera {
    /// Open `path` (e.g. "/dev/video0") and ask for `width`x`height` YUYV.
    /// Drivers that answer with MJPG are accepted too.
    pub fn open(path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(path).exists() {
            return Err(CameraError::NotFound(path.to_string()));
        }
        let device = Device::with_path(path).map_err(|e| match e.raw_os_error() {
            Some(EBUSY) => CameraError::Busy(path.to_string()),
            _ => CameraError::Io(format!("opening {path}: {e}")),
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::Io(format!("querying {path}: {e}")))?;
        if !is_capture_device(&caps) {
            return Err(CameraError::NotCapture(path.to_string()));
        }

        let mut wanted = device
            .format()
            .map_err(|e| CameraError::Format(format!("reading current format: {e}")))?;
        wanted.width = width;
        wanted.height = height;
        wanted.fourcc = PixelFormat::Yuyv.fourcc();
        let got = device
            .set_format(&wanted)
            .map_err(|e| CameraError::Format(format!("requesting {width}x{height} YUYV: {e}")))?;
        let format = PixelFormat::from_fourcc(got.fourcc).ok_or_else(|| {
            CameraError::Format(format!("driver offered {:?}, need YUYV or MJPG", got.fourcc))
        })?;

        tracing::info!(
            device = path,
            card = %caps.card,
            driver = %caps.driver,
            width = got.width,
            height = got.height,
            format = ?format,
            "camera opened"
        );

        Ok(Self {
            device,
            path: path.to_string(),
            width: got.width,
            height: got.height,
            format,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Start a stream, drop `warmup` frames while exposure settles, then
    /// return the first frame that is not almost entirely black.
    ///
    /// The stream is torn down again before returning.
    pub fn capture_frame(&self, warmup: usize, max_attempts: usize) -> Result<Frame, CameraError> {
        let dequeue = |e: std::io::Error| CameraError::Io(format!("dequeuing frame: {e}"));
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, BUFFER_COUNT)
            .map_err(|e| CameraError::Io(format!("mapping capture buffers: {e}")))?;

        for _ in 0..warmup {
            stream.next().map_err(dequeue)?;
        }

        for attempt in 1..=max_attempts {
            let (buf, meta) = stream.next().map_err(dequeue)?;
            let (data, width, height) = self.to_rgb(buf)?;
            if frame::is_dark_frame(&frame::luma(&data), DARK_FRAME_THRESHOLD) {
                tracing::debug!(attempt, seq = meta.sequence, "dark frame dropped");
                continue;
            }
            return Ok(Frame {
                data,
                width,
                height,
                captured_at: std::time::Instant::now(),
                sequence: meta.sequence,
            });
        }

        Err(CameraError::NoUsableFrame(max_attempts))
    }

    fn to_rgb(&self, buf: &[u8]) -> Result<(Vec<u8>, u32, u32), CameraError> {
        let converted = match self.format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height)
                .map(|rgb| (rgb, self.width, self.height)),
            PixelFormat::Mjpg => frame::mjpeg_to_rgb(buf),
        };
        converted.map_err(|e| CameraError::Io(format!("{:?} frame conversion: {e}", self.format)))
    }

    /// Video capture nodes currently present on the system.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_VIDEO_NODES)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                is_capture_device(&caps).then(|| DeviceInfo {
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                    path,
                })
            })
            .collect()
    }
}

fn is_capture_device(caps: &Capabilities) -> bool {
    caps.capabilities.contains(Flags::VIDEO_CAPTURE)
}
