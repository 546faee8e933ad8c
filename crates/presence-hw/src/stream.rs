//! Camera worker thread and the wizard-facing media source.
//!
//! V4L2 capture is blocking, so the opened [`Camera`] lives on a dedicated OS
//! thread and async callers talk to it over a request channel. Dropping the
//! channel ends the thread, which closes the device.

use crate::camera::{Camera, CameraError};
use crate::frame::Frame;
use async_trait::async_trait;
use presence_core::{MediaError, MediaSource, Still};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub width: u32,
    pub height: u32,
    /// Frames discarded at the start of every snapshot (auto-exposure settling).
    pub warmup_frames: usize,
    /// Dark frames tolerated per snapshot before giving up.
    pub max_attempts: usize,
    pub jpeg_quality: u8,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            warmup_frames: 2,
            max_attempts: 5,
            jpeg_quality: 90,
        }
    }
}

enum CameraRequest {
    Snapshot {
        reply: oneshot::Sender<Result<Frame, CameraError>>,
    },
}

/// Handle to a camera owned by a worker thread.
pub struct CameraStream {
    tx: Option<mpsc::Sender<CameraRequest>>,
    thread: Option<std::thread::JoinHandle<()>>,
    device: String,
}

impl CameraStream {
    /// Open the device and start the worker thread.
    ///
    /// Opening happens on the calling thread so a missing or busy device
    /// fails here rather than on the first snapshot.
    pub fn spawn(device: &str, settings: StreamSettings) -> Result<Self, CameraError> {
        let camera = Camera::open(device, settings.width, settings.height)?;
        let (tx, mut rx) = mpsc::channel::<CameraRequest>(4);

        let thread = std::thread::Builder::new()
            .name("presence-camera".into())
            .spawn(move || {
                tracing::debug!("camera thread started");
                while let Some(req) = rx.blocking_recv() {
                    match req {
                        CameraRequest::Snapshot { reply } => {
                            let frame =
                                camera.capture_frame(settings.warmup_frames, settings.max_attempts);
                            let _ = reply.send(frame);
                        }
                    }
                }
                tracing::debug!("camera thread exiting");
            })
            .map_err(|e| CameraError::Io(format!("spawning camera thread: {e}")))?;

        Ok(Self {
            tx: Some(tx),
            thread: Some(thread),
            device: device.to_string(),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Capture one usable frame.
    pub async fn snapshot(&self) -> Result<Frame, CameraError> {
        let tx = self.tx.as_ref().ok_or(CameraError::ChannelClosed)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(CameraRequest::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| CameraError::ChannelClosed)?;
        reply_rx.await.map_err(|_| CameraError::ChannelClosed)?
    }

    /// Close the request channel and wait for the worker to release the device.
    pub fn stop(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!(device = %self.device, "camera thread panicked");
            }
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.stop();
    }
}

impl From<CameraError> for MediaError {
    fn from(err: CameraError) -> Self {
        match err {
            CameraError::NotFound(_)
            | CameraError::Busy(_)
            | CameraError::NotCapture(_)
            | CameraError::Format(_) => MediaError::Unavailable(err.to_string()),
            CameraError::Io(_)
            | CameraError::NoUsableFrame(_)
            | CameraError::ChannelClosed => MediaError::CaptureFailed(err.to_string()),
        }
    }
}

/// A V4L2 webcam as the capture wizard's media source.
///
/// The device is opened on `start` and fully released on `stop`.
pub struct V4lSource {
    device: String,
    settings: StreamSettings,
    stream: Option<CameraStream>,
}

impl V4lSource {
    /// A stopped source for the given device path.
    pub fn new(device: impl Into<String>, settings: StreamSettings) -> Self {
        Self {
            device: device.into(),
            settings,
            stream: None,
        }
    }
}

#[async_trait]
impl MediaSource for V4lSource {
    async fn start(&mut self) -> Result<(), MediaError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let device = self.device.clone();
        let settings = self.settings;
        let stream = tokio::task::spawn_blocking(move || CameraStream::spawn(&device, settings))
            .await
            .map_err(|e| MediaError::Unavailable(format!("camera open task failed: {e}")))??;
        self.stream = Some(stream);
        Ok(())
    }

    async fn snapshot(&mut self) -> Result<Still, MediaError> {
        let stream = self.stream.as_ref().ok_or(MediaError::NotStreaming)?;
        let frame = stream.snapshot().await?;
        tracing::debug!(
            seq = frame.sequence,
            brightness = frame.avg_brightness(),
            "snapshot captured"
        );
        frame
            .to_still(self.settings.jpeg_quality)
            .map_err(|e| MediaError::CaptureFailed(e.to_string()))
    }

    fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            tracing::info!(device = %self.device, "camera tracks stopped");
        }
    }

    fn is_live(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MISSING: &str = "/dev/presence-missing-video";

    #[tokio::test]
    async fn test_source_starts_stopped() {
        let mut source = V4lSource::new(MISSING, StreamSettings::default());
        assert!(!source.is_live());
        assert!(matches!(
            source.snapshot().await,
            Err(MediaError::NotStreaming)
        ));
        source.stop();
        assert!(!source.is_live());
    }

    #[tokio::test]
    async fn test_start_missing_device_is_unavailable() {
        let mut source = V4lSource::new(MISSING, StreamSettings::default());
        let err = source.start().await.unwrap_err();
        assert!(matches!(err, MediaError::Unavailable(_)));
        assert!(!source.is_live());
    }

    #[test]
    fn test_camera_error_mapping() {
        assert!(matches!(
            MediaError::from(CameraError::Busy("/dev/video0".into())),
            MediaError::Unavailable(_)
        ));
        assert!(matches!(
            MediaError::from(CameraError::NoUsableFrame(5)),
            MediaError::CaptureFailed(_)
        ));
    }
}
