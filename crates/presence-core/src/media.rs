//! Camera surface contract used by the capture wizard.

use crate::types::Still;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("camera is not streaming")]
    NotStreaming,
}

/// A live video source the wizard can pull still frames from.
///
/// While live, the source holds the underlying device exclusively.
/// `stop` must release it before returning.
#[async_trait]
pub trait MediaSource: Send {
    /// Acquire the device and begin streaming.
    async fn start(&mut self) -> Result<(), MediaError>;

    /// Grab one encoded still from the live stream.
    async fn snapshot(&mut self) -> Result<Still, MediaError>;

    /// Stop all tracks and release the device. No-op when already stopped.
    fn stop(&mut self);

    fn is_live(&self) -> bool;
}
