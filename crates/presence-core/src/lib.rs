//! presence-core — Capture wizard and shared types for the attendance client.
//!
//! Holds the stepped face-capture state machine, the still-image and identity
//! types shared by every other crate, and the contracts for the two external
//! collaborators the wizard talks to: a camera surface and a face detector.

pub mod detector;
pub mod media;
pub mod types;
pub mod wizard;

pub use detector::{
    BoundingBox, DetectedFace, DetectionOptions, DetectorError, DetectorHandle, DetectorLoader,
    FaceDetector,
};
pub use media::{MediaError, MediaSource};
pub use types::{CapturedSample, Identity, Role, SampleId, Still, StillFormat};
pub use wizard::{
    CaptureFeedback, CaptureHandler, CaptureMode, CaptureStatus, CaptureWizard, Captured,
    FeedbackDetail, HandlerError, WizardConfig, WizardError, WizardSnapshot,
};
