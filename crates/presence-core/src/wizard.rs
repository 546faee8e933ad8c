//! Multi-step face capture wizard.
//!
//! The wizard walks the user through a fixed, cyclic list of pose prompts.
//! Each accepted capture is handed to a [`CaptureHandler`] (single-image
//! registration or recognition) and kept as a [`CapturedSample`]. Once at
//! least `min_samples` are held, [`CaptureWizard::finalize`] submits the whole
//! collection in one batch.
//!
//! Status transitions:
//!
//! ```text
//! Idle -> Processing -> Success -> (after success_display) -> Idle
//!                    \-> Error
//! ```
//!
//! Only one capture or finalize may be outstanding at a time; a second call
//! is rejected with [`WizardError::Busy`] rather than queued.

use crate::detector::{crop_face, DetectorError, DetectorHandle};
use crate::media::{MediaError, MediaSource};
use crate::types::{CapturedSample, Identity, SampleId, Still, StillError};
use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

pub const DEFAULT_PROMPTS: [&str; 10] = [
    "Look straight at the camera",
    "Turn your head slightly to the left",
    "Turn your head slightly to the right",
    "Raise your chin a little",
    "Lower your chin a little",
    "Tilt your head to the left",
    "Tilt your head to the right",
    "Smile gently",
    "Open your eyes wide",
    "Close your eyes",
];

pub const DEFAULT_MIN_SAMPLES: usize = 5;
pub const DEFAULT_SUCCESS_DISPLAY: Duration = Duration::from_secs(2);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandlerError {
    #[error("{0}")]
    Validation(String),
    #[error("{message}")]
    Remote {
        message: String,
        status: Option<u16>,
    },
    #[error("session expired, please log in again")]
    Unauthorized,
    #[error("batch registration is not available in this mode")]
    Unsupported,
}

#[derive(Error, Debug)]
pub enum WizardError {
    #[error("a capture is already in progress")]
    Busy,
    #[error("at least {need} images are required, {have} captured")]
    NotEnoughSamples { have: usize, need: usize },
    #[error("the camera is off")]
    CameraInactive,
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("the wizard needs at least one prompt")]
    NoPrompts,
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error("camera error: {0}")]
    Media(#[from] MediaError),
    #[error("face detection error: {0}")]
    Detector(#[from] DetectorError),
    #[error("invalid image: {0}")]
    Still(#[from] StillError),
    #[error("could not read image file: {0}")]
    Io(#[from] std::io::Error),
}

impl WizardError {
    /// Message suitable for showing to the person in front of the camera.
    pub fn user_message(&self) -> String {
        match self {
            WizardError::Busy => "Still processing the previous image, please wait.".into(),
            WizardError::NotEnoughSamples { have, need } => {
                format!("Capture at least {need} images before registering ({have} so far).")
            }
            WizardError::CameraInactive => "Turn the camera on first.".into(),
            WizardError::NoFaceDetected => {
                "No face found in the image. Please face the camera and try again.".into()
            }
            WizardError::NoPrompts => "The capture wizard is misconfigured.".into(),
            WizardError::Handler(e) => e.to_string(),
            WizardError::Media(MediaError::Unavailable(_)) => {
                "Cannot access the camera. Check that it is connected and permitted.".into()
            }
            WizardError::Media(MediaError::CaptureFailed(_) | MediaError::NotStreaming) => {
                "Could not get a clear picture from the camera. Check the lighting and try again."
                    .into()
            }
            WizardError::Detector(_) => {
                "Face detection is unavailable. Please restart and try again.".into()
            }
            WizardError::Still(_) | WizardError::Io(_) => {
                "Could not read the image. Please try another one.".into()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Idle,
    Processing,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Register,
    Recognize,
}

/// What a handler reports back for one capture or one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFeedback {
    pub message: String,
    pub detail: FeedbackDetail,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackDetail {
    Registration {
        /// Encodings the server now holds for the user, when reported.
        stored: Option<u32>,
        complete: bool,
    },
    Recognition {
        identity: Option<Identity>,
        confidence: f32,
        already_logged: bool,
    },
    None,
}

impl CaptureFeedback {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: FeedbackDetail::None,
        }
    }
}

/// Per-capture and batch callbacks plugged into the wizard.
#[async_trait]
pub trait CaptureHandler: Send + Sync {
    fn mode(&self) -> CaptureMode;

    async fn on_capture(&self, still: &Still, step: usize) -> Result<CaptureFeedback, HandlerError>;

    async fn on_finalize(
        &self,
        samples: &[CapturedSample],
    ) -> Result<CaptureFeedback, HandlerError> {
        let _ = samples;
        Err(HandlerError::Unsupported)
    }
}

#[derive(Debug, Clone)]
pub struct WizardConfig {
    pub prompts: Vec<String>,
    pub min_samples: usize,
    /// How long `Success` is shown before the wizard returns to `Idle`.
    pub success_display: Duration,
    /// With a detector attached, submit only the largest face instead of the
    /// whole frame.
    pub crop_to_face: bool,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            prompts: DEFAULT_PROMPTS.iter().map(|p| p.to_string()).collect(),
            min_samples: DEFAULT_MIN_SAMPLES,
            success_display: DEFAULT_SUCCESS_DISPLAY,
            crop_to_face: false,
        }
    }
}

/// Result of one accepted capture.
#[derive(Debug, Clone)]
pub struct Captured {
    pub sample_id: SampleId,
    /// Prompt index the sample was taken at.
    pub step: usize,
    pub feedback: CaptureFeedback,
}

/// Point-in-time view of the wizard for rendering.
#[derive(Debug, Clone)]
pub struct WizardSnapshot {
    pub status: CaptureStatus,
    pub step: usize,
    pub prompt: String,
    pub prompt_count: usize,
    pub sample_ids: Vec<SampleId>,
    pub min_samples: usize,
    pub last_error: Option<String>,
    pub has_preview: bool,
    pub camera_active: bool,
    pub busy: bool,
}

impl WizardSnapshot {
    pub fn sample_count(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn can_finalize(&self) -> bool {
        self.sample_ids.len() >= self.min_samples
    }

    pub fn progress_percent(&self) -> u8 {
        progress_percent(self.sample_ids.len(), self.min_samples)
    }
}

fn progress_percent(have: usize, need: usize) -> u8 {
    if need == 0 {
        return 100;
    }
    (have * 100 / need).min(100) as u8
}

#[derive(Debug)]
struct WizardState {
    step: usize,
    samples: Vec<CapturedSample>,
    status: CaptureStatus,
    last_error: Option<String>,
    preview: Option<Still>,
    busy: bool,
    camera_active: bool,
    next_id: u64,
    /// Bumped on every transition that invalidates a pending success timer.
    generation: u64,
}

impl WizardState {
    fn new() -> Self {
        Self {
            step: 0,
            samples: Vec::new(),
            status: CaptureStatus::Idle,
            last_error: None,
            preview: None,
            busy: false,
            camera_active: false,
            next_id: 1,
            generation: 0,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the busy flag when an in-flight capture or finalize ends,
/// including when its future is dropped before completion.
struct BusyGuard {
    state: Arc<Mutex<WizardState>>,
    armed: bool,
}

impl BusyGuard {
    fn new(state: Arc<Mutex<WizardState>>) -> Self {
        Self { state, armed: true }
    }

    fn complete<T>(mut self, f: impl FnOnce(&mut WizardState) -> T) -> T {
        self.armed = false;
        let mut state = lock(&self.state);
        state.busy = false;
        f(&mut state)
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = lock(&self.state);
        state.busy = false;
        if state.status == CaptureStatus::Processing {
            state.status = CaptureStatus::Idle;
            state.preview = None;
        }
        tracing::debug!("in-flight capture abandoned");
    }
}

pub struct CaptureWizard {
    config: WizardConfig,
    handler: Mutex<Arc<dyn CaptureHandler>>,
    state: Arc<Mutex<WizardState>>,
    camera: tokio::sync::Mutex<Option<Box<dyn MediaSource>>>,
    detector: Option<Arc<DetectorHandle>>,
    reset_timer: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureWizard {
    pub fn new(
        config: WizardConfig,
        handler: Arc<dyn CaptureHandler>,
    ) -> Result<Self, WizardError> {
        if config.prompts.is_empty() {
            return Err(WizardError::NoPrompts);
        }
        Ok(Self {
            config,
            handler: Mutex::new(handler),
            state: Arc::new(Mutex::new(WizardState::new())),
            camera: tokio::sync::Mutex::new(None),
            detector: None,
            reset_timer: Mutex::new(None),
        })
    }

    /// Attach the camera the wizard will own for its lifetime.
    pub fn with_camera(mut self, source: Box<dyn MediaSource>) -> Self {
        lock(&self.state).camera_active = source.is_live();
        self.camera = tokio::sync::Mutex::new(Some(source));
        self
    }

    /// Require at least one detected face before a capture reaches the handler.
    pub fn with_detector(mut self, detector: Arc<DetectorHandle>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn config(&self) -> &WizardConfig {
        &self.config
    }

    /// Swap the per-capture handler. Accumulated samples are kept.
    pub fn set_handler(&self, handler: Arc<dyn CaptureHandler>) {
        tracing::debug!(mode = ?handler.mode(), "capture handler switched");
        *lock(&self.handler) = handler;
    }

    pub fn mode(&self) -> CaptureMode {
        lock(&self.handler).mode()
    }

    pub fn status(&self) -> CaptureStatus {
        lock(&self.state).status
    }

    pub fn step(&self) -> usize {
        lock(&self.state).step
    }

    pub fn prompt_count(&self) -> usize {
        self.config.prompts.len()
    }

    pub fn current_prompt(&self) -> &str {
        &self.config.prompts[self.step()]
    }

    pub fn samples(&self) -> Vec<CapturedSample> {
        lock(&self.state).samples.clone()
    }

    pub fn sample_count(&self) -> usize {
        lock(&self.state).samples.len()
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.state).last_error.clone()
    }

    pub fn preview(&self) -> Option<Still> {
        lock(&self.state).preview.clone()
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.state).busy
    }

    pub fn is_camera_active(&self) -> bool {
        lock(&self.state).camera_active
    }

    pub fn can_finalize(&self) -> bool {
        self.sample_count() >= self.config.min_samples
    }

    pub fn progress_percent(&self) -> u8 {
        progress_percent(self.sample_count(), self.config.min_samples)
    }

    pub fn snapshot(&self) -> WizardSnapshot {
        let state = lock(&self.state);
        WizardSnapshot {
            status: state.status,
            step: state.step,
            prompt: self.config.prompts[state.step].clone(),
            prompt_count: self.config.prompts.len(),
            sample_ids: state.samples.iter().map(|s| s.id).collect(),
            min_samples: self.config.min_samples,
            last_error: state.last_error.clone(),
            has_preview: state.preview.is_some(),
            camera_active: state.camera_active,
            busy: state.busy,
        }
    }

    /// Submit one still for the current step.
    ///
    /// On success the still is kept as a sample and the step advances. On
    /// failure the wizard moves to `Error` with a user-facing message; the
    /// step and existing samples are left alone.
    pub async fn capture(&self, still: Still) -> Result<Captured, WizardError> {
        let step = {
            let mut state = lock(&self.state);
            if state.busy {
                tracing::debug!("capture rejected: wizard busy");
                return Err(WizardError::Busy);
            }
            state.busy = true;
            state.status = CaptureStatus::Processing;
            state.last_error = None;
            state.preview = Some(still.clone());
            state.generation += 1;
            state.step
        };
        self.cancel_reset_timer();
        let guard = BusyGuard::new(Arc::clone(&self.state));

        let handler = Arc::clone(&*lock(&self.handler));
        let outcome = self.run_capture(handler.as_ref(), still, step).await;
        match outcome {
            Ok((submitted, feedback)) => {
                let prompt_count = self.config.prompts.len();
                let (sample_id, count, generation) = guard.complete(|state| {
                    let id = SampleId(state.next_id);
                    state.next_id += 1;
                    state.samples.push(CapturedSample {
                        id,
                        image: submitted,
                        step,
                        captured_at: Utc::now(),
                    });
                    state.step = (state.step + 1) % prompt_count;
                    state.status = CaptureStatus::Success;
                    (id, state.samples.len(), state.generation)
                });
                tracing::info!(step, sample = %sample_id, samples = count, "capture accepted");
                self.schedule_reset(generation);
                Ok(Captured {
                    sample_id,
                    step,
                    feedback,
                })
            }
            Err(err) => {
                let message = err.user_message();
                guard.complete(|state| {
                    state.status = CaptureStatus::Error;
                    state.last_error = Some(message);
                });
                tracing::warn!(step, error = %err, "capture failed");
                Err(err)
            }
        }
    }

    /// Returns the still that was actually submitted alongside the feedback.
    async fn run_capture(
        &self,
        handler: &dyn CaptureHandler,
        still: Still,
        step: usize,
    ) -> Result<(Still, CaptureFeedback), WizardError> {
        let still = match &self.detector {
            Some(detector) => {
                let faces = detector.detect(&still).await?;
                let Some(largest) = faces.first() else {
                    return Err(WizardError::NoFaceDetected);
                };
                tracing::debug!(faces = faces.len(), "face check passed");
                if self.config.crop_to_face {
                    crop_face(&still, largest)?
                } else {
                    still
                }
            }
            None => still,
        };
        let feedback = handler.on_capture(&still, step).await?;
        Ok((still, feedback))
    }

    /// Grab a frame from the owned camera and capture it.
    pub async fn capture_from_camera(&self) -> Result<Captured, WizardError> {
        if self.is_busy() {
            return Err(WizardError::Busy);
        }
        let snapshot = {
            let mut camera = self.camera.lock().await;
            match camera.as_mut() {
                Some(source) if source.is_live() => source.snapshot().await,
                _ => return Err(WizardError::CameraInactive),
            }
        };
        match snapshot {
            Ok(still) => self.capture(still).await,
            Err(e) => Err(self.record_failure(e.into())),
        }
    }

    /// Capture an uploaded image file.
    pub async fn capture_file(&self, path: impl AsRef<Path>) -> Result<Captured, WizardError> {
        if self.is_busy() {
            return Err(WizardError::Busy);
        }
        let still = match tokio::fs::read(path.as_ref()).await {
            Ok(bytes) => Still::from_encoded(bytes).map_err(WizardError::from),
            Err(e) => Err(WizardError::from(e)),
        };
        match still {
            Ok(still) => self.capture(still).await,
            Err(e) => Err(self.record_failure(e)),
        }
    }

    /// Submit every held sample in one batch.
    ///
    /// Below `min_samples` this fails without calling the handler. The
    /// caller is expected to [`reset`](Self::reset) after a successful batch.
    pub async fn finalize(&self) -> Result<CaptureFeedback, WizardError> {
        let samples = {
            let mut state = lock(&self.state);
            if state.busy {
                return Err(WizardError::Busy);
            }
            let have = state.samples.len();
            let need = self.config.min_samples;
            if have < need {
                let err = WizardError::NotEnoughSamples { have, need };
                state.last_error = Some(err.user_message());
                tracing::debug!(have, need, "finalize rejected");
                return Err(err);
            }
            state.busy = true;
            state.status = CaptureStatus::Processing;
            state.last_error = None;
            state.generation += 1;
            state.samples.clone()
        };
        self.cancel_reset_timer();
        let guard = BusyGuard::new(Arc::clone(&self.state));

        let handler = Arc::clone(&*lock(&self.handler));
        let outcome = handler.on_finalize(&samples).await;
        match outcome {
            Ok(feedback) => {
                let generation = guard.complete(|state| {
                    state.status = CaptureStatus::Success;
                    state.generation
                });
                tracing::info!(samples = samples.len(), "batch registration submitted");
                self.schedule_reset(generation);
                Ok(feedback)
            }
            Err(e) => {
                let err = WizardError::Handler(e);
                let message = err.user_message();
                guard.complete(|state| {
                    state.status = CaptureStatus::Error;
                    state.last_error = Some(message);
                });
                tracing::warn!(error = %err, "batch registration failed");
                Err(err)
            }
        }
    }

    /// Drop one sample. Returns whether it was present.
    pub fn remove(&self, id: SampleId) -> bool {
        let mut state = lock(&self.state);
        let before = state.samples.len();
        state.samples.retain(|s| s.id != id);
        let removed = state.samples.len() < before;
        if removed {
            tracing::debug!(sample = %id, samples = state.samples.len(), "sample removed");
        }
        removed
    }

    /// Discard all samples and return to the first prompt.
    pub fn reset(&self) {
        self.cancel_reset_timer();
        let mut state = lock(&self.state);
        state.samples.clear();
        state.step = 0;
        state.status = CaptureStatus::Idle;
        state.last_error = None;
        state.preview = None;
        state.generation += 1;
        tracing::debug!("wizard reset");
    }

    /// Turn the camera off (stopping its tracks) or back on.
    ///
    /// Either way the preview is cleared and the status returns to `Idle`.
    /// Returns whether the camera is now active.
    pub async fn toggle_camera(&self) -> Result<bool, WizardError> {
        let result = {
            let mut camera = self.camera.lock().await;
            let Some(source) = camera.as_mut() else {
                return Err(WizardError::Media(MediaError::Unavailable(
                    "no camera attached".into(),
                )));
            };
            if source.is_live() {
                source.stop();
                tracing::info!("camera stopped");
                Ok(false)
            } else {
                match source.start().await {
                    Ok(()) => {
                        tracing::info!("camera started");
                        Ok(true)
                    }
                    Err(e) => Err(WizardError::Media(e)),
                }
            }
        };

        self.cancel_reset_timer();
        let mut state = lock(&self.state);
        state.preview = None;
        state.status = CaptureStatus::Idle;
        state.generation += 1;
        match result {
            Ok(active) => {
                state.camera_active = active;
                state.last_error = None;
                Ok(active)
            }
            Err(err) => {
                tracing::warn!(error = %err, "camera start failed");
                state.camera_active = false;
                state.last_error = Some(err.user_message());
                Err(err)
            }
        }
    }

    fn record_failure(&self, err: WizardError) -> WizardError {
        let mut state = lock(&self.state);
        if !state.busy {
            state.status = CaptureStatus::Error;
            state.last_error = Some(err.user_message());
            state.preview = None;
            state.generation += 1;
        }
        tracing::warn!(error = %err, "capture failed before submission");
        err
    }

    /// Return to `Idle` after the display delay, unless the state has moved
    /// past `generation` by then.
    fn schedule_reset(&self, generation: u64) {
        let state = Arc::clone(&self.state);
        let delay = self.config.success_display;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = lock(&state);
            if state.generation == generation && state.status == CaptureStatus::Success {
                state.status = CaptureStatus::Idle;
                state.preview = None;
            }
        });
        if let Some(previous) = lock(&self.reset_timer).replace(timer) {
            previous.abort();
        }
    }

    fn cancel_reset_timer(&self) {
        if let Some(timer) = lock(&self.reset_timer).take() {
            timer.abort();
        }
    }
}

impl Drop for CaptureWizard {
    fn drop(&mut self) {
        if let Some(timer) = self
            .reset_timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.abort();
        }
        if let Some(source) = self.camera.get_mut().as_mut() {
            if source.is_live() {
                source.stop();
                tracing::info!("camera released");
            }
        }
    }
}
