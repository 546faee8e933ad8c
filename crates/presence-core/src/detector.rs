//! Face-detection provider contract and its once-initialized handle.
//!
//! Model loading is asynchronous and happens at most once per handle. The
//! handle is owned by whoever builds the wizard and shared by reference;
//! there is no process-global "models loaded" flag.

use crate::types::{Still, StillError};
use async_trait::async_trait;
use image::imageops;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Default detector input edge, tuned for speed over recall.
pub const DEFAULT_INPUT_SIZE: u32 = 160;
/// Default minimum detection score.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.3;

const CROP_JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("face detection model failed to load: {0}")]
    LoadFailed(String),
    #[error("detection failed: {0}")]
    DetectionFailed(String),
    #[error("face region lies outside the image")]
    EmptyRegion,
    #[error(transparent)]
    Still(#[from] StillError),
}

/// Axis-aligned face region in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// One face reported by a detector, with its landmark points
/// (68 points for the common landmark nets, but any count is accepted).
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub score: f32,
    pub landmarks: Vec<(f32, f32)>,
}

impl DetectedFace {
    pub fn passes(&self, options: &DetectionOptions) -> bool {
        self.score >= options.score_threshold && self.bbox.area() > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionOptions {
    /// Edge length the provider should scale frames to before inference.
    pub input_size: u32,
    pub score_threshold: f32,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

/// A loaded face-detection model.
pub trait FaceDetector: Send + Sync {
    fn detect(
        &self,
        still: &Still,
        options: &DetectionOptions,
    ) -> Result<Vec<DetectedFace>, DetectorError>;
}

/// Performs the one-time asynchronous model load.
#[async_trait]
pub trait DetectorLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn FaceDetector>, DetectorError>;
}

/// Lazily loads a detector on first use and hands out the same instance
/// afterwards. Concurrent first callers share a single load; a failed load
/// leaves the handle empty so a later call can retry.
pub struct DetectorHandle {
    loader: Box<dyn DetectorLoader>,
    detector: OnceCell<Arc<dyn FaceDetector>>,
    options: DetectionOptions,
}

impl DetectorHandle {
    pub fn new(loader: impl DetectorLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            detector: OnceCell::new(),
            options: DetectionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DetectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &DetectionOptions {
        &self.options
    }

    pub fn is_loaded(&self) -> bool {
        self.detector.initialized()
    }

    /// Return the loaded detector, loading it first if needed.
    pub async fn get(&self) -> Result<Arc<dyn FaceDetector>, DetectorError> {
        let detector = self
            .detector
            .get_or_try_init(|| async {
                tracing::info!("loading face detection model");
                let detector = self.loader.load().await;
                match &detector {
                    Ok(_) => tracing::info!("face detection model loaded"),
                    Err(e) => tracing::warn!(error = %e, "face detection model load failed"),
                }
                detector
            })
            .await?;
        Ok(Arc::clone(detector))
    }

    /// Detect faces, keeping only those above the score threshold,
    /// largest first.
    pub async fn detect(&self, still: &Still) -> Result<Vec<DetectedFace>, DetectorError> {
        let detector = self.get().await?;
        let mut faces: Vec<DetectedFace> = detector
            .detect(still, &self.options)?
            .into_iter()
            .filter(|f| f.passes(&self.options))
            .collect();
        faces.sort_by(|a, b| {
            b.bbox
                .area()
                .partial_cmp(&a.bbox.area())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        tracing::debug!(faces = faces.len(), "detection complete");
        Ok(faces)
    }
}

/// Cut the face region out of a still, clamped to the image bounds,
/// and re-encode it as JPEG.
pub fn crop_face(still: &Still, face: &DetectedFace) -> Result<Still, DetectorError> {
    let rgb = still.decode()?;
    let (w, h) = rgb.dimensions();

    let x0 = face.bbox.x.max(0.0).floor() as u32;
    let y0 = face.bbox.y.max(0.0).floor() as u32;
    let x1 = ((face.bbox.x + face.bbox.width).ceil().max(0.0) as u32).min(w);
    let y1 = ((face.bbox.y + face.bbox.height).ceil().max(0.0) as u32).min(h);
    if x0 >= x1 || y0 >= y1 {
        return Err(DetectorError::EmptyRegion);
    }

    let face_rgb = imageops::crop_imm(&rgb, x0, y0, x1 - x0, y1 - y0).to_image();
    Ok(Still::from_rgb(&face_rgb, CROP_JPEG_QUALITY)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedDetector(Vec<DetectedFace>);

    impl FaceDetector for FixedDetector {
        fn detect(
            &self,
            _still: &Still,
            _options: &DetectionOptions,
        ) -> Result<Vec<DetectedFace>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    struct CountingLoader {
        loads: Arc<AtomicUsize>,
        fail_first: bool,
        faces: Vec<DetectedFace>,
    }

    #[async_trait]
    impl DetectorLoader for CountingLoader {
        async fn load(&self) -> Result<Arc<dyn FaceDetector>, DetectorError> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                return Err(DetectorError::LoadFailed("weights missing".into()));
            }
            Ok(Arc::new(FixedDetector(self.faces.clone())))
        }
    }

    fn face(x: f32, y: f32, size: f32, score: f32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox {
                x,
                y,
                width: size,
                height: size,
            },
            score,
            landmarks: vec![(x + size / 3.0, y + size / 3.0)],
        }
    }

    fn still(w: u32, h: u32) -> Still {
        Still::from_rgb(&RgbImage::from_pixel(w, h, Rgb([200, 150, 100])), 90).unwrap()
    }

    #[tokio::test]
    async fn test_handle_loads_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let handle = DetectorHandle::new(CountingLoader {
            loads: Arc::clone(&loads),
            fail_first: false,
            faces: vec![],
        });
        assert!(!handle.is_loaded());

        let (a, b) = tokio::join!(handle.get(), handle.get());
        assert!(a.is_ok() && b.is_ok());
        handle.get().await.unwrap();

        assert!(handle.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_can_retry() {
        let loads = Arc::new(AtomicUsize::new(0));
        let handle = DetectorHandle::new(CountingLoader {
            loads: Arc::clone(&loads),
            fail_first: true,
            faces: vec![],
        });

        assert!(matches!(
            handle.get().await,
            Err(DetectorError::LoadFailed(_))
        ));
        assert!(!handle.is_loaded());
        assert!(handle.get().await.is_ok());
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_detect_filters_and_orders() {
        let handle = DetectorHandle::new(CountingLoader {
            loads: Arc::new(AtomicUsize::new(0)),
            fail_first: false,
            faces: vec![
                face(0.0, 0.0, 10.0, 0.9),
                face(5.0, 5.0, 40.0, 0.8),
                face(1.0, 1.0, 80.0, 0.1),
            ],
        });

        let faces = handle.detect(&still(64, 64)).await.unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].bbox.width, 40.0);
        assert_eq!(faces[1].bbox.width, 10.0);
    }

    #[test]
    fn test_crop_face_clamps_to_bounds() {
        let cropped = crop_face(&still(32, 24), &face(20.0, 10.0, 30.0, 0.9)).unwrap();
        assert_eq!((cropped.width, cropped.height), (12, 14));
    }

    #[test]
    fn test_crop_face_outside_image() {
        let err = crop_face(&still(16, 16), &face(40.0, 40.0, 10.0, 0.9)).unwrap_err();
        assert!(matches!(err, DetectorError::EmptyRegion));
    }
}
