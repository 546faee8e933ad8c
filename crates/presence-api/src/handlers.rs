//! Capture handlers that connect the wizard to the face endpoints.

use crate::client::ApiClient;
use async_trait::async_trait;
use presence_core::{
    CaptureFeedback, CaptureHandler, CaptureMode, CapturedSample, FeedbackDetail, HandlerError,
    Identity, Still,
};

/// Registers faces for one target user: each capture goes to
/// `/face/register`, and finalizing submits every sample to the batch endpoint.
pub struct FaceRegistration {
    client: ApiClient,
    target_user: Option<String>,
}

impl FaceRegistration {
    pub fn new(client: ApiClient, target_user: Option<String>) -> Self {
        Self {
            client,
            target_user: target_user.filter(|id| !id.trim().is_empty()),
        }
    }

    pub fn target_user(&self) -> Option<&str> {
        self.target_user.as_deref()
    }

    fn require_target(&self) -> Result<&str, HandlerError> {
        self.target_user
            .as_deref()
            .ok_or_else(|| HandlerError::Validation("Select a user to register a face for.".into()))
    }
}

#[async_trait]
impl CaptureHandler for FaceRegistration {
    fn mode(&self) -> CaptureMode {
        CaptureMode::Register
    }

    async fn on_capture(
        &self,
        still: &Still,
        step: usize,
    ) -> Result<CaptureFeedback, HandlerError> {
        let user_id = self.require_target()?;
        let response = self.client.register_face(user_id, still).await?;
        tracing::debug!(
            user = user_id,
            step,
            stored = response.face_encodings_count,
            complete = response.registration_complete,
            "face sample registered"
        );

        let message = if response.message.is_empty() {
            format!(
                "Captured {} image(s). At least 5 are needed to train.",
                response.face_encodings_count
            )
        } else {
            response.message
        };
        Ok(CaptureFeedback {
            message,
            detail: FeedbackDetail::Registration {
                stored: Some(response.face_encodings_count),
                complete: response.registration_complete,
            },
        })
    }

    async fn on_finalize(
        &self,
        samples: &[CapturedSample],
    ) -> Result<CaptureFeedback, HandlerError> {
        let user_id = self.require_target()?;
        let images: Vec<Still> = samples.iter().map(|s| s.image.clone()).collect();
        let response = self.client.register_faces_batch(user_id, &images).await?;
        tracing::info!(
            user = user_id,
            submitted = images.len(),
            registered = response.registered_images,
            total = response.total_encodings,
            "batch face registration complete"
        );

        Ok(CaptureFeedback {
            message: format!("Registered successfully with {} images!", images.len()),
            detail: FeedbackDetail::Registration {
                stored: Some(response.total_encodings),
                complete: true,
            },
        })
    }
}

/// Identifies whoever is in front of the camera. The server logs their
/// attendance as a side effect of a successful match.
pub struct FaceRecognition {
    client: ApiClient,
}

impl FaceRecognition {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CaptureHandler for FaceRecognition {
    fn mode(&self) -> CaptureMode {
        CaptureMode::Recognize
    }

    async fn on_capture(
        &self,
        still: &Still,
        step: usize,
    ) -> Result<CaptureFeedback, HandlerError> {
        let response = self.client.recognize_face(still).await?;

        let user = match response.user {
            Some(user) if response.recognized => user,
            _ => {
                tracing::debug!(step, code = ?response.code, "face not recognized");
                let message = if response.message.is_empty() {
                    "Face not recognized. Please try again.".to_string()
                } else {
                    response.message
                };
                return Ok(CaptureFeedback {
                    message,
                    detail: FeedbackDetail::Recognition {
                        identity: None,
                        confidence: response.confidence,
                        already_logged: false,
                    },
                });
            }
        };

        tracing::info!(
            user = %user.id,
            confidence = response.confidence,
            already_logged = response.already_logged,
            "face recognized"
        );
        let message = if response.already_logged {
            format!("{} is already checked in today.", user.name)
        } else {
            format!("Attendance logged for {}!", user.name)
        };
        Ok(CaptureFeedback {
            message,
            detail: FeedbackDetail::Recognition {
                identity: Some(Identity::from(user)),
                confidence: response.confidence,
                already_logged: response.already_logged,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionStore};
    use image::{Rgb, RgbImage};
    use mockito::{Matcher, Server};
    use presence_core::{CaptureStatus, CaptureWizard, Role, SampleId, WizardConfig, WizardError};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn client(server: &Server) -> ApiClient {
        let store = SessionStore::in_memory();
        store
            .save(Session {
                token: "tok".into(),
                user: Identity {
                    id: "1".into(),
                    name: "Teacher".into(),
                    email: None,
                    role: Role::Teacher,
                    is_active: true,
                    is_face_registered: false,
                },
                saved_at: None,
            })
            .unwrap();
        ApiClient::new(
            &format!("{}/api", server.url()),
            Duration::from_secs(5),
            Arc::new(store),
        )
        .unwrap()
    }

    fn still() -> Still {
        Still::from_rgb(&RgbImage::from_pixel(4, 4, Rgb([90, 90, 90])), 80).unwrap()
    }

    fn sample(id: u64) -> CapturedSample {
        CapturedSample {
            id: SampleId(id),
            image: still(),
            step: id as usize,
            captured_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_registration_requires_target_before_any_call() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let handler = FaceRegistration::new(client(&server), Some("  ".into()));
        assert!(handler.target_user().is_none());
        let err = handler.on_capture(&still(), 0).await.unwrap_err();
        assert!(matches!(err, HandlerError::Validation(_)));
        let err = handler.on_finalize(&[sample(1)]).await.unwrap_err();
        assert!(matches!(err, HandlerError::Validation(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_registration_capture_feedback() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/face/register")
            .with_status(200)
            .with_body(r#"{"message":"","face_encodings_count":3,"registration_complete":false}"#)
            .create_async()
            .await;

        let handler = FaceRegistration::new(client(&server), Some("8".into()));
        let feedback = handler.on_capture(&still(), 2).await.unwrap();
        assert_eq!(
            feedback.detail,
            FeedbackDetail::Registration {
                stored: Some(3),
                complete: false
            }
        );
        assert!(feedback.message.contains("3 image"));
    }

    #[tokio::test]
    async fn test_finalize_submits_every_sample() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/face/register/batch")
            .match_body(Matcher::PartialJson(json!({"user_id": "8"})))
            .with_status(200)
            .with_body(r#"{"message":"ok","registered_images":5,"total_encodings":5,"user_id":8}"#)
            .create_async()
            .await;

        let handler = FaceRegistration::new(client(&server), Some("8".into()));
        let samples: Vec<_> = (1..=5).map(sample).collect();
        let feedback = handler.on_finalize(&samples).await.unwrap();
        mock.assert_async().await;
        assert_eq!(feedback.message, "Registered successfully with 5 images!");
    }

    #[tokio::test]
    async fn test_recognition_success() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/face/recognize")
            .with_status(200)
            .with_body(
                r#"{"recognized":true,"message":"ok","confidence":0.91,"already_logged":false,
                    "user":{"id":12,"name":"Dung","email":"d@x.edu","role":"student"}}"#,
            )
            .create_async()
            .await;

        let handler = FaceRecognition::new(client(&server));
        assert_eq!(handler.mode(), CaptureMode::Recognize);
        let feedback = handler.on_capture(&still(), 0).await.unwrap();
        match feedback.detail {
            FeedbackDetail::Recognition {
                identity,
                confidence,
                already_logged,
            } => {
                assert_eq!(identity.unwrap().id, "12");
                assert!((confidence - 0.91).abs() < 1e-6);
                assert!(!already_logged);
            }
            other => panic!("unexpected detail: {other:?}"),
        }
        assert_eq!(feedback.message, "Attendance logged for Dung!");
    }

    #[tokio::test]
    async fn test_unrecognized_face_is_reported_in_feedback() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/face/recognize")
            .with_status(200)
            .with_body(r#"{"recognized":false,"message":"Face not recognized","code":"NO_MATCH"}"#)
            .create_async()
            .await;

        let handler = FaceRecognition::new(client(&server));
        let feedback = handler.on_capture(&still(), 0).await.unwrap();
        assert_eq!(feedback.message, "Face not recognized");
        assert!(matches!(
            feedback.detail,
            FeedbackDetail::Recognition { identity: None, .. }
        ));
        assert_eq!(
            handler.on_finalize(&[]).await.unwrap_err(),
            HandlerError::Unsupported
        );
    }

    #[tokio::test]
    async fn test_wizard_end_to_end_registration() {
        let mut server = Server::new_async().await;
        let single = server
            .mock("POST", "/api/face/register")
            .with_status(200)
            .with_body(r#"{"message":"stored","face_encodings_count":1}"#)
            .expect(5)
            .create_async()
            .await;
        let batch = server
            .mock("POST", "/api/face/register/batch")
            .with_status(200)
            .with_body(r#"{"message":"ok","registered_images":5,"total_encodings":5}"#)
            .expect(1)
            .create_async()
            .await;

        let handler = Arc::new(FaceRegistration::new(client(&server), Some("8".into())));
        let wizard = CaptureWizard::new(WizardConfig::default(), handler).unwrap();
        for _ in 0..5 {
            wizard.capture(still()).await.unwrap();
        }
        assert_eq!(wizard.step(), 5);
        wizard.finalize().await.unwrap();

        single.assert_async().await;
        batch.assert_async().await;
        assert_eq!(wizard.sample_count(), 5);
    }

    #[tokio::test]
    async fn test_wizard_surfaces_server_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/face/register")
            .with_status(400)
            .with_body(r#"{"error":"No face detected in image"}"#)
            .create_async()
            .await;

        let handler = Arc::new(FaceRegistration::new(client(&server), Some("8".into())));
        let wizard = CaptureWizard::new(WizardConfig::default(), handler).unwrap();
        let err = wizard.capture(still()).await.unwrap_err();
        assert!(matches!(err, WizardError::Handler(HandlerError::Remote { .. })));
        assert_eq!(wizard.status(), CaptureStatus::Error);
        assert_eq!(wizard.last_error().as_deref(), Some("No face detected in image"));
        assert_eq!(wizard.sample_count(), 0);
    }
}
