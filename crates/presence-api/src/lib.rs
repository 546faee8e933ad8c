//! presence-api — REST client for the attendance server.
//!
//! Wraps every endpoint the front end calls, keeps the login session on disk,
//! and provides the [`presence_core::CaptureHandler`] implementations that
//! feed wizard captures to the face endpoints.

pub mod client;
pub mod error;
pub mod handlers;
pub mod models;
pub mod session;

pub use client::{ApiClient, DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
pub use error::ApiError;
pub use handlers::{FaceRecognition, FaceRegistration};
pub use session::{Session, SessionError, SessionStore};
