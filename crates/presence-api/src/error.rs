use crate::session::SessionError;
use presence_core::HandlerError;
use thiserror::Error;

const GENERIC_MESSAGE: &str = "Something went wrong. Please try again.";

#[derive(Error, Debug)]
pub enum ApiError {
    /// The server rejected the bearer token. Stored credentials have
    /// already been cleared when this is returned.
    #[error("unauthorized: session expired or not logged in")]
    Unauthorized,
    #[error("server returned {status}: {message}")]
    Server {
        status: u16,
        message: String,
        details: Option<String>,
        code: Option<String>,
    },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("session store error: {0}")]
    Session(#[from] SessionError),
    #[error("{0}")]
    Validation(String),
}

impl ApiError {
    /// HTTP status, when the error came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized => Some(401),
            ApiError::Server { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// The server's own error text when it sent one, otherwise a generic
    /// message fit for display.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Server { message, .. } => message.clone(),
            ApiError::Unauthorized => "Your session has expired. Please log in again.".into(),
            ApiError::Transport(e) if e.is_connect() || e.is_timeout() => {
                "Cannot reach the attendance server. Check your connection.".into()
            }
            ApiError::Validation(message) => message.clone(),
            _ => GENERIC_MESSAGE.into(),
        }
    }
}

impl From<ApiError> for HandlerError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => HandlerError::Unauthorized,
            ApiError::Validation(message) => HandlerError::Validation(message),
            other => HandlerError::Remote {
                message: other.user_message(),
                status: other.status(),
            },
        }
    }
}
