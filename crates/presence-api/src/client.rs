//! HTTP client for the attendance REST API.

use crate::error::ApiError;
use crate::models::*;
use crate::session::{Session, SessionStore};
use presence_core::{Identity, Still};
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Auth {
    /// Send the bearer token and treat 401 as an expired session.
    Bearer,
    /// Login and signup: no token, and a 401 is an ordinary server error.
    Anonymous,
}

/// Client for every endpoint the attendance front end uses.
///
/// Cloning is cheap; clones share the connection pool and session store.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    session: Arc<SessionStore>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        session: Arc<SessionStore>,
    ) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::Validation(format!("invalid API URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Validation(format!(
                "invalid API URL '{base_url}': not a base URL"
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("presence/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url,
            session,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// Log in and persist the returned token and identity.
    pub async fn login(&self, email: &str, password: &str) -> Result<Identity, ApiError> {
        let body = Credentials {
            email: email.to_string(),
            password: password.to_string(),
        };
        let auth: AuthResponse = self
            .call(Method::POST, &["auth", "login"], Auth::Anonymous, |req| {
                req.json(&body)
            })
            .await?;
        self.session.save(Session {
            token: auth.access_token,
            user: auth.user.clone(),
            saved_at: None,
        })?;
        tracing::info!(user = %auth.user.id, role = %auth.user.role, "logged in");
        Ok(auth.user)
    }

    /// Create an account. When the server logs the new user in directly the
    /// session is stored as for [`login`](Self::login).
    pub async fn register(&self, request: &SignupRequest) -> Result<SignupResponse, ApiError> {
        let response: SignupResponse = self
            .call(Method::POST, &["auth", "register"], Auth::Anonymous, |req| {
                req.json(request)
            })
            .await?;
        if let (Some(token), Some(user)) = (&response.access_token, &response.user) {
            self.session.save(Session {
                token: token.clone(),
                user: user.clone(),
                saved_at: None,
            })?;
            tracing::info!(user = %user.id, "registered and logged in");
        }
        Ok(response)
    }

    /// Drop the stored credentials. The server keeps no session to end.
    pub fn logout(&self) -> Result<(), ApiError> {
        self.session.clear()?;
        tracing::info!("logged out");
        Ok(())
    }

    /// Fetch the current identity and refresh the stored copy.
    pub async fn me(&self) -> Result<Identity, ApiError> {
        let body: MeBody = self
            .call(Method::GET, &["auth", "me"], Auth::Bearer, |req| req)
            .await?;
        let user = Identity::from(body);
        if let Some(mut session) = self.session.current() {
            if session.user != user {
                session.user = user.clone();
                self.session.save(session)?;
            }
        }
        Ok(user)
    }

    pub async fn register_face(
        &self,
        user_id: &str,
        image: &Still,
    ) -> Result<FaceRegisterResponse, ApiError> {
        let body = FaceRegisterRequest {
            user_id: user_id.to_string(),
            image_data: image.to_data_url(),
        };
        self.call(Method::POST, &["face", "register"], Auth::Bearer, |req| {
            req.json(&body)
        })
        .await
    }

    pub async fn register_faces_batch(
        &self,
        user_id: &str,
        images: &[Still],
    ) -> Result<BatchRegisterResponse, ApiError> {
        if images.is_empty() {
            return Err(ApiError::Validation("no images to register".into()));
        }
        let body = BatchRegisterRequest {
            user_id: user_id.to_string(),
            images: images.iter().map(Still::to_data_url).collect(),
        };
        self.call(
            Method::POST,
            &["face", "register", "batch"],
            Auth::Bearer,
            |req| req.json(&body),
        )
        .await
    }

    pub async fn recognize_face(&self, image: &Still) -> Result<RecognizeResponse, ApiError> {
        let body = RecognizeRequest {
            image_data: image.to_data_url(),
        };
        self.call(Method::POST, &["face", "recognize"], Auth::Bearer, |req| {
            req.json(&body)
        })
        .await
    }

    pub async fn registration_status(&self, user_id: &str) -> Result<RegistrationStatus, ApiError> {
        self.call(
            Method::GET,
            &["face", "register", "status", user_id],
            Auth::Bearer,
            |req| req,
        )
        .await
    }

    pub async fn log_attendance(
        &self,
        request: &LogAttendanceRequest,
    ) -> Result<LogAttendanceResponse, ApiError> {
        self.call(Method::POST, &["attendance", "log"], Auth::Bearer, |req| {
            req.json(request)
        })
        .await
    }

    pub async fn attendance_history(
        &self,
        query: &HistoryQuery,
    ) -> Result<Vec<AttendanceRecord>, ApiError> {
        let list: AttendanceList = self
            .call(Method::GET, &["attendance", "history"], Auth::Bearer, |req| {
                req.query(query)
            })
            .await?;
        Ok(list.attendance)
    }

    pub async fn attendance_today(&self) -> Result<TodayAttendance, ApiError> {
        self.call(Method::GET, &["attendance", "today"], Auth::Bearer, |req| req)
            .await
    }

    pub async fn attendance_stats(&self, query: &StatsQuery) -> Result<AttendanceStats, ApiError> {
        self.call(Method::GET, &["attendance", "stats"], Auth::Bearer, |req| {
            req.query(query)
        })
        .await
    }

    pub async fn list_users(&self, query: &UserQuery) -> Result<Vec<Identity>, ApiError> {
        let list: UserList = self
            .call(Method::GET, &["users"], Auth::Bearer, |req| req.query(query))
            .await?;
        Ok(list.users)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Identity, ApiError> {
        let body: UserBody = self
            .call(Method::GET, &["users", user_id], Auth::Bearer, |req| req)
            .await?;
        Ok(body.user)
    }

    pub async fn update_user(
        &self,
        user_id: &str,
        update: &UserUpdate,
    ) -> Result<Identity, ApiError> {
        if update.is_empty() {
            return Err(ApiError::Validation("nothing to update".into()));
        }
        let body: UserBody = self
            .call(Method::PUT, &["users", user_id], Auth::Bearer, |req| {
                req.json(update)
            })
            .await?;
        tracing::info!(user = %body.user.id, "user updated");
        Ok(body.user)
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Validation(format!("invalid API URL '{}'", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn call<T, F>(
        &self,
        method: Method,
        segments: &[&str],
        auth: Auth,
        build: F,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let url = self.url(segments)?;
        let request_id = Uuid::new_v4();

        let mut req = self
            .http
            .request(method.clone(), url.clone())
            .header(REQUEST_ID_HEADER, request_id.to_string());
        if auth == Auth::Bearer {
            if let Some(token) = self.session.token() {
                req = req.bearer_auth(token);
            }
        }
        let req = build(req);

        let started = Instant::now();
        let response = match req.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(%method, url = %url, %request_id, error = %e, "api request failed");
                return Err(e.into());
            }
        };
        let status = response.status();
        let body = response.bytes().await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if status.is_success() {
            tracing::debug!(
                %method,
                url = %url,
                %request_id,
                status = status.as_u16(),
                elapsed_ms,
                "api response"
            );
            return serde_json::from_slice(&body).map_err(|e| {
                tracing::warn!(url = %url, %request_id, error = %e, "undecodable api response");
                ApiError::Decode(e.to_string())
            });
        }

        let err = if status == StatusCode::UNAUTHORIZED && auth == Auth::Bearer {
            if let Err(e) = self.session.clear() {
                tracing::warn!(error = %e, "failed to clear session after 401");
            }
            ApiError::Unauthorized
        } else {
            server_error(status, &body)
        };
        tracing::warn!(
            %method,
            url = %url,
            %request_id,
            status = status.as_u16(),
            elapsed_ms,
            error = %err,
            "api error"
        );
        Err(err)
    }
}

fn server_error(status: StatusCode, body: &[u8]) -> ApiError {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let message = parsed
        .error
        .or(parsed.message)
        .unwrap_or_else(|| match status.canonical_reason() {
            Some(reason) => format!("{} {reason}", status.as_u16()),
            None => format!("HTTP {}", status.as_u16()),
        });
    ApiError::Server {
        status: status.as_u16(),
        message,
        details: parsed.details,
        code: parsed.code,
    }
}
