//! Session persistence and token refresh
//!
//! The logged-in user and their access token live in a small JSON file so a
//! refreshed token survives restarts. [`SessionManager`] is the shared handle
//! over it; [`AuthClient`] talks to the backend's refresh endpoint.

use crate::{protocol::Id, Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// The logged-in user, as stored by the login flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    /// User id
    pub user_id: Id,
    /// Username
    pub username: String,
    /// Account type, `tutor` or `student`
    #[serde(default)]
    pub user_type: String,
}

impl SessionUser {
    /// Whether this account is a tutor
    pub fn is_tutor(&self) -> bool {
        self.user_type.eq_ignore_ascii_case("tutor")
    }
}

/// Persisted session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    /// Logged-in user
    pub user: SessionUser,
    /// Current access token
    pub access: String,
    /// Refresh token, when the backend hands it out in the body rather than a cookie
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

impl StoredSession {
    /// Load a session file, `None` if it doesn't exist or is empty
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(None);
        }

        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Storage(format!("Failed to read session file: {}", e)))?;

        if data.trim().is_empty() {
            return Ok(None);
        }

        let session = serde_json::from_str(&data)
            .map_err(|e| Error::Storage(format!("Failed to parse session file: {}", e)))?;
        Ok(Some(session))
    }

    /// Save the session file, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create session directory: {}", e)))?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| Error::Storage(format!("Failed to write session file: {}", e)))?;
        Ok(())
    }
}

/// Shared handle to the current session
///
/// Cheap to clone. Updates are written through to the session file when the
/// manager was loaded from one.
#[derive(Debug, Clone)]
pub struct SessionManager {
    session: Arc<RwLock<Option<StoredSession>>>,
    path: Option<Arc<PathBuf>>,
}

impl SessionManager {
    /// Load the session stored at `path` (empty if there is none)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let session = StoredSession::load(&path)?;

        Ok(Self {
            session: Arc::new(RwLock::new(session)),
            path: Some(Arc::new(path)),
        })
    }

    /// A session that is never written to disk
    pub fn in_memory(session: Option<StoredSession>) -> Self {
        Self {
            session: Arc::new(RwLock::new(session)),
            path: None,
        }
    }

    /// Current access token
    pub async fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access.clone())
            .filter(|t| !t.is_empty())
    }

    /// Current refresh token
    pub async fn refresh_token(&self) -> Option<String> {
        self.session.read().await.as_ref().and_then(|s| s.refresh.clone())
    }

    /// Logged-in user
    pub async fn user(&self) -> Option<SessionUser> {
        self.session.read().await.as_ref().map(|s| s.user.clone())
    }

    /// Replace the whole session
    pub async fn set(&self, session: StoredSession) -> Result<()> {
        let mut guard = self.session.write().await;
        if let Some(path) = &self.path {
            session.save(path.as_path())?;
        }
        *guard = Some(session);
        Ok(())
    }

    /// Store a freshly issued access token
    pub async fn store_access_token(&self, token: String) -> Result<()> {
        let mut guard = self.session.write().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| Error::SessionExpired("No session to update".to_string()))?;
        session.access = token;

        if let Some(path) = &self.path {
            session.save(path.as_path())?;
        }
        Ok(())
    }

    /// Forget the session (logout)
    pub async fn clear(&self) -> Result<()> {
        let mut guard = self.session.write().await;
        *guard = None;

        if let Some(path) = &self.path {
            if path.exists() {
                std::fs::remove_file(path.as_path())
                    .map_err(|e| Error::Storage(format!("Failed to remove session file: {}", e)))?;
            }
        }
        Ok(())
    }
}

/// Something that can obtain a new access token
///
/// The chat socket calls this once when the server rejects its token.
pub trait TokenRefresher: Send + Sync + 'static {
    /// Obtain (and store) a new access token
    fn refresh(&self) -> impl Future<Output = Result<String>> + Send;
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
}

/// HTTP client for the backend's auth endpoints
#[derive(Debug, Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
    sessions: SessionManager,
}

impl AuthClient {
    /// Create a client against `base_url`
    ///
    /// The underlying HTTP client keeps a cookie store, so a refresh cookie
    /// set at login is sent along with refresh requests.
    pub fn new(base_url: &str, sessions: SessionManager) -> Result<Self> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        url::Url::parse(base_url)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            sessions,
        })
    }

    /// `POST /auth/token/refresh/`, persisting the new access token
    pub async fn refresh_access_token(&self) -> Result<String> {
        let url = endpoint(&self.base_url, "/auth/token/refresh/")?;
        let body = match self.sessions.refresh_token().await {
            Some(refresh) => serde_json::json!({ "refresh": refresh }),
            None => serde_json::json!({}),
        };

        let response = self.http.post(url).json(&body).send().await?;
        if !response.status().is_success() {
            let err = error_from_response(response).await;
            warn!("Token refresh rejected: {}", err);
            return Err(err);
        }

        let RefreshResponse { access } = response.json().await?;
        self.sessions.store_access_token(access.clone()).await?;
        info!("Access token refreshed");
        Ok(access)
    }
}

impl TokenRefresher for AuthClient {
    async fn refresh(&self) -> Result<String> {
        self.refresh_access_token().await
    }
}

/// Join an API path onto a base URL, keeping any path prefix of the base
pub(crate) fn endpoint(base_url: &str, path: &str) -> Result<url::Url> {
    Ok(url::Url::parse(&format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    ))?)
}

/// Turn a non-success response into [`Error::Api`]
pub(crate) async fn error_from_response(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Error::Api {
        status,
        message: extract_error_message(&body, "Request failed"),
    }
}

/// Pull a human readable message out of an API error body
///
/// Tries `error`, then `detail`, then a bare string body, then `fallback`.
pub fn extract_error_message(body: &str, fallback: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return fallback.to_string();
    }

    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => ["error", "detail"]
            .iter()
            .find_map(|key| map.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string()),
        Ok(serde_json::Value::String(s)) if !s.is_empty() => s,
        Ok(_) => fallback.to_string(),
        Err(_) => body.to_string(),
    }
}
