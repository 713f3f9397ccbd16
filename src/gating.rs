//! Unlock gating
//!
//! Starting a conversation between a student and a tutor is refused by the
//! server (`chat.unlock`) until the student has spent a point on the
//! tutor's contact, or the tutor has unlocked a job posted by the student.
//! [`GateFlow`] tracks the pending prompt and decides what follows an
//! unlock attempt; [`UnlockApi`] makes the HTTP calls.

use crate::auth::{endpoint, error_from_response, AuthClient, SessionManager, TokenRefresher};
use crate::protocol::{Id, Outbound};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Account type of the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Pays points to unlock tutors
    Student,
    /// Unlocks jobs to reach students
    Tutor,
}

impl Role {
    /// Parse the backend's `user_type`; anything but `tutor` is a student
    pub fn from_user_type(user_type: &str) -> Self {
        if user_type.eq_ignore_ascii_case("tutor") {
            Role::Tutor
        } else {
            Role::Student
        }
    }
}

/// The unlock prompt to show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatePrompt {
    /// Student: spend a point on this tutor's contact
    UnlockContact {
        /// Tutor to unlock
        tutor_id: Id,
        /// Server explanation
        message: Option<String>,
    },
    /// Tutor: unlock one of this student's jobs first
    UnlockJob {
        /// Student whose job must be unlocked
        student_id: Id,
        /// Server explanation
        message: Option<String>,
    },
}

impl GatePrompt {
    /// Pick the prompt for a `chat.unlock` event by the viewer's role
    ///
    /// `None` when the event lacks the id the role needs.
    pub fn from_unlock_event(
        role: Role,
        student_id: Option<Id>,
        tutor_id: Option<Id>,
        message: Option<String>,
    ) -> Option<Self> {
        match role {
            Role::Tutor => student_id.map(|student_id| GatePrompt::UnlockJob {
                student_id,
                message,
            }),
            Role::Student => tutor_id.map(|tutor_id| GatePrompt::UnlockContact {
                tutor_id,
                message,
            }),
        }
    }

    /// The user the conversation was meant to be with
    pub fn target(&self) -> &Id {
        match self {
            GatePrompt::UnlockContact { tutor_id, .. } => tutor_id,
            GatePrompt::UnlockJob { student_id, .. } => student_id,
        }
    }
}

/// Why an unlock attempt failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnlockError {
    /// Not enough points; route to the purchase page
    #[error("Insufficient points: {0}")]
    InsufficientPoints(String),

    /// Anything else; the user may retry
    #[error("Unlock failed: {0}")]
    Failed(String),
}

impl UnlockError {
    /// Classify an unlock failure
    ///
    /// HTTP 402, or a message mentioning points, means insufficient points.
    pub fn classify(status: Option<u16>, message: &str) -> Self {
        if status == Some(402) || message.to_lowercase().contains("point") {
            UnlockError::InsufficientPoints(message.to_string())
        } else {
            UnlockError::Failed(message.to_string())
        }
    }

    /// Classify a crate error from the unlock API
    ///
    /// Only an API response can mean insufficient points; transport errors
    /// carry the request URL in their text and are always retryable.
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::Api { status, message } => Self::classify(Some(*status), message),
            other => UnlockError::Failed(other.to_string()),
        }
    }
}

/// Contact details revealed by a successful unlock
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContactInfo {
    /// Email address
    #[serde(default)]
    pub email: Option<String>,
    /// Phone number
    #[serde(default)]
    pub phone: Option<String>,
    /// Server note, e.g. when the contact was already unlocked
    #[serde(default)]
    pub detail: Option<String>,
}

/// What to do after an unlock attempt finished
#[derive(Debug, Clone, PartialEq)]
pub enum GateResolution {
    /// Unlocked; send this to start the conversation again
    Retry(Outbound),
    /// Not enough points; show the purchase upsell
    PurchaseUpsell(String),
    /// Failed; keep the prompt open and show the error
    Error(String),
    /// No matching prompt was open
    Ignored,
}

/// Gate state per target user, plus the open prompt
#[derive(Debug, Clone)]
pub struct GateFlow {
    role: Role,
    gates: HashMap<Id, bool>,
    prompt: Option<GatePrompt>,
    in_flight: bool,
}

impl GateFlow {
    /// Create for a viewer with `role`
    pub fn new(role: Role) -> Self {
        Self {
            role,
            gates: HashMap::new(),
            prompt: None,
            in_flight: false,
        }
    }

    /// Viewer's role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Open prompt
    pub fn prompt(&self) -> Option<&GatePrompt> {
        self.prompt.as_ref()
    }

    /// Known gate state for `target`: `Some(true)` unlocked, `Some(false)` locked
    pub fn gate(&self, target: &Id) -> Option<bool> {
        self.gates.get(target).copied()
    }

    /// Whether an unlock call is outstanding
    pub fn is_unlocking(&self) -> bool {
        self.in_flight
    }

    /// `chat.unlock`: the server refused to start a conversation
    pub fn on_unlock_event(
        &mut self,
        student_id: Option<Id>,
        tutor_id: Option<Id>,
        message: Option<String>,
    ) -> Option<&GatePrompt> {
        let Some(prompt) = GatePrompt::from_unlock_event(self.role, student_id, tutor_id, message)
        else {
            warn!(role = ?self.role, "Unlock event without the id this role needs");
            return None;
        };

        info!(target_id = %prompt.target(), "Conversation gated, unlock required");
        self.gates.insert(prompt.target().clone(), false);
        self.in_flight = false;
        self.prompt = Some(prompt);
        self.prompt.as_ref()
    }

    /// Start a contact unlock for the open prompt
    ///
    /// Returns the tutor to unlock, or `None` if no contact prompt is open or
    /// an unlock is already running.
    pub fn begin_contact_unlock(&mut self) -> Option<Id> {
        if self.in_flight {
            return None;
        }
        match &self.prompt {
            Some(GatePrompt::UnlockContact { tutor_id, .. }) => {
                self.in_flight = true;
                Some(tutor_id.clone())
            }
            _ => None,
        }
    }

    /// Start a job unlock for the open prompt
    ///
    /// Returns `false` if no job prompt is open or an unlock is already
    /// running.
    pub fn begin_job_unlock(&mut self) -> bool {
        if self.in_flight {
            return false;
        }
        if matches!(self.prompt, Some(GatePrompt::UnlockJob { .. })) {
            self.in_flight = true;
            true
        } else {
            false
        }
    }

    /// A contact unlock finished
    pub fn contact_unlock_result(
        &mut self,
        result: std::result::Result<ContactInfo, UnlockError>,
    ) -> GateResolution {
        self.in_flight = false;
        let tutor_id = match &self.prompt {
            Some(GatePrompt::UnlockContact { tutor_id, .. }) => tutor_id.clone(),
            _ => {
                debug!("Contact unlock result with no contact prompt open");
                return GateResolution::Ignored;
            }
        };
        self.resolve(tutor_id, result.map(|_| ()))
    }

    /// A job unlock finished
    pub fn job_unlock_result(&mut self, result: std::result::Result<(), UnlockError>) -> GateResolution {
        self.in_flight = false;
        let student_id = match &self.prompt {
            Some(GatePrompt::UnlockJob { student_id, .. }) => student_id.clone(),
            _ => {
                debug!("Job unlock result with no job prompt open");
                return GateResolution::Ignored;
            }
        };
        self.resolve(student_id, result)
    }

    fn resolve(&mut self, target: Id, result: std::result::Result<(), UnlockError>) -> GateResolution {
        match result {
            Ok(()) => {
                info!(target_id = %target, "Unlocked, restarting conversation");
                self.gates.insert(target.clone(), true);
                self.prompt = None;
                GateResolution::Retry(Outbound::StartConversation { receiver_id: target })
            }
            Err(UnlockError::InsufficientPoints(message)) => {
                info!("Not enough points to unlock, routing to purchase");
                self.prompt = None;
                GateResolution::PurchaseUpsell(message)
            }
            Err(UnlockError::Failed(message)) => {
                warn!("Unlock failed: {}", message);
                GateResolution::Error(message)
            }
        }
    }

    /// Close the prompt without unlocking
    pub fn dismiss(&mut self) {
        self.prompt = None;
        self.in_flight = false;
    }
}

/// Performs unlocks
pub trait ContactUnlocker: Send + Sync + 'static {
    /// Spend a point on `tutor_id`'s contact
    fn unlock_contact(
        &self,
        tutor_id: &Id,
    ) -> impl Future<Output = std::result::Result<ContactInfo, UnlockError>> + Send;

    /// Unlock job `job_id`
    fn unlock_job(&self, job_id: &Id) -> impl Future<Output = std::result::Result<(), UnlockError>> + Send;

    /// Whether `target_id`'s contact is already unlocked
    fn unlock_status(
        &self,
        target_id: &Id,
    ) -> impl Future<Output = std::result::Result<bool, UnlockError>> + Send;
}

#[derive(Debug, Deserialize)]
struct UnlockStatus {
    #[serde(default)]
    unlocked: bool,
}

/// HTTP client for the unlock endpoints
///
/// A 401 answer triggers one token refresh through `R` and one retry of the
/// request. Concurrent calls rejected with the same token share a single
/// refresh.
#[derive(Debug, Clone)]
pub struct UnlockApi<R = AuthClient> {
    http: reqwest::Client,
    base_url: String,
    sessions: SessionManager,
    refresher: Arc<R>,
    refresh_lock: Arc<Mutex<()>>,
}

impl<R: TokenRefresher> UnlockApi<R> {
    /// Create a client against `base_url`, authenticating with the session's token
    pub fn new(base_url: &str, sessions: SessionManager, refresher: R) -> Result<Self> {
        url::Url::parse(base_url)?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            sessions,
            refresher: Arc::new(refresher),
            refresh_lock: Arc::new(Mutex::new(())),
        })
    }

    async fn token(&self) -> Result<String> {
        self.sessions.access_token().await.ok_or(Error::MissingToken)
    }

    /// Send with the current token; on 401 refresh once and resend
    async fn send_authorized<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let token = self.token().await?;
        let response = build(&token).send().await?;
        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let token = self.refreshed_token(&token).await?;
        Ok(build(&token).send().await?)
    }

    async fn refreshed_token(&self, rejected: &str) -> Result<String> {
        let _guard = self.refresh_lock.lock().await;

        // Someone else refreshed while we waited for the lock
        if let Some(current) = self.sessions.access_token().await {
            if current != rejected {
                return Ok(current);
            }
        }

        info!("API rejected the access token, refreshing");
        self.refresher.refresh().await
    }

    /// `POST /api/contact-unlock/unlock/`
    pub async fn unlock_contact(&self, target_id: &Id) -> Result<ContactInfo> {
        let url = endpoint(&self.base_url, "/api/contact-unlock/unlock/")?;
        let body = serde_json::json!({ "target_id": target_id });
        let response = self
            .send_authorized(|token| {
                self.http
                    .post(url.clone())
                    .bearer_auth(token)
                    .json(&body)
            })
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(ContactInfo::default());
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// `GET /api/contact-unlock/status/?target_id=`
    pub async fn unlock_status(&self, target_id: &Id) -> Result<bool> {
        let mut url = endpoint(&self.base_url, "/api/contact-unlock/status/")?;
        url.query_pairs_mut()
            .append_pair("target_id", &target_id.to_string());

        let response = self
            .send_authorized(|token| self.http.get(url.clone()).bearer_auth(token))
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let status: UnlockStatus = response.json().await?;
        Ok(status.unlocked)
    }

    /// `POST /api/jobs/{id}/unlock/`
    pub async fn unlock_job(&self, job_id: &Id) -> Result<()> {
        let url = endpoint(&self.base_url, &format!("/api/jobs/{}/unlock/", job_id))?;
        let response = self
            .send_authorized(|token| self.http.post(url.clone()).bearer_auth(token))
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(())
    }
}

impl<R: TokenRefresher> ContactUnlocker for UnlockApi<R> {
    async fn unlock_contact(&self, tutor_id: &Id) -> std::result::Result<ContactInfo, UnlockError> {
        UnlockApi::unlock_contact(self, tutor_id)
            .await
            .map_err(|e| UnlockError::from_error(&e))
    }

    async fn unlock_job(&self, job_id: &Id) -> std::result::Result<(), UnlockError> {
        UnlockApi::unlock_job(self, job_id)
            .await
            .map_err(|e| UnlockError::from_error(&e))
    }

    async fn unlock_status(&self, target_id: &Id) -> std::result::Result<bool, UnlockError> {
        UnlockApi::unlock_status(self, target_id)
            .await
            .map_err(|e| UnlockError::from_error(&e))
    }
}
