//! Messaging controller
//!
//! [`MessagingController`] is the glue between the chat view and the rest of
//! the crate. It turns server events and user actions into store updates,
//! outbound events and notices, without touching the network itself: the
//! owner drains [`MessagingController::take_outbound`] into the socket and
//! [`MessagingController::take_notices`] into the UI.

use crate::auth::SessionUser;
use crate::config::ClientConfig;
use crate::gating::{ContactInfo, GateFlow, GatePrompt, GateResolution, Role, UnlockError};
use crate::protocol::{Id, Inbound, Outbound, UserSummary};
use crate::store::ConversationStore;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Something the UI should react to beyond re-rendering the store
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Connection is up and the conversation list was requested
    Connected,
    /// Connection lost, retrying after the delay
    Reconnecting(Duration),
    /// Show an unlock prompt instead of opening a conversation
    Gate(GatePrompt),
    /// Contact unlocked
    ContactUnlocked(ContactInfo),
    /// Not enough points; show the purchase page
    PurchaseUpsell(String),
    /// Unlock failed; the prompt stays open
    UnlockFailed(String),
    /// Answer to an unlock status query
    UnlockStatus {
        /// User that was asked about
        target: Id,
        /// Whether their contact is unlocked
        unlocked: bool,
    },
    /// Authentication is gone; log in again
    SessionExpired(String),
}

/// State-owning controller for the chat view
#[derive(Debug)]
pub struct MessagingController {
    store: ConversationStore,
    gates: GateFlow,
    deep_link: Option<String>,
    typing_timeout: Duration,
    local_typing: Option<(Id, Instant)>,
    outbox: Vec<Outbound>,
    notices: Vec<Notice>,
}

impl MessagingController {
    /// Create a controller for `viewer`
    ///
    /// # Arguments
    /// * `viewer` - Logged-in user
    /// * `role` - Decides which unlock flow applies
    /// * `typing_timeout` - Lifetime of typing signals in both directions
    /// * `deep_link` - Username to open a conversation with once it is found
    pub fn new(
        viewer: UserSummary,
        role: Role,
        typing_timeout: Duration,
        deep_link: Option<String>,
    ) -> Self {
        Self {
            store: ConversationStore::new(viewer, typing_timeout),
            gates: GateFlow::new(role),
            deep_link: deep_link.filter(|u| !u.trim().is_empty()),
            typing_timeout,
            local_typing: None,
            outbox: Vec::new(),
            notices: Vec::new(),
        }
    }

    /// Create for a stored session user
    pub fn for_user(user: &SessionUser, config: &ClientConfig, deep_link: Option<String>) -> Self {
        Self::new(
            UserSummary::new(user.user_id.clone(), user.username.clone()),
            Role::from_user_type(&user.user_type),
            config.typing_timeout(),
            deep_link,
        )
    }

    /// Conversation state
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Unlock state
    pub fn gates(&self) -> &GateFlow {
        &self.gates
    }

    /// Deep-link username still waiting to be opened
    pub fn deep_link(&self) -> Option<&str> {
        self.deep_link.as_deref()
    }

    /// Outbound events produced since the last call, in order
    pub fn take_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Notices produced since the last call, in order
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn send(&mut self, event: Outbound) {
        self.outbox.push(event);
    }

    /// The connection opened (or reopened)
    pub fn on_open(&mut self) {
        self.store.set_loading(true);
        self.send(Outbound::GetConversations);

        if let Some(username) = self.deep_link.clone() {
            debug!(username = %username, "Searching deep-link user");
            self.send(Outbound::SearchUser { keyword: username });
        }
        self.notices.push(Notice::Connected);
    }

    /// The connection dropped and will be retried
    pub fn on_reconnecting(&mut self, delay: Duration) {
        self.notices.push(Notice::Reconnecting(delay));
    }

    /// Authentication could not be recovered
    pub fn on_session_expired(&mut self, reason: String) {
        self.notices.push(Notice::SessionExpired(reason));
    }

    /// Apply one server event
    pub fn handle(&mut self, event: Inbound, now: Instant) {
        match event {
            Inbound::Conversations { conversations } => {
                debug!(count = conversations.len(), "Conversation list received");
                self.store.replace_conversations(conversations);
            }
            Inbound::Messages {
                conversation_id,
                messages,
            } => {
                self.store
                    .replace_messages(conversation_id.as_ref(), messages);
            }
            Inbound::Message { message } => {
                let message_id = message.id.clone();
                let conversation_id = message.conversation_id.clone();
                let outcome = self.store.apply_incoming(message);

                if outcome.acknowledge {
                    self.send(Outbound::Delivered { message_id });
                    self.send(Outbound::Read { conversation_id });
                }
            }
            Inbound::MessageStatus { message_id, status } => {
                self.store.apply_status(&message_id, status);
            }
            Inbound::Typing {
                sender_id,
                is_typing,
            } => {
                let sender = sender_id.or_else(|| self.store.active_partner().map(|p| p.id.clone()));
                match sender {
                    Some(sender) => self.store.set_typing(sender, is_typing, now),
                    None => debug!("Typing signal with no sender and no open conversation"),
                }
            }
            Inbound::Read {
                conversation_id, ..
            } => {
                self.store.mark_read(&conversation_id);
            }
            Inbound::ConversationStarted { conversation } => {
                let viewer_id = self.store.viewer().id.clone();
                let gated_target_joined = self.gates.prompt().is_some_and(|prompt| {
                    conversation
                        .participants
                        .iter()
                        .any(|p| &p.id == prompt.target() && p.id != viewer_id)
                });
                if gated_target_joined {
                    self.gates.dismiss();
                }

                self.stop_local_typing();
                let id = self.store.conversation_started(conversation);
                info!(conversation_id = %id, "Conversation opened");
                self.send(Outbound::GetMessages {
                    conversation_id: id.clone(),
                });
                self.send(Outbound::Read {
                    conversation_id: id,
                });
            }
            Inbound::SearchResults { results } => {
                let target = self.deep_link.as_ref().and_then(|username| {
                    results
                        .iter()
                        .find(|u| &u.username == username)
                        .map(|u| u.id.clone())
                });
                self.store.set_search_results(results);

                if let Some(receiver_id) = target {
                    info!(receiver_id = %receiver_id, "Opening deep-link conversation");
                    self.deep_link = None;
                    self.send(Outbound::StartConversation { receiver_id });
                }
            }
            Inbound::Unlock {
                student_id,
                tutor_id,
                message,
            } => {
                if let Some(prompt) = self.gates.on_unlock_event(student_id, tutor_id, message) {
                    self.notices.push(Notice::Gate(prompt.clone()));
                }
            }
            Inbound::Unknown => {}
        }
    }

    /// Open a conversation from the list
    pub fn select_conversation(&mut self, id: &Id) -> bool {
        if self.store.active_id() != Some(id) {
            self.stop_local_typing();
        }
        if !self.store.select(id) {
            debug!(conversation_id = %id, "Unknown conversation selected");
            return false;
        }

        self.send(Outbound::GetMessages {
            conversation_id: id.clone(),
        });
        self.send(Outbound::Read {
            conversation_id: id.clone(),
        });
        true
    }

    /// Send a message in the open conversation
    ///
    /// Shows a tentative copy right away. Returns its client id, or `None`
    /// for blank input or when no conversation is open.
    pub fn send_message(&mut self, content: &str) -> Option<Uuid> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }

        let (conversation_id, client_id) = self.store.push_tentative(content.to_string())?;
        self.send(Outbound::Message {
            conversation_id,
            content: content.to_string(),
            client_id: Some(client_id),
        });
        Some(client_id)
    }

    /// Ask the server to open a conversation with `receiver_id`
    pub fn start_conversation(&mut self, receiver_id: Id) {
        self.send(Outbound::StartConversation { receiver_id });
    }

    /// Search users; blank keywords are ignored
    pub fn search(&mut self, keyword: &str) {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return;
        }
        self.store.set_loading(true);
        self.send(Outbound::SearchUser {
            keyword: keyword.to_string(),
        });
    }

    /// The viewer pressed a key in the composer
    ///
    /// Tells the partner we are typing and (re)arms the stop signal.
    pub fn local_typing(&mut self, now: Instant) {
        let Some(partner) = self.store.active_partner().map(|p| p.id.clone()) else {
            return;
        };

        self.send(Outbound::Typing {
            receiver_id: partner.clone(),
            is_typing: true,
        });
        self.local_typing = Some((partner, now + self.typing_timeout));
    }

    fn stop_local_typing(&mut self) {
        if let Some((receiver_id, _)) = self.local_typing.take() {
            self.send(Outbound::Typing {
                receiver_id,
                is_typing: false,
            });
        }
    }

    /// Fire timers due at `now`
    pub fn tick(&mut self, now: Instant) {
        for sender in self.store.expire_typing(now) {
            debug!(sender_id = %sender, "Typing indicator expired");
        }

        if self
            .local_typing
            .as_ref()
            .is_some_and(|(_, deadline)| *deadline <= now)
        {
            self.stop_local_typing();
        }
    }

    /// When [`tick`](Self::tick) next has work
    pub fn next_deadline(&self) -> Option<Instant> {
        let remote = self.store.typing().next_deadline();
        let local = self.local_typing.as_ref().map(|(_, deadline)| *deadline);
        match (remote, local) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Back to the conversation list
    pub fn back_to_list(&mut self) {
        self.stop_local_typing();
        self.store.clear_active();
    }

    /// Start unlocking the gated tutor's contact; returns who to unlock
    pub fn begin_contact_unlock(&mut self) -> Option<Id> {
        self.gates.begin_contact_unlock()
    }

    /// Start unlocking job `job_id` for the gated student
    pub fn begin_job_unlock(&mut self, job_id: Id) -> Option<Id> {
        self.gates.begin_job_unlock().then_some(job_id)
    }

    /// A contact unlock finished
    pub fn contact_unlock_finished(&mut self, result: Result<ContactInfo, UnlockError>) {
        let info = result.as_ref().ok().cloned();
        let resolution = self.gates.contact_unlock_result(result);
        if let (GateResolution::Retry(_), Some(info)) = (&resolution, info) {
            self.notices.push(Notice::ContactUnlocked(info));
        }
        self.apply_resolution(resolution);
    }

    /// A job unlock finished
    pub fn job_unlock_finished(&mut self, result: Result<(), UnlockError>) {
        let resolution = self.gates.job_unlock_result(result);
        self.apply_resolution(resolution);
    }

    /// An unlock status query for `target` finished
    ///
    /// Informational only: gates change through unlocks and `chat.unlock`.
    pub fn unlock_status_finished(&mut self, target: Id, result: Result<bool, UnlockError>) {
        match result {
            Ok(unlocked) => self.notices.push(Notice::UnlockStatus { target, unlocked }),
            Err(e) => self.notices.push(Notice::UnlockFailed(e.to_string())),
        }
    }

    fn apply_resolution(&mut self, resolution: GateResolution) {
        match resolution {
            GateResolution::Retry(event) => self.send(event),
            GateResolution::PurchaseUpsell(message) => {
                self.notices.push(Notice::PurchaseUpsell(message))
            }
            GateResolution::Error(message) => self.notices.push(Notice::UnlockFailed(message)),
            GateResolution::Ignored => {}
        }
    }

    /// Close the unlock prompt
    pub fn dismiss_gate(&mut self) {
        self.gates.dismiss();
    }

    /// The view is going away; cancel timers
    pub fn shutdown(&mut self) {
        self.local_typing = None;
    }
}

/// Date separator label for a message timestamp
///
/// `Today`, `Yesterday`, or a short month and day such as `Mar 5`.
pub fn day_label(timestamp: DateTime<Utc>, today: NaiveDate) -> String {
    let date = timestamp.date_naive();
    if date == today {
        "Today".to_string()
    } else if Some(date) == today.checked_sub_signed(ChronoDuration::days(1)) {
        "Yesterday".to_string()
    } else {
        date.format("%b %-d").to_string()
    }
}

/// Message time as `HH:MM`
pub fn format_time(timestamp: Option<DateTime<Utc>>) -> String {
    timestamp
        .map(|ts| ts.format("%H:%M").to_string())
        .unwrap_or_default()
}
