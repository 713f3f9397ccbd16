//! Conversation store
//!
//! [`ConversationStore`] is the single writer of everything the chat view
//! shows: the conversation list, the open conversation's messages, typing
//! indicators and search results. Server events are applied through the
//! `apply_*`/`replace_*` methods; the only local writes are tentative echoes
//! of our own sends.

use super::conversation::Conversation;
use super::message::{DeliveryStatus, Message};
use super::typing::TypingIndicators;
use crate::protocol::{ChatMessage, ConversationSummary, Id, UserSummary};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// What applying an inbound `chat.message` did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IncomingOutcome {
    /// The message was added to the open conversation
    pub appended: bool,
    /// A remote message landed in the open conversation; the caller should
    /// acknowledge it with `chat.delivered` and `chat.read`
    pub acknowledge: bool,
    /// The conversation was not known before
    pub new_conversation: bool,
}

/// Client-side chat state for one viewer
#[derive(Debug, Clone)]
pub struct ConversationStore {
    viewer: UserSummary,
    conversations: Vec<Conversation>,
    active: Option<Id>,
    messages: Vec<Message>,
    typing: TypingIndicators,
    search_results: Vec<UserSummary>,
    loading: bool,
}

impl ConversationStore {
    /// Create an empty store for `viewer`
    pub fn new(viewer: UserSummary, typing_timeout: Duration) -> Self {
        Self {
            viewer,
            conversations: Vec::new(),
            active: None,
            messages: Vec::new(),
            typing: TypingIndicators::new(typing_timeout),
            search_results: Vec::new(),
            loading: false,
        }
    }

    /// The logged-in user
    pub fn viewer(&self) -> &UserSummary {
        &self.viewer
    }

    /// All conversations, in list order
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    /// Look up a conversation by id
    pub fn conversation(&self, id: &Id) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    fn conversation_mut(&mut self, id: &Id) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| &c.id == id)
    }

    /// Id of the open conversation
    pub fn active_id(&self) -> Option<&Id> {
        self.active.as_ref()
    }

    /// The open conversation
    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active.as_ref().and_then(|id| self.conversation(id))
    }

    /// The open conversation's partner
    pub fn active_partner(&self) -> Option<&UserSummary> {
        self.active_conversation()
            .and_then(|c| c.partner(&self.viewer.id))
    }

    /// Messages of the open conversation, in receipt order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Find a message of the open conversation by server id
    pub fn message(&self, id: &Id) -> Option<&Message> {
        self.messages.iter().find(|m| m.matches_id(id))
    }

    /// Latest user search results
    pub fn search_results(&self) -> &[UserSummary] {
        &self.search_results
    }

    /// Waiting for a list or search answer
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Set the loading flag
    pub fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    /// Typing indicators
    pub fn typing(&self) -> &TypingIndicators {
        &self.typing
    }

    /// Whether the open conversation's partner is typing at `now`
    pub fn partner_typing(&self, now: Instant) -> bool {
        match self.active_partner() {
            Some(partner) => self.typing.is_typing(&partner.id, now),
            None => false,
        }
    }

    /// `chat.conversations`: replace the whole list
    pub fn replace_conversations(&mut self, conversations: Vec<ConversationSummary>) {
        self.conversations = conversations
            .into_iter()
            .map(Conversation::from_summary)
            .collect();
        self.loading = false;
    }

    /// `chat.messages`: replace the open conversation's history
    ///
    /// Ignored when nothing is open or the history belongs to another
    /// conversation. Unconfirmed local sends are kept after the history, and
    /// a status already known for a message id is never lowered.
    /// Returns whether the history was applied.
    pub fn replace_messages(
        &mut self,
        conversation_id: Option<&Id>,
        messages: Vec<ChatMessage>,
    ) -> bool {
        let Some(active) = self.active.clone() else {
            debug!("History arrived with no open conversation, ignoring");
            return false;
        };

        if let Some(id) = conversation_id {
            if id != &active {
                debug!(conversation_id = %id, active = %active, "Ignoring stale history");
                return false;
            }
        }

        let known: HashMap<Id, DeliveryStatus> = self
            .messages
            .iter()
            .filter_map(|m| m.id.clone().map(|id| (id, m.status)))
            .collect();

        let tentative: Vec<Message> = self
            .messages
            .drain(..)
            .filter(|m| m.is_tentative() && m.conversation_id == active)
            .collect();

        let viewer_id = self.viewer.id.clone();
        self.messages = messages
            .into_iter()
            .map(|msg| {
                let floor = if msg.sender.id == viewer_id {
                    DeliveryStatus::Sent
                } else {
                    DeliveryStatus::Delivered
                };
                let mut message = Message::from_wire(msg, floor);
                if let Some(status) = message.id.as_ref().and_then(|id| known.get(id)) {
                    message.advance_status(*status);
                }
                message
            })
            .collect();
        self.messages.extend(tentative);
        true
    }

    /// `chat.message`: reconcile a new message
    ///
    /// Unknown conversations are synthesized at the top of the list. Messages
    /// for the open conversation are appended (own echoes replace their
    /// tentative copy); remote messages elsewhere set the unread flag.
    pub fn apply_incoming(&mut self, msg: ChatMessage) -> IncomingOutcome {
        let mut outcome = IncomingOutcome::default();
        let from_other = msg.sender.id != self.viewer.id;
        let is_active = self.active.as_ref() == Some(&msg.conversation_id);

        match self.conversation_mut(&msg.conversation_id) {
            Some(conversation) => conversation.set_last_message(&msg),
            None => {
                let mut conversation = Conversation::synthesize(&msg, &self.viewer);
                if from_other {
                    conversation.mark_unread();
                }
                self.conversations.insert(0, conversation);
                outcome.new_conversation = true;
            }
        }

        if is_active {
            outcome.appended = if from_other {
                self.append_remote(msg)
            } else {
                self.reconcile_own(msg)
            };

            if from_other {
                if let Some(active) = self.active.clone() {
                    if let Some(conversation) = self.conversation_mut(&active) {
                        conversation.mark_read();
                    }
                }
                // Duplicates were acknowledged on first arrival
                outcome.acknowledge = outcome.appended;
            }
        } else if from_other {
            if let Some(conversation) = self.conversation_mut(&msg.conversation_id) {
                conversation.mark_unread();
            }
        }

        outcome
    }

    fn append_remote(&mut self, msg: ChatMessage) -> bool {
        if let Some(existing) = self.messages.iter_mut().find(|m| m.matches_id(&msg.id)) {
            debug!(message_id = %msg.id, "Duplicate message, ignoring");
            if let Some(status) = msg.status {
                existing.advance_status(status);
            }
            return false;
        }

        self.messages
            .push(Message::from_wire(msg, DeliveryStatus::Delivered));
        true
    }

    fn reconcile_own(&mut self, msg: ChatMessage) -> bool {
        if let Some(existing) = self.messages.iter_mut().find(|m| m.matches_id(&msg.id)) {
            if let Some(status) = msg.status {
                existing.advance_status(status);
            }
            return false;
        }

        let by_client_id = msg.client_id.and_then(|client_id| {
            self.messages
                .iter()
                .position(|m| m.is_tentative() && m.client_id == Some(client_id))
        });
        let slot = by_client_id.or_else(|| {
            self.messages
                .iter()
                .position(|m| m.is_tentative() && m.content == msg.content)
        });

        match slot {
            Some(index) => {
                self.messages[index].confirm(msg);
                false
            }
            None => {
                self.messages.push(Message::from_wire(msg, DeliveryStatus::Sent));
                true
            }
        }
    }

    /// `chat.message_status`: raise a message's status
    ///
    /// Unknown ids are dropped. Returns whether anything changed.
    pub fn apply_status(&mut self, message_id: &Id, status: DeliveryStatus) -> bool {
        match self.messages.iter_mut().find(|m| m.matches_id(message_id)) {
            Some(message) => message.advance_status(status),
            None => {
                debug!(message_id = %message_id, "Status for unknown message, ignoring");
                false
            }
        }
    }

    /// `chat.read`, or the viewer opening a conversation
    pub fn mark_read(&mut self, conversation_id: &Id) {
        if let Some(conversation) = self.conversation_mut(conversation_id) {
            conversation.mark_read();
        }
    }

    /// `chat.typing`
    pub fn set_typing(&mut self, sender: Id, is_typing: bool, now: Instant) {
        self.typing.set(sender, is_typing, now);
    }

    /// Sweep expired typing indicators
    pub fn expire_typing(&mut self, now: Instant) -> Vec<Id> {
        self.typing.expire(now)
    }

    /// `chat.conversation_started`: open the conversation
    ///
    /// Adds it to the top of the list if new, clears its unread flag and the
    /// search state, and empties the message list until history arrives.
    pub fn conversation_started(&mut self, summary: ConversationSummary) -> Id {
        let id = summary.id.clone();
        if self.conversation(&id).is_none() {
            self.conversations
                .insert(0, Conversation::from_summary(summary));
        }

        self.mark_read(&id);
        self.active = Some(id.clone());
        self.messages.clear();
        self.typing.clear();
        self.search_results.clear();
        id
    }

    /// `chat.search_results`
    pub fn set_search_results(&mut self, results: Vec<UserSummary>) {
        self.search_results = results;
        self.loading = false;
    }

    /// Open an existing conversation from the list
    ///
    /// Returns `false` if the id is unknown.
    pub fn select(&mut self, id: &Id) -> bool {
        if self.conversation(id).is_none() {
            return false;
        }

        if self.active.as_ref() != Some(id) {
            self.messages.clear();
            self.typing.clear();
        }
        self.active = Some(id.clone());
        self.mark_read(id);
        true
    }

    /// Back to the list
    pub fn clear_active(&mut self) {
        self.active = None;
        self.messages.clear();
        self.typing.clear();
    }

    /// Append the local echo of a send to the open conversation
    ///
    /// Returns the client id to put on the outbound event, or `None` when no
    /// conversation is open.
    pub fn push_tentative(&mut self, content: String) -> Option<(Id, Uuid)> {
        let conversation_id = self.active.clone()?;
        let client_id = Uuid::new_v4();
        self.messages.push(Message::tentative(
            client_id,
            conversation_id.clone(),
            self.viewer.clone(),
            content,
        ));
        Some((conversation_id, client_id))
    }
}
