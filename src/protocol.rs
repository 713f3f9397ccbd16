//! Protocol module
//!
//! This module defines the chat event protocol spoken over the websocket:
//! - The `{ "type": "chat.*", ... }` envelope in both directions
//! - Wire shapes for users, conversations and messages
//! - Frame parsing with forward-compatible handling of unknown event types

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Server-assigned identifier (user, conversation or message)
///
/// The backend emits integer ids, but some payloads carry them as strings.
/// Equality and hashing use a canonical form, so `101` and `"101"` are the
/// same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// Numeric id
    Num(i64),
    /// String id
    Text(String),
}

impl Id {
    fn canonical(&self) -> Cow<'_, str> {
        match self {
            Id::Num(n) => Cow::Owned(n.to_string()),
            Id::Text(s) => {
                let trimmed = s.trim();
                match trimmed.parse::<i64>() {
                    Ok(n) => Cow::Owned(n.to_string()),
                    Err(_) => Cow::Borrowed(trimmed),
                }
            }
        }
    }
}

impl PartialEq for Id {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for Id {}

impl Hash for Id {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Id::Num(value)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        match value.trim().parse::<i64>() {
            Ok(n) => Id::Num(n),
            Err(_) => Id::Text(value.to_string()),
        }
    }
}

/// Delivery status of a message, ordered `Sent < Delivered < Seen`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Accepted by the server
    Sent,
    /// Delivered to the recipient's client
    Delivered,
    /// Read by the recipient
    Seen,
}

impl Default for DeliveryStatus {
    fn default() -> Self {
        Self::Sent
    }
}

/// Public summary of a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    /// User id
    #[serde(alias = "user__id")]
    pub id: Id,
    /// Username
    #[serde(alias = "user__username")]
    pub username: String,
    /// Avatar URL, if the backend provided one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl UserSummary {
    /// Create a summary without an avatar
    pub fn new(id: impl Into<Id>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            avatar: None,
        }
    }

    /// Avatar URL, falling back to a generated initials avatar
    pub fn avatar_url(&self) -> String {
        match &self.avatar {
            Some(avatar) if !avatar.is_empty() => avatar.clone(),
            _ => {
                let name: String =
                    url::form_urlencoded::byte_serialize(self.username.as_bytes()).collect();
                format!(
                    "https://ui-avatars.com/api/?name={}&background=6366f1&color=fff",
                    name
                )
            }
        }
    }
}

/// A chat message as serialized by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server-assigned message id
    pub id: Id,
    /// Conversation this message belongs to
    pub conversation_id: Id,
    /// Who sent it
    pub sender: UserSummary,
    /// Text content
    #[serde(default)]
    pub content: String,
    /// Server timestamp
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Delivery status as seen by the sender, when known
    #[serde(default)]
    pub status: Option<DeliveryStatus>,
    /// Whether the recipient has read it
    #[serde(default)]
    pub is_read: bool,
    /// System-generated message
    #[serde(default)]
    pub is_system: bool,
    /// Attachment URL
    #[serde(default)]
    pub attachment: Option<String>,
    /// Echo of the client id sent with `chat.message`, if the server returns it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Uuid>,
}

/// Most recent message of a conversation, as listed in `chat.conversations`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LastMessage {
    /// Text content
    #[serde(default)]
    pub content: String,
    /// Server timestamp
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Sender id
    #[serde(default)]
    pub sender_id: Option<Id>,
    /// Sender username
    #[serde(default)]
    pub sender_username: Option<String>,
}

impl From<&ChatMessage> for LastMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            content: msg.content.clone(),
            timestamp: msg.timestamp,
            sender_id: Some(msg.sender.id.clone()),
            sender_username: Some(msg.sender.username.clone()),
        }
    }
}

/// A conversation as serialized by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation id
    pub id: Id,
    /// Participants, including the viewer
    #[serde(default)]
    pub participants: Vec<UserSummary>,
    /// Most recent message
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    /// Whether the viewer has unread messages in it
    #[serde(default)]
    pub has_unread: bool,
}

/// Events received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Inbound {
    /// Full conversation list for the viewer
    #[serde(rename = "chat.conversations")]
    Conversations {
        /// All conversations
        #[serde(default)]
        conversations: Vec<ConversationSummary>,
    },

    /// History of one conversation
    #[serde(rename = "chat.messages")]
    Messages {
        /// Conversation the history belongs to, when the server includes it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<Id>,
        /// Messages in server order
        #[serde(default)]
        messages: Vec<ChatMessage>,
    },

    /// A new message, from the partner or the echo of our own send
    #[serde(rename = "chat.message")]
    Message {
        /// The message
        message: ChatMessage,
    },

    /// Delivery status update for a message we sent
    #[serde(rename = "chat.message_status")]
    MessageStatus {
        /// Message id
        message_id: Id,
        /// New status
        status: DeliveryStatus,
    },

    /// Partner started or stopped typing
    #[serde(rename = "chat.typing")]
    Typing {
        /// Who is typing
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<Id>,
        /// Typing or stopped
        is_typing: bool,
    },

    /// A conversation was read
    #[serde(rename = "chat.read")]
    Read {
        /// Conversation id
        conversation_id: Id,
        /// Who read it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reader_id: Option<Id>,
    },

    /// Answer to `chat.start_conversation`
    #[serde(rename = "chat.conversation_started")]
    ConversationStarted {
        /// The (possibly pre-existing) conversation
        conversation: ConversationSummary,
    },

    /// Answer to `chat.search_user`
    #[serde(rename = "chat.search_results")]
    SearchResults {
        /// Matching users
        #[serde(default)]
        results: Vec<UserSummary>,
    },

    /// Conversation start was refused until the contact is unlocked
    #[serde(rename = "chat.unlock")]
    Unlock {
        /// Student side of the pair
        #[serde(default, skip_serializing_if = "Option::is_none")]
        student_id: Option<Id>,
        /// Tutor side of the pair
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tutor_id: Option<Id>,
        /// Human readable reason
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Any event type this client does not know
    #[serde(other)]
    Unknown,
}

impl Inbound {
    /// Wire name of the event, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::Conversations { .. } => "chat.conversations",
            Inbound::Messages { .. } => "chat.messages",
            Inbound::Message { .. } => "chat.message",
            Inbound::MessageStatus { .. } => "chat.message_status",
            Inbound::Typing { .. } => "chat.typing",
            Inbound::Read { .. } => "chat.read",
            Inbound::ConversationStarted { .. } => "chat.conversation_started",
            Inbound::SearchResults { .. } => "chat.search_results",
            Inbound::Unlock { .. } => "chat.unlock",
            Inbound::Unknown => "unknown",
        }
    }
}

/// Events sent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Outbound {
    /// Request the conversation list
    #[serde(rename = "chat.get_conversations")]
    GetConversations,

    /// Request a conversation's history
    #[serde(rename = "chat.get_messages")]
    GetMessages {
        /// Conversation id
        conversation_id: Id,
    },

    /// Send a message
    #[serde(rename = "chat.message")]
    Message {
        /// Conversation id
        conversation_id: Id,
        /// Text content
        content: String,
        /// Client-side id of the tentative local copy
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<Uuid>,
    },

    /// Open (or reopen) a conversation with a user
    #[serde(rename = "chat.start_conversation")]
    StartConversation {
        /// Other user
        receiver_id: Id,
    },

    /// Typing indicator for the partner
    #[serde(rename = "chat.typing")]
    Typing {
        /// Partner id
        receiver_id: Id,
        /// Typing or stopped
        is_typing: bool,
    },

    /// Mark a conversation read
    #[serde(rename = "chat.read")]
    Read {
        /// Conversation id
        conversation_id: Id,
    },

    /// Search users by keyword
    #[serde(rename = "chat.search_user")]
    SearchUser {
        /// Search keyword
        keyword: String,
    },

    /// Acknowledge receipt of a message
    #[serde(rename = "chat.delivered")]
    Delivered {
        /// Message id
        message_id: Id,
    },
}

impl Outbound {
    /// Encode as a websocket text frame
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire name of the event, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::GetConversations => "chat.get_conversations",
            Outbound::GetMessages { .. } => "chat.get_messages",
            Outbound::Message { .. } => "chat.message",
            Outbound::StartConversation { .. } => "chat.start_conversation",
            Outbound::Typing { .. } => "chat.typing",
            Outbound::Read { .. } => "chat.read",
            Outbound::SearchUser { .. } => "chat.search_user",
            Outbound::Delivered { .. } => "chat.delivered",
        }
    }
}

/// Parse an inbound text frame
///
/// Returns `Ok(None)` for well-formed envelopes of an unknown type, which
/// are ignored for forward compatibility.
pub fn parse_frame(text: &str) -> Result<Option<Inbound>> {
    let event: Inbound = serde_json::from_str(text)
        .map_err(|e| Error::Protocol(format!("Invalid chat frame: {}", e)))?;

    match event {
        Inbound::Unknown => Ok(None),
        event => Ok(Some(event)),
    }
}
