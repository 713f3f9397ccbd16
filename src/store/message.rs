//! Message records and delivery status tracking

use crate::protocol::{ChatMessage, Id, UserSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::protocol::DeliveryStatus;

/// A message in the open conversation
///
/// Local sends start out tentative: no server id, only a `client_id`. The
/// server echo fills in the id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Server id, `None` while tentative
    pub id: Option<Id>,
    /// Client id of a local send
    pub client_id: Option<Uuid>,
    /// Owning conversation
    pub conversation_id: Id,
    /// Sender
    pub sender: UserSummary,
    /// Text content
    pub content: String,
    /// Server timestamp, or local send time while tentative
    pub timestamp: Option<DateTime<Utc>>,
    /// Delivery status; never regresses
    pub status: DeliveryStatus,
    /// Read by the recipient
    pub is_read: bool,
    /// System-generated message
    pub is_system: bool,
    /// Attachment URL
    pub attachment: Option<String>,
}

impl Message {
    /// Create the local echo of a message we are sending
    pub fn tentative(
        client_id: Uuid,
        conversation_id: Id,
        sender: UserSummary,
        content: String,
    ) -> Self {
        Self {
            id: None,
            client_id: Some(client_id),
            conversation_id,
            sender,
            content,
            timestamp: Some(Utc::now()),
            status: DeliveryStatus::Sent,
            is_read: false,
            is_system: false,
            attachment: None,
        }
    }

    /// Build from a server message, never below `floor`
    pub fn from_wire(msg: ChatMessage, floor: DeliveryStatus) -> Self {
        let status = msg.status.map_or(floor, |s| s.max(floor));
        let is_read = msg.is_read || status == DeliveryStatus::Seen;
        Self {
            id: Some(msg.id),
            client_id: msg.client_id,
            conversation_id: msg.conversation_id,
            sender: msg.sender,
            content: msg.content,
            timestamp: msg.timestamp,
            status,
            is_read,
            is_system: msg.is_system,
            attachment: msg.attachment,
        }
    }

    /// Whether this is a local send the server has not echoed yet
    pub fn is_tentative(&self) -> bool {
        self.id.is_none()
    }

    /// Whether this message has server id `id`
    pub fn matches_id(&self, id: &Id) -> bool {
        self.id.as_ref() == Some(id)
    }

    /// Raise the status to `status`; lower statuses are ignored
    ///
    /// Returns whether anything changed.
    pub fn advance_status(&mut self, status: DeliveryStatus) -> bool {
        if status <= self.status {
            return false;
        }
        self.status = status;
        if status == DeliveryStatus::Seen {
            self.is_read = true;
        }
        true
    }

    /// Turn a tentative message into the confirmed server copy
    pub fn confirm(&mut self, msg: ChatMessage) {
        self.id = Some(msg.id);
        if msg.timestamp.is_some() {
            self.timestamp = msg.timestamp;
        }
        self.content = msg.content;
        self.attachment = msg.attachment.or(self.attachment.take());
        self.is_read |= msg.is_read;
        if let Some(status) = msg.status {
            self.advance_status(status);
        }
    }

    /// Check mark shown next to our own messages
    pub fn status_indicator(&self) -> &'static str {
        match self.status {
            DeliveryStatus::Sent => "✓",
            DeliveryStatus::Delivered | DeliveryStatus::Seen => "✓✓",
        }
    }
}
