//! Conversation summaries

use crate::protocol::{ChatMessage, ConversationSummary, Id, LastMessage, UserSummary};
use serde::{Deserialize, Serialize};

/// A conversation as listed in the sidebar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation id
    pub id: Id,
    /// Participants, including the viewer
    pub participants: Vec<UserSummary>,
    /// Most recent message
    pub last_message: Option<LastMessage>,
    /// The viewer has unread messages here
    pub has_unread: bool,
}

impl Conversation {
    /// Adopt a server summary
    pub fn from_summary(summary: ConversationSummary) -> Self {
        Self {
            id: summary.id,
            participants: summary.participants,
            last_message: summary.last_message,
            has_unread: summary.has_unread,
        }
    }

    /// Create a summary for a conversation first seen through a message
    pub fn synthesize(msg: &ChatMessage, viewer: &UserSummary) -> Self {
        let mut participants = vec![msg.sender.clone()];
        if msg.sender.id != viewer.id {
            participants.push(viewer.clone());
        }

        Self {
            id: msg.conversation_id.clone(),
            participants,
            last_message: Some(LastMessage::from(msg)),
            has_unread: false,
        }
    }

    /// The other participant, from the viewer's side
    pub fn partner(&self, viewer_id: &Id) -> Option<&UserSummary> {
        self.participants.iter().find(|p| &p.id != viewer_id)
    }

    /// Replace the last-message pointer
    pub fn set_last_message(&mut self, msg: &ChatMessage) {
        self.last_message = Some(LastMessage::from(msg));
    }

    /// Mark as having unread messages
    pub fn mark_unread(&mut self) {
        self.has_unread = true;
    }

    /// Mark as read
    pub fn mark_read(&mut self) {
        self.has_unread = false;
    }
}
