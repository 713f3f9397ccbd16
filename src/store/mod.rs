//! Conversation state module
//!
//! This module provides the client-side source of truth for the chat view:
//! - `Message` records with monotonic delivery status
//! - `Conversation` summaries with per-viewer unread flags
//! - Expiring typing indicators
//! - `ConversationStore`, mutated only by protocol events and local echoes

pub mod conversation;
pub mod message;
pub mod state;
pub mod typing;

pub use conversation::Conversation;
pub use message::{DeliveryStatus, Message};
pub use state::{ConversationStore, IncomingOutcome};
pub use typing::TypingIndicators;
