//! Common types for the connection module

use crate::protocol::Outbound;
use std::time::Duration;
use url::Url;

/// Close code for a normal, requested closure
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code the chat server uses when it rejects the access token
pub const CLOSE_AUTH_REJECTED: u16 = 403;
/// Application close code some deployments use for the same rejection
pub const CLOSE_AUTH_REJECTED_APP: u16 = 4003;

/// Lifecycle of the chat connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, never connected
    Idle,
    /// Handshake in progress
    Connecting,
    /// Transport is up
    Open,
    /// Transport is down
    Closed(CloseKind),
}

/// Why the connection is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// The owner closed it; terminal
    Intentional,
    /// Dropped, rejected or failed; may reconnect
    Unintentional,
}

/// Reason a transport closed or failed to open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Close code 1000
    Normal,
    /// The server rejected our access token
    AuthRejected,
    /// Anything else, with the close code when there was one
    Abnormal(Option<u16>),
}

impl CloseReason {
    /// Classify a websocket close code
    pub fn from_code(code: u16) -> Self {
        match code {
            CLOSE_NORMAL => CloseReason::Normal,
            CLOSE_AUTH_REJECTED | CLOSE_AUTH_REJECTED_APP => CloseReason::AuthRejected,
            other => CloseReason::Abnormal(Some(other)),
        }
    }

    /// Classify an HTTP status returned instead of a websocket upgrade
    pub fn from_handshake_status(status: u16) -> Self {
        match status {
            401 | 403 => CloseReason::AuthRejected,
            other => CloseReason::Abnormal(Some(other)),
        }
    }
}

/// Result of asking the manager to connect
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectDecision {
    /// Open a transport to this URL
    Start(Url),
    /// Already connecting or open; nothing to do
    AlreadyActive,
    /// A token refresh is outstanding; it will reconnect when it finishes
    RefreshPending,
    /// No access token; stays where it is
    MissingToken,
    /// Closed intentionally; never reconnects
    Terminated,
}

/// What to do after the transport closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Reconnect after this delay
    Reconnect(Duration),
    /// Refresh the access token, then reconnect
    RefreshToken,
    /// Authentication failed and cannot be recovered
    SessionExpired,
    /// Stay closed
    Stop,
}

/// What to do after a token refresh finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Connect again right away
    Reconnect,
    /// Give up; the user has to log in again
    SessionExpired,
}

/// Result of `send` on the manager
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Transport is open; write this now
    Transmit(Outbound),
    /// Held in the outbound queue until the next open
    Queued,
    /// Connection was closed intentionally; the event is discarded
    Dropped,
}
