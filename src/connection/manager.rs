//! Connection state machine
//!
//! [`ConnectionManager`] holds everything about the chat connection except
//! the transport itself: the lifecycle state, the reconnect backoff, the
//! outbound queue and the token refresh guard. It performs no I/O; the
//! socket driver asks it what to do and carries the answer out.

use super::backoff::Backoff;
use super::types::{
    CloseAction, CloseKind, CloseReason, ConnectDecision, ConnectionState, RefreshOutcome,
    SendOutcome,
};
use crate::{config::ClientConfig, protocol::{Id, Outbound}, Result};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// Transport-free model of one user's chat connection
#[derive(Debug)]
pub struct ConnectionManager {
    user_id: Id,
    ws_protocol: String,
    ws_host: String,
    state: ConnectionState,
    backoff: Backoff,
    queue: VecDeque<Outbound>,
    token_refresh_attempted: bool,
    refresh_in_flight: bool,
}

impl ConnectionManager {
    /// Create an idle manager for `user_id`
    pub fn new(user_id: Id, config: &ClientConfig) -> Self {
        Self {
            user_id,
            ws_protocol: config.ws_protocol.clone(),
            ws_host: config.ws_host.trim_end_matches('/').to_string(),
            state: ConnectionState::Idle,
            backoff: Backoff::new(config.reconnect_floor(), config.reconnect_ceiling()),
            queue: VecDeque::new(),
            token_refresh_attempted: false,
            refresh_in_flight: false,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the transport is open
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Number of events waiting for the next open
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Events waiting for the next open, oldest first
    pub fn queued(&self) -> impl Iterator<Item = &Outbound> {
        self.queue.iter()
    }

    /// Delay the next unintentional close would wait before reconnecting
    pub fn current_delay(&self) -> Duration {
        self.backoff.current()
    }

    /// Whether a token refresh was already tried since the last open
    pub fn token_refresh_attempted(&self) -> bool {
        self.token_refresh_attempted
    }

    /// Websocket URL for this user and token
    pub fn url_for(&self, token: &str) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}://{}/ws/chat/{}/",
            self.ws_protocol, self.ws_host, self.user_id
        ))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    /// Ask to connect
    ///
    /// No-op while connecting or open, while a token refresh is outstanding,
    /// and after an intentional close. Without a token the state is left
    /// unchanged.
    pub fn connect(&mut self, token: Option<&str>) -> Result<ConnectDecision> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => {
                debug!("Already connected or connecting, skipping connect");
                return Ok(ConnectDecision::AlreadyActive);
            }
            ConnectionState::Closed(CloseKind::Intentional) => {
                debug!("Connection closed intentionally, not reconnecting");
                return Ok(ConnectDecision::Terminated);
            }
            ConnectionState::Idle | ConnectionState::Closed(CloseKind::Unintentional) => {}
        }

        if self.refresh_in_flight {
            debug!("Token refresh in flight, deferring connect");
            return Ok(ConnectDecision::RefreshPending);
        }

        let token = match token.filter(|t| !t.is_empty()) {
            Some(token) => token,
            None => {
                error!("No access token found, cannot connect");
                return Ok(ConnectDecision::MissingToken);
            }
        };

        let url = self.url_for(token)?;
        self.state = ConnectionState::Connecting;
        info!(user_id = %self.user_id, "Connecting to chat");
        Ok(ConnectDecision::Start(url))
    }

    /// The handshake succeeded
    ///
    /// Resets the backoff and the refresh guard, and returns the whole
    /// outbound queue in submission order for the caller to write.
    pub fn on_open(&mut self) -> Vec<Outbound> {
        if self.state != ConnectionState::Connecting {
            warn!(state = ?self.state, "Open reported while not connecting, ignoring");
            return Vec::new();
        }

        self.state = ConnectionState::Open;
        self.backoff.reset();
        self.token_refresh_attempted = false;

        let flushed: Vec<Outbound> = self.queue.drain(..).collect();
        info!(flushed = flushed.len(), "Chat connection open");
        flushed
    }

    /// Submit an outbound event
    pub fn send(&mut self, event: Outbound) -> SendOutcome {
        match self.state {
            ConnectionState::Open => SendOutcome::Transmit(event),
            ConnectionState::Closed(CloseKind::Intentional) => {
                warn!(kind = event.kind(), "Connection closed, dropping outbound event");
                SendOutcome::Dropped
            }
            _ => {
                debug!(kind = event.kind(), "Connection not open, queuing event");
                self.queue.push_back(event);
                SendOutcome::Queued
            }
        }
    }

    /// Put events that could not be written back at the head of the queue
    ///
    /// `events` must be in submission order; they end up ahead of anything
    /// queued after them.
    pub fn requeue_front(&mut self, events: Vec<Outbound>) {
        if self.state == ConnectionState::Closed(CloseKind::Intentional) {
            return;
        }
        for event in events.into_iter().rev() {
            self.queue.push_front(event);
        }
    }

    /// The transport closed (or failed to open) without being asked to
    pub fn on_close(&mut self, reason: CloseReason) -> CloseAction {
        if self.state == ConnectionState::Closed(CloseKind::Intentional) {
            return CloseAction::Stop;
        }

        match reason {
            CloseReason::Normal => {
                info!("Chat connection closed normally, not reconnecting");
                self.state = ConnectionState::Closed(CloseKind::Intentional);
                CloseAction::Stop
            }
            CloseReason::AuthRejected => {
                self.state = ConnectionState::Closed(CloseKind::Unintentional);
                if self.token_refresh_attempted || self.refresh_in_flight {
                    error!("Access token rejected again after refresh, giving up");
                    CloseAction::SessionExpired
                } else {
                    warn!("Access token rejected, attempting refresh");
                    self.token_refresh_attempted = true;
                    self.refresh_in_flight = true;
                    CloseAction::RefreshToken
                }
            }
            CloseReason::Abnormal(code) => {
                self.state = ConnectionState::Closed(CloseKind::Unintentional);
                let delay = self.backoff.next_delay();
                warn!(?code, delay_ms = delay.as_millis() as u64, "Chat connection lost, reconnecting");
                CloseAction::Reconnect(delay)
            }
        }
    }

    /// The token refresh started by [`CloseAction::RefreshToken`] finished
    pub fn on_refresh_result(&mut self, refreshed: bool) -> RefreshOutcome {
        self.refresh_in_flight = false;

        if self.state == ConnectionState::Closed(CloseKind::Intentional) {
            return RefreshOutcome::SessionExpired;
        }

        if refreshed {
            info!("Reconnecting after token refresh");
            RefreshOutcome::Reconnect
        } else {
            error!("Token refresh failed, cannot reconnect");
            RefreshOutcome::SessionExpired
        }
    }

    /// Close on the owner's request; terminal
    ///
    /// Returns whether a live transport needs to be closed. Queued events
    /// are discarded.
    pub fn close(&mut self) -> bool {
        let had_transport = matches!(
            self.state,
            ConnectionState::Open | ConnectionState::Connecting
        );

        if !self.queue.is_empty() {
            debug!(dropped = self.queue.len(), "Discarding queued events on close");
            self.queue.clear();
        }

        self.state = ConnectionState::Closed(CloseKind::Intentional);
        self.refresh_in_flight = false;
        info!("Chat connection closed intentionally, no reconnect");
        had_transport
    }
}
