//! Socket driver
//!
//! [`ChatSocket`] runs a [`ConnectionManager`] over a real transport inside a
//! tokio task. The handle sends commands in; parsed server events and
//! lifecycle notifications come out of an unbounded channel.

use super::manager::ConnectionManager;
use super::transport::{Connector, Frame, Link};
use super::types::{CloseAction, CloseReason, ConnectDecision, RefreshOutcome, SendOutcome};
use crate::auth::{SessionManager, TokenRefresher};
use crate::config::ClientConfig;
use crate::protocol::{parse_frame, Id, Inbound, Outbound};
use crate::{Error, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use url::Url;

/// Events emitted by the socket task
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// Connected, and every queued event has been written
    Opened,
    /// A server event
    Inbound(Inbound),
    /// Connection lost; reconnecting after `delay`
    Reconnecting {
        /// Wait before the next attempt
        delay: Duration,
    },
    /// The access token was rejected and could not be refreshed
    SessionExpired(String),
    /// The task stopped; no more events follow
    Closed,
}

#[derive(Debug)]
enum Command {
    Send(Outbound),
    Connect,
    Close,
}

/// Handle to a running chat connection
///
/// Dropping the handle closes the connection.
#[derive(Debug)]
pub struct ChatSocket {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl ChatSocket {
    /// Start the connection task for `user_id`
    ///
    /// Fails with [`Error::MissingToken`] when the session has no access
    /// token, without starting anything.
    ///
    /// # Arguments
    /// * `config` - Endpoints and backoff bounds
    /// * `user_id` - Logged-in user, part of the socket URL
    /// * `sessions` - Source of the access token for every (re)connect
    /// * `connector` - Transport to open links with
    /// * `refresher` - Called once when the server rejects the token
    pub async fn spawn<C, R>(
        config: &ClientConfig,
        user_id: Id,
        sessions: SessionManager,
        connector: C,
        refresher: R,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SocketEvent>)>
    where
        C: Connector,
        R: TokenRefresher,
    {
        let mut manager = ConnectionManager::new(user_id, config);
        let token = sessions.access_token().await;

        let url = match manager.connect(token.as_deref())? {
            ConnectDecision::Start(url) => url,
            ConnectDecision::MissingToken => return Err(Error::MissingToken),
            other => {
                return Err(Error::Transport(format!(
                    "Unexpected connect decision for a fresh connection: {:?}",
                    other
                )))
            }
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            manager,
            sessions,
            connector,
            refresher,
            commands: command_rx,
            events: event_tx,
        };
        let task = tokio::spawn(driver.run(Phase::Connect(url)));

        Ok((
            Self {
                commands: command_tx,
                task,
            },
            event_rx,
        ))
    }

    /// Send an event, queuing it while the connection is down
    pub fn send(&self, event: Outbound) -> Result<()> {
        self.command(Command::Send(event))
    }

    /// Connect again if the connection is down; no-op otherwise
    pub fn connect(&self) -> Result<()> {
        self.command(Command::Connect)
    }

    /// Close for good; queued events are discarded
    pub fn close(&self) -> Result<()> {
        self.command(Command::Close)
    }

    /// Whether the task has stopped
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to stop
    pub async fn closed(self) {
        if let Err(e) = self.task.await {
            error!("Chat socket task failed: {}", e);
        }
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::Transport("Chat socket task has stopped".to_string()))
    }
}

enum Phase<L> {
    Connect(Url),
    Open(L),
    Backoff(Duration),
    Refresh,
    Idle,
    Done,
}

enum Step<T> {
    Ready(T),
    Command(Option<Command>),
}

struct Driver<C, R> {
    manager: ConnectionManager,
    sessions: SessionManager,
    connector: C,
    refresher: R,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SocketEvent>,
}

impl<C: Connector, R: TokenRefresher> Driver<C, R> {
    async fn run(mut self, mut phase: Phase<C::Link>) {
        loop {
            phase = match phase {
                Phase::Connect(url) => self.connecting(url).await,
                Phase::Open(link) => self.open(link).await,
                Phase::Backoff(delay) => self.backing_off(delay).await,
                Phase::Refresh => self.refreshing().await,
                Phase::Idle => self.idle().await,
                Phase::Done => break,
            };
        }

        debug!("Chat socket task stopped");
        self.emit(SocketEvent::Closed);
    }

    async fn connecting(&mut self, url: Url) -> Phase<C::Link> {
        let result = {
            let connect = self.connector.connect(&url);
            tokio::pin!(connect);

            loop {
                let step = tokio::select! {
                    result = &mut connect => Step::Ready(result),
                    command = self.commands.recv() => Step::Command(command),
                };

                match step {
                    Step::Ready(result) => break Some(result),
                    Step::Command(Some(Command::Send(event))) => {
                        Self::submit(&mut self.manager, event);
                    }
                    Step::Command(Some(Command::Connect)) => {
                        debug!("Connect requested while connecting, ignoring");
                    }
                    Step::Command(Some(Command::Close)) | Step::Command(None) => break None,
                }
            }
        };

        match result {
            Some(Ok(link)) => self.opened(link).await,
            Some(Err(reason)) => self.closed(reason),
            None => {
                self.manager.close();
                Phase::Done
            }
        }
    }

    async fn opened(&mut self, mut link: C::Link) -> Phase<C::Link> {
        let mut pending = self.manager.on_open().into_iter();

        while let Some(event) = pending.next() {
            if let Err(reason) = Self::write(&mut link, &event).await {
                let mut unsent = vec![event];
                unsent.extend(pending);
                warn!(unsent = unsent.len(), "Connection lost while flushing queue");
                self.manager.requeue_front(unsent);
                return self.closed(reason);
            }
        }

        self.emit(SocketEvent::Opened);
        Phase::Open(link)
    }

    async fn open(&mut self, mut link: C::Link) -> Phase<C::Link> {
        loop {
            let step = tokio::select! {
                frame = link.recv() => Step::Ready(frame),
                command = self.commands.recv() => Step::Command(command),
            };

            match step {
                Step::Ready(Frame::Text(text)) => self.dispatch(&text),
                Step::Ready(Frame::Closed(reason)) => return self.closed(reason),
                Step::Command(Some(Command::Send(event))) => {
                    if let SendOutcome::Transmit(event) = self.manager.send(event) {
                        if let Err(reason) = Self::write(&mut link, &event).await {
                            self.manager.requeue_front(vec![event]);
                            return self.closed(reason);
                        }
                    }
                }
                Step::Command(Some(Command::Connect)) => {
                    debug!("Connect requested while open, ignoring");
                }
                Step::Command(Some(Command::Close)) | Step::Command(None) => {
                    if self.manager.close() {
                        link.close().await;
                    }
                    return Phase::Done;
                }
            }
        }
    }

    async fn backing_off(&mut self, delay: Duration) -> Phase<C::Link> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            let step = tokio::select! {
                _ = &mut sleep => Step::Ready(()),
                command = self.commands.recv() => Step::Command(command),
            };

            match step {
                Step::Ready(()) => return self.reconnect(None).await,
                Step::Command(Some(Command::Send(event))) => {
                    Self::submit(&mut self.manager, event);
                }
                Step::Command(Some(Command::Connect)) => {
                    debug!("Connect requested during backoff, reconnecting now");
                    return self.reconnect(None).await;
                }
                Step::Command(Some(Command::Close)) | Step::Command(None) => {
                    self.manager.close();
                    return Phase::Done;
                }
            }
        }
    }

    async fn refreshing(&mut self) -> Phase<C::Link> {
        let result = {
            let refresh = self.refresher.refresh();
            tokio::pin!(refresh);

            loop {
                let step = tokio::select! {
                    result = &mut refresh => Step::Ready(result),
                    command = self.commands.recv() => Step::Command(command),
                };

                match step {
                    Step::Ready(result) => break Some(result),
                    Step::Command(Some(Command::Send(event))) => {
                        Self::submit(&mut self.manager, event);
                    }
                    Step::Command(Some(Command::Connect)) => {
                        debug!("Connect requested during token refresh, deferring");
                    }
                    Step::Command(Some(Command::Close)) | Step::Command(None) => break None,
                }
            }
        };

        let token = match result {
            Some(Ok(token)) => token,
            Some(Err(e)) => {
                warn!("Token refresh failed: {}", e);
                self.manager.on_refresh_result(false);
                return self.expire(format!("Token refresh failed: {}", e));
            }
            None => {
                self.manager.close();
                return Phase::Done;
            }
        };

        match self.manager.on_refresh_result(true) {
            RefreshOutcome::Reconnect => self.reconnect(Some(token)).await,
            RefreshOutcome::SessionExpired => Phase::Done,
        }
    }

    async fn idle(&mut self) -> Phase<C::Link> {
        loop {
            match self.commands.recv().await {
                Some(Command::Send(event)) => Self::submit(&mut self.manager, event),
                Some(Command::Connect) => return self.reconnect(None).await,
                Some(Command::Close) | None => {
                    self.manager.close();
                    return Phase::Done;
                }
            }
        }
    }

    /// Connect with `token`, or with the stored access token
    async fn reconnect(&mut self, token: Option<String>) -> Phase<C::Link> {
        let token = match token {
            Some(token) => Some(token),
            None => self.sessions.access_token().await,
        };

        match self.manager.connect(token.as_deref()) {
            Ok(ConnectDecision::Start(url)) => Phase::Connect(url),
            Ok(ConnectDecision::Terminated) => Phase::Done,
            Ok(decision) => {
                debug!(?decision, "Not reconnecting");
                Phase::Idle
            }
            Err(e) => {
                error!("Failed to build chat URL: {}", e);
                Phase::Idle
            }
        }
    }

    fn closed(&mut self, reason: CloseReason) -> Phase<C::Link> {
        match self.manager.on_close(reason) {
            CloseAction::Reconnect(delay) => {
                self.emit(SocketEvent::Reconnecting { delay });
                Phase::Backoff(delay)
            }
            CloseAction::RefreshToken => Phase::Refresh,
            CloseAction::SessionExpired => {
                self.expire("Access token rejected after refresh".to_string())
            }
            CloseAction::Stop => Phase::Done,
        }
    }

    fn expire(&mut self, reason: String) -> Phase<C::Link> {
        error!("Chat session expired: {}", reason);
        self.emit(SocketEvent::SessionExpired(reason));
        Phase::Idle
    }

    fn dispatch(&self, text: &str) {
        match parse_frame(text) {
            Ok(Some(event)) => {
                debug!(kind = event.kind(), "Received chat event");
                self.emit(SocketEvent::Inbound(event));
            }
            Ok(None) => debug!("Ignoring unknown chat event type"),
            Err(e) => warn!("Dropping malformed frame: {}", e),
        }
    }

    fn submit(manager: &mut ConnectionManager, event: Outbound) {
        if let SendOutcome::Transmit(event) = manager.send(event) {
            // Only reachable while open, which is handled by `open`
            manager.requeue_front(vec![event]);
        }
    }

    async fn write(link: &mut C::Link, event: &Outbound) -> std::result::Result<(), CloseReason> {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!(kind = event.kind(), "Failed to encode outbound event: {}", e);
                return Ok(());
            }
        };
        link.send_text(frame).await?;
        debug!(kind = event.kind(), "Sent chat event");
        Ok(())
    }

    fn emit(&self, event: SocketEvent) {
        if self.events.send(event).is_err() {
            debug!("Socket event receiver dropped");
        }
    }
}
