//! Messaging session
//!
//! [`MessagingSession`] is the one event loop behind the chat view. It owns
//! the controller and the socket handle, and reacts to socket events, user
//! actions, finished unlock calls and typing timers strictly one at a time.

use crate::auth::{AuthClient, SessionManager};
use crate::config::ClientConfig;
use crate::connection::{ChatSocket, SocketEvent, WsConnector};
use crate::controller::{MessagingController, Notice};
use crate::gating::{ContactInfo, ContactUnlocker, UnlockApi, UnlockError};
use crate::protocol::Id;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Something the user did in the chat view
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    /// Open a conversation from the list
    SelectConversation(Id),
    /// Send text in the open conversation
    SendMessage(String),
    /// Start a conversation with a user
    StartConversation(Id),
    /// Search users by keyword
    Search(String),
    /// A keystroke in the composer
    Typing,
    /// Back to the conversation list
    BackToList,
    /// Confirm the contact unlock prompt
    UnlockContact,
    /// Unlock this job for the job prompt
    UnlockJob(Id),
    /// Ask whether a user's contact is already unlocked
    CheckUnlock(Id),
    /// Close the unlock prompt
    DismissGate,
    /// Leave the chat view
    Quit,
}

#[derive(Debug)]
enum UnlockOutcome {
    Contact(std::result::Result<ContactInfo, UnlockError>),
    Job(std::result::Result<(), UnlockError>),
    Status(Id, std::result::Result<bool, UnlockError>),
}

enum Wake {
    Socket(Option<SocketEvent>),
    Action(Option<UserAction>),
    Unlock(Option<UnlockOutcome>),
    Timer,
}

/// A running chat view
pub struct MessagingSession<U> {
    controller: MessagingController,
    socket: ChatSocket,
    events: mpsc::UnboundedReceiver<SocketEvent>,
    unlocker: Arc<U>,
    unlock_tx: mpsc::UnboundedSender<UnlockOutcome>,
    unlock_rx: mpsc::UnboundedReceiver<UnlockOutcome>,
}

impl MessagingSession<UnlockApi> {
    /// Connect the logged-in user over a real websocket
    ///
    /// # Arguments
    /// * `config` - Validated client configuration
    /// * `sessions` - Session holding the user and access token
    /// * `deep_link` - Username to open a conversation with once found
    pub async fn connect(
        config: &ClientConfig,
        sessions: SessionManager,
        deep_link: Option<String>,
    ) -> Result<Self> {
        let user = sessions
            .user()
            .await
            .ok_or_else(|| Error::SessionExpired("Not logged in".to_string()))?;

        let auth = AuthClient::new(&config.api_base_url, sessions.clone())?;
        let unlocker = UnlockApi::new(&config.api_base_url, sessions.clone(), auth.clone())?;
        let (socket, events) =
            ChatSocket::spawn(config, user.user_id.clone(), sessions, WsConnector, auth).await?;
        let controller = MessagingController::for_user(&user, config, deep_link);

        Ok(Self::new(controller, socket, events, unlocker))
    }
}

impl<U: ContactUnlocker> MessagingSession<U> {
    /// Assemble a session from its parts
    pub fn new(
        controller: MessagingController,
        socket: ChatSocket,
        events: mpsc::UnboundedReceiver<SocketEvent>,
        unlocker: U,
    ) -> Self {
        let (unlock_tx, unlock_rx) = mpsc::unbounded_channel();
        Self {
            controller,
            socket,
            events,
            unlocker: Arc::new(unlocker),
            unlock_tx,
            unlock_rx,
        }
    }

    /// Current controller state
    pub fn controller(&self) -> &MessagingController {
        &self.controller
    }

    /// Run until the user quits or the socket stops
    ///
    /// `render` is called after every change with the controller and the
    /// notices raised by it. Returns the controller in its final state.
    pub async fn run<F>(
        mut self,
        mut actions: mpsc::UnboundedReceiver<UserAction>,
        mut render: F,
    ) -> MessagingController
    where
        F: FnMut(&MessagingController, Vec<Notice>),
    {
        loop {
            let deadline = self.controller.next_deadline();
            let timer = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let wake = tokio::select! {
                event = self.events.recv() => Wake::Socket(event),
                action = actions.recv() => Wake::Action(action),
                outcome = self.unlock_rx.recv() => Wake::Unlock(outcome),
                _ = timer => Wake::Timer,
            };

            let keep_running = match wake {
                Wake::Socket(Some(event)) => self.on_socket_event(event),
                Wake::Socket(None) => false,
                Wake::Action(Some(UserAction::Quit)) | Wake::Action(None) => {
                    self.shutdown();
                    break;
                }
                Wake::Action(Some(action)) => {
                    self.on_action(action);
                    true
                }
                Wake::Unlock(Some(outcome)) => {
                    self.on_unlock_outcome(outcome);
                    true
                }
                Wake::Unlock(None) => true,
                Wake::Timer => {
                    self.controller.tick(Instant::now());
                    true
                }
            };

            self.flush();
            let notices = self.controller.take_notices();
            render(&self.controller, notices);

            if !keep_running {
                break;
            }
        }

        self.socket.closed().await;
        info!("Messaging session ended");
        self.controller
    }

    fn on_socket_event(&mut self, event: SocketEvent) -> bool {
        match event {
            SocketEvent::Opened => self.controller.on_open(),
            SocketEvent::Inbound(event) => self.controller.handle(event, Instant::now()),
            SocketEvent::Reconnecting { delay } => self.controller.on_reconnecting(delay),
            SocketEvent::SessionExpired(reason) => self.controller.on_session_expired(reason),
            SocketEvent::Closed => {
                debug!("Socket closed");
                return false;
            }
        }
        true
    }

    fn on_action(&mut self, action: UserAction) {
        match action {
            UserAction::SelectConversation(id) => {
                self.controller.select_conversation(&id);
            }
            UserAction::SendMessage(text) => {
                self.controller.send_message(&text);
            }
            UserAction::StartConversation(id) => self.controller.start_conversation(id),
            UserAction::Search(keyword) => self.controller.search(&keyword),
            UserAction::Typing => self.controller.local_typing(Instant::now()),
            UserAction::BackToList => self.controller.back_to_list(),
            UserAction::UnlockContact => {
                if let Some(tutor_id) = self.controller.begin_contact_unlock() {
                    let unlocker = Arc::clone(&self.unlocker);
                    let tx = self.unlock_tx.clone();
                    tokio::spawn(async move {
                        let result = unlocker.unlock_contact(&tutor_id).await;
                        let _ = tx.send(UnlockOutcome::Contact(result));
                    });
                }
            }
            UserAction::UnlockJob(job_id) => {
                if let Some(job_id) = self.controller.begin_job_unlock(job_id) {
                    let unlocker = Arc::clone(&self.unlocker);
                    let tx = self.unlock_tx.clone();
                    tokio::spawn(async move {
                        let result = unlocker.unlock_job(&job_id).await;
                        let _ = tx.send(UnlockOutcome::Job(result));
                    });
                }
            }
            UserAction::CheckUnlock(target) => {
                let unlocker = Arc::clone(&self.unlocker);
                let tx = self.unlock_tx.clone();
                tokio::spawn(async move {
                    let result = unlocker.unlock_status(&target).await;
                    let _ = tx.send(UnlockOutcome::Status(target, result));
                });
            }
            UserAction::DismissGate => self.controller.dismiss_gate(),
            UserAction::Quit => self.shutdown(),
        }
    }

    fn on_unlock_outcome(&mut self, outcome: UnlockOutcome) {
        match outcome {
            UnlockOutcome::Contact(result) => self.controller.contact_unlock_finished(result),
            UnlockOutcome::Job(result) => self.controller.job_unlock_finished(result),
            UnlockOutcome::Status(target, result) => {
                self.controller.unlock_status_finished(target, result)
            }
        }
    }

    fn flush(&mut self) {
        for event in self.controller.take_outbound() {
            if let Err(e) = self.socket.send(event) {
                warn!("Dropping outbound events: {}", e);
                return;
            }
        }
    }

    fn shutdown(&mut self) {
        self.controller.shutdown();
        self.flush();
        if let Err(e) = self.socket.close() {
            debug!("Socket already stopped: {}", e);
        }
    }
}
