// Test doubles: an in-memory websocket, a scripted token refresher and unlocker

use crate::auth::{SessionManager, SessionUser, StoredSession, TokenRefresher};
use crate::config::ClientConfig;
use crate::connection::{CloseReason, Connector, Frame, Link};
use crate::gating::{ContactInfo, ContactUnlocker, UnlockError};
use crate::protocol::{ChatMessage, ConversationSummary, Id, UserSummary};
use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use url::Url;

pub const VIEWER_ID: i64 = 7;

pub fn test_config() -> ClientConfig {
    ClientConfig {
        ws_protocol: "ws".to_string(),
        ws_host: "chat.test".to_string(),
        api_base_url: "http://chat.test".to_string(),
        ..ClientConfig::default()
    }
}

pub fn viewer() -> UserSummary {
    UserSummary::new(VIEWER_ID, "viewer")
}

pub fn sessions_with_token(token: &str, user_type: &str) -> SessionManager {
    SessionManager::in_memory(Some(StoredSession {
        user: SessionUser {
            user_id: Id::from(VIEWER_ID),
            username: "viewer".to_string(),
            user_type: user_type.to_string(),
        },
        access: token.to_string(),
        refresh: Some("refresh-token".to_string()),
    }))
}

pub fn chat_message(id: i64, conversation_id: i64, sender: UserSummary, content: &str) -> ChatMessage {
    ChatMessage {
        id: Id::from(id),
        conversation_id: Id::from(conversation_id),
        sender,
        content: content.to_string(),
        timestamp: None,
        status: None,
        is_read: false,
        is_system: false,
        attachment: None,
        client_id: None,
    }
}

pub fn conversation_with(id: i64, partner: UserSummary) -> ConversationSummary {
    ConversationSummary {
        id: Id::from(id),
        participants: vec![viewer(), partner],
        last_message: None,
        has_unread: false,
    }
}

/// Server side of one accepted fake link
pub struct ServerLink {
    pub url: Url,
    pub to_client: mpsc::UnboundedSender<Frame>,
    pub from_client: mpsc::UnboundedReceiver<String>,
    closed_by_client: Arc<AtomicBool>,
}

impl ServerLink {
    pub fn send_json(&self, value: serde_json::Value) {
        self.to_client
            .send(Frame::Text(value.to_string()))
            .expect("Client link dropped");
    }

    pub fn close(&self, reason: CloseReason) {
        self.to_client
            .send(Frame::Closed(reason))
            .expect("Client link dropped");
    }

    pub async fn next_json(&mut self) -> serde_json::Value {
        let text = self.from_client.recv().await.expect("Client stopped sending");
        serde_json::from_str(&text).expect("Client sent invalid JSON")
    }

    pub fn closed_by_client(&self) -> bool {
        self.closed_by_client.load(Ordering::SeqCst)
    }
}

pub struct FakeLink {
    incoming: mpsc::UnboundedReceiver<Frame>,
    outgoing: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

impl Link for FakeLink {
    async fn send_text(&mut self, text: String) -> std::result::Result<(), CloseReason> {
        self.outgoing
            .send(text)
            .map_err(|_| CloseReason::Abnormal(None))
    }

    async fn recv(&mut self) -> Frame {
        self.incoming
            .recv()
            .await
            .unwrap_or(Frame::Closed(CloseReason::Abnormal(None)))
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector whose attempts succeed unless scripted to fail
pub struct FakeConnector {
    plan: Arc<Mutex<VecDeque<std::result::Result<(), CloseReason>>>>,
    attempts: Arc<AtomicUsize>,
    accepted: mpsc::UnboundedSender<ServerLink>,
}

/// Test-side handle of a [`FakeConnector`]
pub struct FakeServer {
    plan: Arc<Mutex<VecDeque<std::result::Result<(), CloseReason>>>>,
    attempts: Arc<AtomicUsize>,
    pub accepted: mpsc::UnboundedReceiver<ServerLink>,
}

impl FakeServer {
    /// Script the outcome of upcoming connection attempts
    pub fn plan(&self, outcomes: impl IntoIterator<Item = std::result::Result<(), CloseReason>>) {
        self.plan.lock().expect("Plan lock poisoned").extend(outcomes);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn accept(&mut self) -> ServerLink {
        self.accepted.recv().await.expect("Connector dropped")
    }
}

pub fn fake_transport() -> (FakeConnector, FakeServer) {
    let plan = Arc::new(Mutex::new(VecDeque::new()));
    let attempts = Arc::new(AtomicUsize::new(0));
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();

    (
        FakeConnector {
            plan: plan.clone(),
            attempts: attempts.clone(),
            accepted: accepted_tx,
        },
        FakeServer {
            plan,
            attempts,
            accepted: accepted_rx,
        },
    )
}

impl Connector for FakeConnector {
    type Link = FakeLink;

    async fn connect(&self, url: &Url) -> std::result::Result<FakeLink, CloseReason> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .plan
            .lock()
            .expect("Plan lock poisoned")
            .pop_front()
            .unwrap_or(Ok(()));
        outcome?;

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let _ = self.accepted.send(ServerLink {
            url: url.clone(),
            to_client,
            from_client,
            closed_by_client: closed.clone(),
        });

        Ok(FakeLink {
            incoming,
            outgoing,
            closed,
        })
    }
}

/// Refresher returning scripted results
#[derive(Clone)]
pub struct FakeRefresher {
    results: Arc<Mutex<VecDeque<Result<String>>>>,
    calls: Arc<AtomicUsize>,
}

impl FakeRefresher {
    pub fn new(results: Vec<Result<String>>) -> Self {
        Self {
            results: Arc::new(Mutex::new(results.into())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TokenRefresher for FakeRefresher {
    async fn refresh(&self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .expect("Results lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(Error::SessionExpired("No refresh scripted".to_string())))
    }
}

/// Unlocker returning fixed results
pub struct FakeUnlocker {
    pub contact: std::result::Result<ContactInfo, UnlockError>,
    pub job: std::result::Result<(), UnlockError>,
    pub status: std::result::Result<bool, UnlockError>,
}

impl ContactUnlocker for FakeUnlocker {
    async fn unlock_contact(&self, _tutor_id: &Id) -> std::result::Result<ContactInfo, UnlockError> {
        self.contact.clone()
    }

    async fn unlock_job(&self, _job_id: &Id) -> std::result::Result<(), UnlockError> {
        self.job.clone()
    }

    async fn unlock_status(&self, _target_id: &Id) -> std::result::Result<bool, UnlockError> {
        self.status.clone()
    }
}

/// One request seen by a [`FakeApi`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request_line: String,
    pub authorization: Option<String>,
}

/// Minimal HTTP/1.1 responder answering each connection with the next scripted response
pub struct FakeApi {
    pub base_url: String,
    pub requests: mpsc::UnboundedReceiver<RecordedRequest>,
}

impl FakeApi {
    pub async fn start(responses: Vec<(u16, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake API");
        let addr = listener.local_addr().expect("No local address");
        let (request_tx, requests) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let Ok(head) = read_request_head(&mut stream).await else {
                    continue;
                };

                let request_line = head.lines().next().unwrap_or_default().to_string();
                let authorization = head.lines().find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.trim()
                        .eq_ignore_ascii_case("authorization")
                        .then(|| value.trim().to_string())
                });
                let _ = request_tx.send(RecordedRequest {
                    request_line,
                    authorization,
                });

                let response = format!(
                    "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self {
            base_url: format!("http://{}", addr),
            requests,
        }
    }

    pub async fn next_request(&mut self) -> RecordedRequest {
        self.requests.recv().await.expect("Fake API stopped")
    }
}

/// Read headers and the declared body, returning the header block
async fn read_request_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(String::from_utf8_lossy(&buf).to_string());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    while buf.len() < header_end + 4 + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(head)
}
