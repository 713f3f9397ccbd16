//! Websocket transport seam
//!
//! The socket driver only needs to open a link, write text frames, read
//! frames and close. [`Connector`] and [`Link`] capture exactly that, so the
//! driver can run over tokio-tungstenite in production and over in-memory
//! channels in tests.

use super::types::CloseReason;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

/// One frame read from a link
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A text frame
    Text(String),
    /// The link is gone
    Closed(CloseReason),
}

/// An open, bidirectional text link
pub trait Link: Send + 'static {
    /// Write one text frame
    ///
    /// On failure the link is dead and the returned reason says why.
    fn send_text(
        &mut self,
        text: String,
    ) -> impl Future<Output = std::result::Result<(), CloseReason>> + Send;

    /// Wait for the next frame
    fn recv(&mut self) -> impl Future<Output = Frame> + Send;

    /// Close with a normal closure
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens links
pub trait Connector: Send + Sync + 'static {
    /// Link type produced
    type Link: Link;

    /// Open a link to `url`
    fn connect(
        &self,
        url: &Url,
    ) -> impl Future<Output = std::result::Result<Self::Link, CloseReason>> + Send;
}

/// Connector over tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Link = WsLink;

    async fn connect(&self, url: &Url) -> std::result::Result<WsLink, CloseReason> {
        match connect_async(url.as_str()).await {
            Ok((stream, _response)) => Ok(WsLink { stream }),
            Err(WsError::Http(response)) => {
                let status = response.status().as_u16();
                warn!(status, "Websocket handshake refused");
                Err(CloseReason::from_handshake_status(status))
            }
            Err(e) => {
                warn!("Websocket connection failed: {}", e);
                Err(CloseReason::Abnormal(None))
            }
        }
    }
}

/// Websocket link over tokio-tungstenite
pub struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl std::fmt::Debug for WsLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsLink").finish_non_exhaustive()
    }
}

impl Link for WsLink {
    async fn send_text(&mut self, text: String) -> std::result::Result<(), CloseReason> {
        self.stream.send(Message::Text(text)).await.map_err(|e| {
            warn!("Websocket write failed: {}", e);
            CloseReason::Abnormal(None)
        })
    }

    async fn recv(&mut self) -> Frame {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Frame::Text(text),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => return Frame::Text(text),
                    Err(_) => {
                        warn!("Dropping non UTF-8 binary frame");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = match frame {
                        Some(frame) => CloseReason::from_code(u16::from(frame.code)),
                        None => CloseReason::Abnormal(None),
                    };
                    debug!(?reason, "Server closed the websocket");
                    return Frame::Closed(reason);
                }
                // Pings are answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Websocket read failed: {}", e);
                    return Frame::Closed(CloseReason::Abnormal(None));
                }
                None => return Frame::Closed(CloseReason::Abnormal(None)),
            }
        }
    }

    async fn close(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "Normal Closure".into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!("Websocket close failed: {}", e);
        }
    }
}
