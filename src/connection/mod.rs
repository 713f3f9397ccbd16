//! Connection module
//!
//! Owns the one persistent websocket per logged-in user:
//! - `manager` - transport-free state machine (states, send queue, close handling)
//! - `backoff` - exponential reconnect delay
//! - `transport` - the websocket seam and its tokio-tungstenite implementation
//! - `socket` - the tokio task driving a manager over a transport
//! - `types` - shared enums

pub mod backoff;
pub mod manager;
pub mod socket;
pub mod transport;
pub mod types;

pub use backoff::Backoff;
pub use manager::ConnectionManager;
pub use socket::{ChatSocket, SocketEvent};
pub use transport::{Connector, Frame, Link, WsConnector, WsLink};
pub use types::{
    CloseAction, CloseKind, CloseReason, ConnectDecision, ConnectionState, RefreshOutcome,
    SendOutcome,
};
