//! Tutorchat - real-time messaging client for the tutoring marketplace
//!
//! This library provides the client side of the marketplace chat: a
//! reconnecting websocket connection with outbound queuing, the typed
//! `chat.*` event protocol, an in-memory conversation store, and the
//! contact/job unlock flow that gates new conversations.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod connection;
pub mod controller;
pub mod gating;
pub mod protocol;
pub mod session;
pub mod store;

#[cfg(test)]
mod tests;

/// Result type alias for Tutorchat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Tutorchat operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or unreadable configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Local session/config file error
    #[error("Storage error: {0}")]
    Storage(String),

    /// No access token is available to open the chat connection
    #[error("No access token available, cannot connect")]
    MissingToken,

    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Authentication expired and could not be refreshed
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Malformed protocol frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Backend API returned an error response
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Message extracted from the response body
        message: String,
    },

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

/// Initialize logging for the Tutorchat library
///
/// Honors `RUST_LOG`, defaulting to `info`.
pub fn init() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
