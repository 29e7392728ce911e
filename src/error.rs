//! Error taxonomy shared by the overlay, live channel, and session layers.
//!
//! None of these are fatal: every variant leaves the caller in a state from
//! which the operator can keep working.

use thiserror::Error;

/// Errors surfaced by `linecount`.
#[derive(Error, Debug)]
pub enum CountError {
    /// Intrinsic or display dimensions are not known yet.
    #[error("video geometry not ready")]
    GeometryNotReady,

    /// A live-channel payload could not be decoded.
    #[error("malformed live event: {0}")]
    MalformedEvent(String),

    /// The live transport went away; a reconnect is scheduled.
    #[error("live transport closed")]
    TransportClosed,

    /// The processing or upload endpoint refused the request.
    #[error("request rejected ({status}): {message}")]
    SubmissionRejected { status: u16, message: String },

    /// A local choice was refused before any network call.
    #[error("invalid selection: {0}")]
    InvalidLocalSelection(String),

    /// The session controller was driven out of order.
    #[error("invalid session state: {0}")]
    InvalidState(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("config error: {0}")]
    Config(String),

    #[error("ffprobe error: {0}")]
    Probe(String),
}

pub type Result<T> = std::result::Result<T, CountError>;

impl CountError {
    /// Build a rejection from an HTTP status and response body.
    pub fn rejected(status: reqwest::StatusCode, message: impl Into<String>) -> Self {
        Self::SubmissionRejected {
            status: status.as_u16(),
            message: message.into(),
        }
    }

    /// `true` for errors that should be shown to the operator verbatim.
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::SubmissionRejected { .. } | Self::InvalidLocalSelection(_)
        )
    }
}
