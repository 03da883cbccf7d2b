use std::sync::Arc;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the delivery API.
///
/// Content operations never return these to the caller directly. They show up as default content
/// for location requests, or as the `Err` handed to prefetch and raw request callbacks.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Client code is not configured, so no request can be addressed.
    #[error("missing client code")]
    NoClientCode,

    /// Privacy status is not opted in.
    #[error("privacy status is opted out")]
    OptedOut,

    /// Nothing to send: no mbox requests and no pending notifications.
    #[error("empty or null request list")]
    EmptyRequest,

    /// Invalid server or client code, producing an unusable delivery URL.
    #[error("invalid delivery url")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// No response arrived within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// Server answered with a non-success status and no error message.
    #[error("unexpected response status: {0}")]
    HttpStatus(u16),

    /// Request body could not be serialized.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Server returned an error message. Displays as the raw message.
    #[error("{0}")]
    Server(String),

    /// Prefetch response did not contain any prefetched mbox.
    #[error("no prefetch mbox content in response")]
    NoPrefetchMboxes,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// The worker thread has stopped and can no longer process commands.
    #[error("worker thread stopped")]
    WorkerStopped,

    /// Indicates that the worker thread panicked. This should normally never happen.
    #[error("worker thread panicked")]
    WorkerPanicked,
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            return Error::Timeout;
        }
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::InvalidResponse(value.to_string())
    }
}
