//! Errors surfaced by a live connection.

use std::sync::Arc;

use officehours_core::channel::{CLOSE_ABNORMAL, CLOSE_NOT_FOUND};
use thiserror::Error;
use tokio::sync::watch;

/// User-facing message for a close code, if one is defined.
#[must_use]
pub const fn close_code_message(code: u16) -> Option<&'static str> {
    match code {
        CLOSE_ABNORMAL => Some("An unexpected error occurred. Please refresh the page."),
        CLOSE_NOT_FOUND => {
            Some("The resource you're looking for could not be found. Maybe it was deleted?")
        }
        _ => None,
    }
}

/// Error surfaced to the UI layer, or returned by a failed connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The server closed the connection with a code that is not retried.
    #[error("{message}")]
    Closed { code: u16, message: String },
    /// The transport reported an error.
    #[error("{0}")]
    Transport(String),
    /// The subscribed resource was deleted on the server.
    #[error("{0}")]
    ResourceDeleted(String),
    /// A host-only subscription received the attendee view of a queue.
    #[error(
        "You are not a host of this queue. If you believe you are seeing this message in error, contact the queue host(s)."
    )]
    NotHost,
    /// A `deleted` message arrived but no delete handler was registered.
    #[error("Unexpected message type 'deleted'")]
    UnexpectedDeleted,
    /// The connection task stopped abnormally.
    #[error("Connection task failed: {0}")]
    Task(String),
}

impl ConnectionError {
    /// Error for a close code, using the close-code table when it has an entry.
    #[must_use]
    pub fn from_close_code(code: u16) -> Self {
        let message = close_code_message(code).map_or_else(|| code.to_string(), str::to_string);
        Self::Closed { code, message }
    }
}

/// Shared slot holding the connection's current error.
///
/// The connection manager and delete handlers write it; the UI layer watches
/// it through [`ErrorSignal::subscribe`].
#[derive(Clone)]
pub struct ErrorSignal {
    sender: Arc<watch::Sender<Option<ConnectionError>>>,
}

impl Default for ErrorSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorSignal {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Replace the current error.
    pub fn set(&self, error: ConnectionError) {
        tracing::warn!(%error, "connection error surfaced");
        self.sender.send_replace(Some(error));
    }

    /// Clear the current error, if any.
    pub fn clear(&self) {
        self.sender.send_if_modified(|current| current.take().is_some());
    }

    /// Clear the current error if it is `error`.
    pub fn clear_if(&self, error: &ConnectionError) {
        self.sender.send_if_modified(|current| {
            if current.as_ref() == Some(error) {
                *current = None;
                return true;
            }
            false
        });
    }

    #[must_use]
    pub fn current(&self) -> Option<ConnectionError> {
        self.sender.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<ConnectionError>> {
        self.sender.subscribe()
    }
}
