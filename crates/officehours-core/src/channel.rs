//! Abstract duplex message channel the connection manager runs on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Close code for an intentional, clean shutdown.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when a connection ends without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Application close code for a subscribed resource that does not exist.
pub const CLOSE_NOT_FOUND: u16 = 4404;

/// Lifecycle of a single channel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Event emitted by a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The connection was established.
    Open,
    /// A text message arrived.
    Message(String),
    /// The connection closed. Always the last event of a channel.
    Close { code: u16, reason: String },
    /// Transport-level failure. A `Close` event follows.
    Error(String),
}

impl ChannelEvent {
    /// Close event without a reason.
    #[must_use]
    pub fn close(code: u16) -> Self {
        Self::Close {
            code,
            reason: String::new(),
        }
    }
}

/// Channel error.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel is not open")]
    NotOpen,
    #[error("Channel closed")]
    Closed,
}

/// One duplex channel instance.
///
/// Dropping a channel detaches its event stream: no event of a dropped
/// channel is ever observed again.
#[async_trait]
pub trait Channel: Send {
    /// Current ready state.
    fn ready_state(&self) -> ReadyState;

    /// Queue a text message for sending.
    ///
    /// # Errors
    /// Returns error if the channel is not open.
    fn send(&self, text: String) -> Result<(), ChannelError>;

    /// Start the closing handshake with `code`.
    fn close(&mut self, code: u16, reason: &str);

    /// Wait for the next event. `None` once the channel is exhausted.
    async fn next_event(&mut self) -> Option<ChannelEvent>;
}

/// Factory for channels, supplied by the host environment.
pub trait Connector: Send + Sync {
    type Channel: Channel + 'static;

    /// Begin connecting to `url`. The channel starts in `Connecting`;
    /// failures are reported through its events.
    fn open(&self, url: &str) -> Self::Channel;
}
