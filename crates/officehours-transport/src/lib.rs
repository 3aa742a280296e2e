//! Live connection layer for office-hours clients.
//!
//! Provides:
//! - Wire protocol (`{"type", "content"}` envelopes)
//! - `MessageRouter` - Envelope dispatch to update/delete handlers
//! - `ConnectionManager` - One live channel, closure classification, reconnects
//! - `Subscription` - Snapshot store and change log wiring for a resource
//! - WebSocket channel (feature: websocket)

pub mod connection;
pub mod error;
pub mod protocol;
pub mod router;
pub mod subscription;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(test)]
mod testing;

pub use connection::{
    Closure, ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionState,
    ReconnectPolicy, Visibility, open,
};
pub use error::{ConnectionError, ErrorSignal};
pub use protocol::{Envelope, EnvelopeKind};
pub use router::{MessageRouter, RouteError};
pub use subscription::{Resource, Subscription};

#[cfg(feature = "websocket")]
pub use websocket::{WsChannel, WsConnector};
