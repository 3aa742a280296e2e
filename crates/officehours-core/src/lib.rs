//! Core model and change tracking for live office-hours clients.
//!
//! This crate provides the building blocks that do not depend on a transport:
//! - `model` - Queue, meeting and user entities
//! - `changes` - Narrated diff between two snapshots
//! - `ChangeLog` - Dismissable list of narrated changes
//! - `SnapshotStore` - Last-known snapshot of a subscribed resource
//! - `Channel` / `Connector` - Capability the connection manager runs on

pub mod change_log;
pub mod changes;
pub mod channel;
pub mod model;
pub mod snapshot_store;

pub use change_log::{ChangeEvent, ChangeLog};
pub use changes::compare_entities;
pub use channel::{Channel, ChannelError, ChannelEvent, Connector, ReadyState};
pub use model::{
    ComparableEntity, EntityKind, EntityRef, Meeting, MeetingStatus, MyMeeting, MyUser,
    QueueAttendee, QueueBase, QueueHost, QueuePayload, QueueStatus, User,
};
pub use snapshot_store::SnapshotStore;
