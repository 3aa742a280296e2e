//! Dismissable log of narrated changes.

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{changes::compare_entities, model::ComparableEntity};

/// Events a slow subscriber may fall behind by before it starts missing some.
const BROADCAST_CAPACITY: usize = 256;

/// One narrated change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Position in this log's creation order. Never reused.
    pub id: u64,
    pub text: String,
}

#[derive(Default)]
struct Inner {
    events: Vec<ChangeEvent>,
    next_id: u64,
}

/// Append-only list of change events that the user can dismiss one by one.
///
/// Ids start at 0 and keep increasing for the lifetime of the log, also
/// across dismissals. Identical descriptions are not deduplicated.
pub struct ChangeLog {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            sender,
        }
    }

    /// Compare two snapshots and append the resulting description, if any.
    pub fn record<E: ComparableEntity>(&self, old: &[E], new: &[E]) -> Option<ChangeEvent> {
        let text = compare_entities(old, new)?;
        Some(self.push(text))
    }

    /// Append a description with the next unused id.
    pub fn push(&self, text: impl Into<String>) -> ChangeEvent {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let event = ChangeEvent {
            id: inner.next_id,
            text: text.into(),
        };
        inner.next_id += 1;
        inner.events.push(event.clone());
        drop(inner);

        tracing::debug!(id = event.id, text = %event.text, "change recorded");
        let _ = self.sender.send(event.clone()); // live listeners
        event
    }

    /// Remove the event with `id`. Returns whether anything was removed.
    pub fn dismiss(&self, id: u64) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = inner.events.len();
        inner.events.retain(|e| e.id != id);
        before != inner.events.len()
    }

    /// Current events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver for events recorded from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}
