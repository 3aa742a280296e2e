//! Last-known snapshot of one subscribed resource.

use futures::StreamExt;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Holds the latest snapshot pushed for a resource, or none.
///
/// Readers either take a copy with [`SnapshotStore::current`] or follow
/// changes through [`SnapshotStore::subscribe`] / [`SnapshotStore::stream`].
pub struct SnapshotStore<T> {
    sender: watch::Sender<Option<T>>,
}

impl<T> Default for SnapshotStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SnapshotStore<T> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    /// Install a new snapshot and return the one it replaces.
    pub fn replace(&self, snapshot: T) -> Option<T> {
        self.sender.send_replace(Some(snapshot))
    }

    /// Forget the snapshot, e.g. after the resource was deleted.
    pub fn clear(&self) -> Option<T> {
        self.sender.send_replace(None)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sender.borrow().is_none()
    }

    /// Receiver that observes every snapshot change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.sender.subscribe()
    }

    /// Run `f` against the current snapshot without cloning it.
    pub fn with_current<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        f(self.sender.borrow().as_ref())
    }
}

impl<T: Clone> SnapshotStore<T> {
    /// Copy of the current snapshot.
    #[must_use]
    pub fn current(&self) -> Option<T> {
        self.sender.borrow().clone()
    }
}

impl<T: Clone + Send + Sync + 'static> SnapshotStore<T> {
    /// Stream yielding the current snapshot, then every later one.
    ///
    /// Intermediate values may be skipped if the reader lags behind.
    #[must_use]
    pub fn stream(&self) -> futures::stream::BoxStream<'static, Option<T>> {
        WatchStream::new(self.subscribe()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_pending, assert_ready};

    use super::*;

    #[test]
    fn test_replace_returns_previous() {
        let store = SnapshotStore::new();
        assert!(store.is_empty());
        assert_eq!(store.replace(vec![1]), None);
        assert_eq!(store.replace(vec![1, 2]), Some(vec![1]));
        assert_eq!(store.current(), Some(vec![1, 2]));
    }

    #[test]
    fn test_clear() {
        let store = SnapshotStore::new();
        store.replace("queue");
        assert_eq!(store.clear(), Some("queue"));
        assert!(store.is_empty());
        assert_eq!(store.with_current(|s| s.copied()), None);
    }

    #[tokio::test]
    async fn test_subscribers_observe_updates() {
        let store = SnapshotStore::new();
        let mut rx = store.subscribe();

        store.replace(7_u32);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(7));
    }

    #[test]
    fn test_stream_pending_until_replaced() {
        let store = SnapshotStore::<u8>::new();
        let mut stream = tokio_test::task::spawn(store.stream());

        assert_eq!(assert_ready!(stream.poll_next()), Some(None));
        assert_pending!(stream.poll_next());

        store.replace(3);
        assert!(stream.is_woken());
        assert_eq!(assert_ready!(stream.poll_next()), Some(Some(3)));
    }

    #[tokio::test]
    async fn test_stream_starts_with_current() {
        let store = SnapshotStore::new();
        store.replace(String::from("first"));

        let mut stream = store.stream();
        assert_eq!(stream.next().await, Some(Some(String::from("first"))));

        store.replace(String::from("second"));
        assert_eq!(stream.next().await, Some(Some(String::from("second"))));
    }
}
