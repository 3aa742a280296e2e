//! Subscriptions to server-side resources.
//!
//! A [`Subscription`] ties a resource's message router to its
//! [`SnapshotStore`] and [`ChangeLog`]: every pushed snapshot replaces the
//! stored one and the difference is narrated into the log.

use std::{fmt, sync::Arc};

use officehours_core::{
    ChangeEvent, ChangeLog, ComparableEntity, QueueHost, QueuePayload, SnapshotStore,
};
use serde::de::DeserializeOwned;

use crate::{
    error::{ConnectionError, ErrorSignal},
    router::MessageRouter,
};

const DEFAULT_DELETED_MESSAGE: &str = "This resource has been deleted.";

/// Server resource that can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// A queue: [`QueuePayload`], the host or attendee view.
    Queue(u64),
    /// The signed-in user: [`officehours_core::MyUser`].
    User(u64),
}

impl Resource {
    /// Path of the resource's socket endpoint.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::Queue(id) => format!("/ws/queues/{id}/"),
            Self::User(id) => format!("/ws/users/{id}/"),
        }
    }

    /// Socket URL of the resource below `base`.
    ///
    /// `http://` and `https://` bases are mapped to `ws://` and `wss://`.
    #[must_use]
    pub fn url(&self, base: &str) -> String {
        let base = base.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{base}{}", self.path())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue(id) => write!(f, "queue {id}"),
            Self::User(id) => write!(f, "user {id}"),
        }
    }
}

fn delete_handler<T>(
    snapshot: Arc<SnapshotStore<T>>,
    message: String,
) -> impl FnMut(&ErrorSignal) + Send + 'static
where
    T: Send + Sync + 'static,
{
    move |errors: &ErrorSignal| {
        snapshot.clear();
        errors.set(ConnectionError::ResourceDeleted(message.clone()));
    }
}

/// Install `content` and narrate how `extract` changed since the previous
/// snapshot. The first snapshot is not narrated.
fn replace_and_record<T, E, F>(snapshot: &SnapshotStore<T>, changes: &ChangeLog, extract: &F, content: T)
where
    E: ComparableEntity,
    F: Fn(&T) -> &[E],
{
    let Some(previous) = snapshot.replace(content) else {
        return;
    };
    snapshot.with_current(|current| {
        if let Some(current) = current {
            changes.record(extract(&previous), extract(current));
        }
    });
}

/// Client-side state of one subscribed resource.
pub struct Subscription<T> {
    snapshot: Arc<SnapshotStore<T>>,
    changes: Arc<ChangeLog>,
    deleted_message: String,
}

impl<T> Default for Subscription<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Subscription<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshot: Arc::new(SnapshotStore::new()),
            changes: Arc::new(ChangeLog::new()),
            deleted_message: DEFAULT_DELETED_MESSAGE.to_string(),
        }
    }

    /// Message surfaced when the server reports the resource deleted.
    #[must_use]
    pub fn with_deleted_message(mut self, message: impl Into<String>) -> Self {
        self.deleted_message = message.into();
        self
    }

    #[must_use]
    pub const fn snapshot(&self) -> &Arc<SnapshotStore<T>> {
        &self.snapshot
    }

    #[must_use]
    pub const fn changes(&self) -> &Arc<ChangeLog> {
        &self.changes
    }

    /// Current change events, oldest first.
    #[must_use]
    pub fn change_events(&self) -> Vec<ChangeEvent> {
        self.changes.events()
    }

    /// Dismiss one change event.
    pub fn dismiss(&self, id: u64) -> bool {
        self.changes.dismiss(id)
    }
}

impl<T> Subscription<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    /// Router that keeps the snapshot current without narrating changes.
    #[must_use]
    pub fn router(&self) -> MessageRouter<T> {
        let snapshot = Arc::clone(&self.snapshot);
        MessageRouter::new(move |content: T| {
            snapshot.replace(content);
        })
        .on_delete(delete_handler(Arc::clone(&self.snapshot), self.deleted_message.clone()))
    }

    /// Router that keeps the snapshot current and narrates changes of the
    /// collection `extract` selects from it.
    ///
    /// The first snapshot is not narrated; every later one is compared with
    /// its predecessor.
    #[must_use]
    pub fn tracking_router<E, F>(&self, extract: F) -> MessageRouter<T>
    where
        E: ComparableEntity + 'static,
        F: Fn(&T) -> &[E] + Send + 'static,
    {
        let snapshot = Arc::clone(&self.snapshot);
        let changes = Arc::clone(&self.changes);
        MessageRouter::new(move |content: T| {
            replace_and_record(&snapshot, &changes, &extract, content);
        })
        .on_delete(delete_handler(Arc::clone(&self.snapshot), self.deleted_message.clone()))
    }
}

impl Subscription<QueueHost> {
    /// Router for a queue subscription that requires the host view.
    ///
    /// Meeting changes are narrated as with [`Subscription::tracking_router`].
    /// An attendee view clears the snapshot and surfaces
    /// [`ConnectionError::NotHost`] until a host view arrives again.
    #[must_use]
    pub fn host_router(&self) -> MessageRouter<QueuePayload> {
        let snapshot = Arc::clone(&self.snapshot);
        let changes = Arc::clone(&self.changes);
        MessageRouter::with_errors(move |payload: QueuePayload, errors: &ErrorSignal| match payload {
            QueuePayload::Host(queue) => {
                errors.clear_if(&ConnectionError::NotHost);
                replace_and_record(&snapshot, &changes, &QueueHost::meetings, queue);
            }
            QueuePayload::Attendee(queue) => {
                tracing::warn!(queue_id = queue.queue.id, "received attendee view of queue");
                snapshot.clear();
                errors.set(ConnectionError::NotHost);
            }
        })
        .on_delete(delete_handler(Arc::clone(&self.snapshot), self.deleted_message.clone()))
    }
}

#[cfg(test)]
mod tests {
    use officehours_core::{MeetingStatus, MyUser, QueueAttendee, QueueStatus};

    use super::*;

    fn queue_json(status: &str, meetings: &str) -> String {
        format!(
            r#"{{"type": "update", "content": {{"id": 4, "name": "Math", "status": "{status}", "hosts": [], "meeting_set": [{meetings}]}}}}"#
        )
    }

    fn meeting_json(id: u64, attendee: &str, status: &str) -> String {
        format!(
            r#"{{"id": {id}, "backend_type": "zoom", "assignee": null, "attendees": [{{"id": {id}, "username": "{attendee}"}}], "status": "{status}"}}"#
        )
    }

    #[test]
    fn test_resource_urls() {
        assert_eq!(Resource::Queue(4).path(), "/ws/queues/4/");
        assert_eq!(
            Resource::Queue(4).url("https://oh.example.edu/"),
            "wss://oh.example.edu/ws/queues/4/"
        );
        assert_eq!(
            Resource::User(9).url("http://localhost:8000"),
            "ws://localhost:8000/ws/users/9/"
        );
        assert_eq!(
            Resource::User(9).url("ws://localhost:8000"),
            "ws://localhost:8000/ws/users/9/"
        );
        assert_eq!(Resource::Queue(4).to_string(), "queue 4");
    }

    #[test]
    fn test_tracking_router_narrates_meeting_changes() {
        let subscription: Subscription<QueueHost> = Subscription::new();
        let mut router = subscription.tracking_router(QueueHost::meetings);
        let errors = ErrorSignal::new();

        let alice = meeting_json(1, "alice", "unstarted");
        router.route(&queue_json("open", &alice), &errors).unwrap();
        assert!(subscription.change_events().is_empty());

        let both = format!("{alice}, {}", meeting_json(2, "bob", "unstarted"));
        router.route(&queue_json("open", &both), &errors).unwrap();

        let started = format!("{}, {}", meeting_json(1, "alice", "started"), meeting_json(2, "bob", "unstarted"));
        router.route(&queue_json("open", &started), &errors).unwrap();

        // Queue-level changes are not part of the tracked collection.
        router.route(&queue_json("closed", &started), &errors).unwrap();

        let texts: Vec<String> = subscription
            .change_events()
            .into_iter()
            .map(|e| e.text)
            .collect();
        assert_eq!(
            texts,
            vec![
                "A new meeting with attendee bob was added.".to_string(),
                "The meeting with attendee alice was changed. \
                 The status indicates the meeting is now in progress."
                    .to_string(),
            ]
        );

        let current = subscription.snapshot().current().unwrap();
        assert_eq!(current.queue.status, QueueStatus::Closed);
        assert_eq!(current.meeting_set[0].status, MeetingStatus::Started);
    }

    #[test]
    fn test_dismiss_through_subscription() {
        let subscription: Subscription<QueueHost> = Subscription::new();
        let mut router = subscription.tracking_router(QueueHost::meetings);
        let errors = ErrorSignal::new();

        router.route(&queue_json("open", ""), &errors).unwrap();
        router
            .route(&queue_json("open", &meeting_json(1, "alice", "unstarted")), &errors)
            .unwrap();
        router.route(&queue_json("open", ""), &errors).unwrap();

        let ids: Vec<u64> = subscription.change_events().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1]);
        assert!(subscription.dismiss(0));
        assert!(!subscription.dismiss(0));
        assert_eq!(subscription.change_events()[0].text, "The meeting with attendee alice was deleted.");
    }

    #[test]
    fn test_host_router_rejects_attendee_view() {
        let subscription: Subscription<QueueHost> = Subscription::new();
        let mut router = subscription.host_router();
        let errors = ErrorSignal::new();
        let attendee_view = r#"{"type": "update", "content": {"id": 4, "name": "Math", "status": "open", "line_length": 1, "my_meeting": null, "allowed_backends": ["zoom"]}}"#;

        router
            .route(&queue_json("open", &meeting_json(1, "alice", "unstarted")), &errors)
            .unwrap();
        assert_eq!(subscription.snapshot().current().unwrap().meetings().len(), 1);

        router.route(attendee_view, &errors).unwrap();
        assert!(subscription.snapshot().is_empty());
        assert_eq!(errors.current(), Some(ConnectionError::NotHost));
        assert_eq!(
            errors.current().unwrap().to_string(),
            "You are not a host of this queue. If you believe you are seeing this message in error, contact the queue host(s)."
        );

        // Host rights restored: the error goes away, the snapshot starts over.
        router.route(&queue_json("open", ""), &errors).unwrap();
        assert_eq!(errors.current(), None);
        assert!(subscription.snapshot().current().unwrap().meetings().is_empty());
        assert!(subscription.change_events().is_empty());
    }

    #[test]
    fn test_host_router_narrates_meetings() {
        let subscription: Subscription<QueueHost> = Subscription::new();
        let mut router = subscription.host_router();
        let errors = ErrorSignal::new();

        router.route(&queue_json("open", ""), &errors).unwrap();
        router
            .route(&queue_json("open", &meeting_json(3, "carol", "unstarted")), &errors)
            .unwrap();

        assert_eq!(
            subscription.change_events()[0].text,
            "A new meeting with attendee carol was added."
        );
        assert_eq!(errors.current(), None);
    }

    #[test]
    fn test_attendee_and_user_subscriptions() {
        let errors = ErrorSignal::new();

        let queue: Subscription<QueueAttendee> = Subscription::new();
        let mut router = queue.router();
        router
            .route(
                r#"{"type": "init", "content": {"id": 4, "name": "Math", "status": "closed", "line_length": 0, "my_meeting": null, "allowed_backends": ["inperson"]}}"#,
                &errors,
            )
            .unwrap();
        let current = queue.snapshot().current().unwrap();
        assert_eq!(current.queue.status, QueueStatus::Closed);
        assert_eq!(current.allowed_backends, vec!["inperson".to_string()]);

        let me: Subscription<MyUser> = Subscription::new();
        let mut router = me.router();
        router
            .route(
                r#"{"type": "init", "content": {"id": 2, "username": "stu", "my_queue": {"id": 4, "name": "Math", "status": "open", "line_length": 1, "my_meeting": null, "allowed_backends": []}}}"#,
                &errors,
            )
            .unwrap();
        let current = me.snapshot().current().unwrap();
        assert_eq!(current.user.username, "stu");
        assert_eq!(current.my_queue.map(|q| q.queue.name), Some("Math".to_string()));
    }

    #[test]
    fn test_deleted_clears_snapshot_and_surfaces_error() {
        let subscription: Subscription<QueueHost> =
            Subscription::new().with_deleted_message("This queue has been deleted.");
        let mut router = subscription.router();
        let errors = ErrorSignal::new();

        router.route(&queue_json("open", ""), &errors).unwrap();
        assert!(!subscription.snapshot().is_empty());

        router.route(r#"{"type": "deleted", "content": null}"#, &errors).unwrap();
        assert!(subscription.snapshot().is_empty());
        assert_eq!(
            errors.current(),
            Some(ConnectionError::ResourceDeleted("This queue has been deleted.".into()))
        );
    }
}
