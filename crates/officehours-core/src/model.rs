//! Entities pushed by the office-hours server.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Server-side user record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl User {
    /// Create a user with empty display names.
    #[must_use]
    pub fn new(id: u64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            first_name: String::new(),
            last_name: String::new(),
        }
    }
}

/// Whether a queue accepts new meetings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Open,
    Closed,
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

/// Queue fields shared by every queue payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueBase {
    pub id: u64,
    pub name: String,
    pub status: QueueStatus,
    #[serde(default)]
    pub hosts: Vec<User>,
}

/// A queue as seen by one of its hosts, including the meetings in it.
///
/// `meeting_set` is required: it is what tells a host payload apart from a
/// [`QueueAttendee`] one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueHost {
    #[serde(flatten)]
    pub queue: QueueBase,
    pub meeting_set: Vec<Meeting>,
    #[serde(default)]
    pub allowed_backends: Vec<String>,
}

impl QueueHost {
    /// Meetings currently in the queue.
    #[must_use]
    pub fn meetings(&self) -> &[Meeting] {
        &self.meeting_set
    }
}

/// The caller's own meeting in a queue, with its position in line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MyMeeting {
    #[serde(flatten)]
    pub meeting: Meeting,
    /// Meetings ahead of this one; `None` once the meeting has started.
    #[serde(default)]
    pub line_place: Option<u32>,
}

/// A queue as seen by someone who is not one of its hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueAttendee {
    #[serde(flatten)]
    pub queue: QueueBase,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub line_length: u32,
    #[serde(default)]
    pub my_meeting: Option<MyMeeting>,
    #[serde(default)]
    pub allowed_backends: Vec<String>,
}

impl QueueAttendee {
    /// Backend to preselect: the one of the caller's meeting, else
    /// `preferred` if the queue allows it, else the first allowed one.
    #[must_use]
    pub fn selected_backend<'a>(&'a self, preferred: &'a str) -> Option<&'a str> {
        if let Some(mine) = &self.my_meeting {
            return Some(&mine.meeting.backend_type);
        }
        if self.allowed_backends.iter().any(|b| b == preferred) {
            return Some(preferred);
        }
        self.allowed_backends.first().map(String::as_str)
    }
}

/// Payload of a per-queue subscription.
///
/// The server sends the host view to hosts and the attendee view to
/// everyone else, without a discriminant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueuePayload {
    Host(QueueHost),
    Attendee(QueueAttendee),
}

impl QueuePayload {
    #[must_use]
    pub const fn queue(&self) -> &QueueBase {
        match self {
            Self::Host(host) => &host.queue,
            Self::Attendee(attendee) => &attendee.queue,
        }
    }
}

/// The signed-in user, as pushed by a per-user subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MyUser {
    #[serde(flatten)]
    pub user: User,
    /// Queue the user is waiting in, if any.
    #[serde(default)]
    pub my_queue: Option<QueueAttendee>,
}

/// Meeting lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    Unstarted,
    Started,
}

impl fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unstarted => f.write_str("unstarted"),
            Self::Started => f.write_str("started"),
        }
    }
}

/// A meeting waiting in, or running from, a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: u64,
    /// Conferencing backend, e.g. `zoom` or `inperson`.
    pub backend_type: String,
    /// Host assigned to run the meeting.
    #[serde(default)]
    pub assignee: Option<User>,
    /// Attendees in join order. The server never sends an empty list.
    pub attendees: Vec<User>,
    pub status: MeetingStatus,
}

/// Discriminant of the comparable entity variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Queue,
    Meeting,
}

impl EntityKind {
    /// Noun used in change narration.
    #[must_use]
    pub const fn noun(self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Meeting => "meeting",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.noun())
    }
}

/// Borrowed view over one comparable entity, tagged by variant.
#[derive(Debug, Clone, Copy)]
pub enum EntityRef<'a> {
    Queue(&'a QueueBase),
    Meeting(&'a Meeting),
}

impl EntityRef<'_> {
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Queue(_) => EntityKind::Queue,
            Self::Meeting(_) => EntityKind::Meeting,
        }
    }

    /// Identifier used to name the entity in narration.
    ///
    /// Never derived from a watched field, so it stays the same across the
    /// change being described.
    #[must_use]
    pub fn permanent_identifier(&self) -> String {
        match self {
            Self::Queue(queue) => format!("ID number {}", queue.id),
            Self::Meeting(meeting) => match meeting.attendees.first() {
                Some(attendee) => format!("attendee {}", attendee.username),
                None => format!("ID number {}", meeting.id),
            },
        }
    }
}

/// Entity shapes the change detector knows how to narrate.
///
/// Implemented only by [`QueueBase`] and [`Meeting`].
pub trait ComparableEntity: PartialEq {
    /// Variant discriminant.
    const KIND: EntityKind;

    /// Tagged view used by the description logic.
    fn as_entity(&self) -> EntityRef<'_>;
}

impl ComparableEntity for QueueBase {
    const KIND: EntityKind = EntityKind::Queue;

    fn as_entity(&self) -> EntityRef<'_> {
        EntityRef::Queue(self)
    }
}

impl ComparableEntity for Meeting {
    const KIND: EntityKind = EntityKind::Meeting;

    fn as_entity(&self) -> EntityRef<'_> {
        EntityRef::Meeting(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_host_flattens_base_fields() {
        let json = r#"{
            "id": 4,
            "name": "Math",
            "status": "open",
            "hosts": [{"id": 1, "username": "prof", "first_name": "P", "last_name": "R"}],
            "meeting_set": [{
                "id": 9,
                "backend_type": "zoom",
                "assignee": null,
                "attendees": [{"id": 2, "username": "stu"}],
                "status": "unstarted"
            }],
            "allowed_backends": ["zoom"]
        }"#;

        let host: QueueHost = serde_json::from_str(json).unwrap();
        assert_eq!(host.queue.id, 4);
        assert_eq!(host.queue.status, QueueStatus::Open);
        assert_eq!(host.queue.hosts[0].username, "prof");
        assert_eq!(host.meeting_set.len(), 1);
        assert!(host.meeting_set[0].assignee.is_none());
        assert_eq!(host.meeting_set[0].attendees[0].first_name, "");
    }

    #[test]
    fn test_queue_payload_tells_host_from_attendee() {
        let host = r#"{"id": 4, "name": "Math", "status": "open", "hosts": [], "meeting_set": []}"#;
        let attendee = r#"{
            "id": 4,
            "name": "Math",
            "status": "open",
            "hosts": [],
            "description": "Algebra help",
            "line_length": 3,
            "my_meeting": null,
            "allowed_backends": ["zoom", "inperson"]
        }"#;

        let payload: QueuePayload = serde_json::from_str(host).unwrap();
        assert!(matches!(payload, QueuePayload::Host(ref q) if q.meeting_set.is_empty()));

        let payload: QueuePayload = serde_json::from_str(attendee).unwrap();
        let QueuePayload::Attendee(queue) = payload else {
            panic!("attendee view decoded as host view");
        };
        assert_eq!(queue.line_length, 3);
        assert_eq!(queue.description, "Algebra help");
        assert_eq!(queue.selected_backend("inperson"), Some("inperson"));
        assert_eq!(queue.selected_backend("bluejeans"), Some("zoom"));

        // Without meetings the host view cannot be decoded.
        assert!(serde_json::from_str::<QueueHost>(attendee).is_err());
    }

    #[test]
    fn test_my_user_with_joined_queue() {
        let json = r#"{
            "id": 2,
            "username": "stu",
            "my_queue": {
                "id": 4,
                "name": "Math",
                "status": "open",
                "line_length": 2,
                "my_meeting": {
                    "id": 9,
                    "backend_type": "inperson",
                    "assignee": null,
                    "attendees": [{"id": 2, "username": "stu"}],
                    "status": "unstarted",
                    "line_place": 1
                },
                "allowed_backends": ["zoom", "inperson"]
            }
        }"#;

        let me: MyUser = serde_json::from_str(json).unwrap();
        assert_eq!(me.user.username, "stu");
        let queue = me.my_queue.unwrap();
        assert_eq!(queue.queue.id, 4);
        let mine = queue.my_meeting.as_ref().unwrap();
        assert_eq!(mine.line_place, Some(1));
        assert_eq!(queue.selected_backend("zoom"), Some("inperson"));

        let me: MyUser = serde_json::from_str(r#"{"id": 2, "username": "stu", "my_queue": null}"#).unwrap();
        assert!(me.my_queue.is_none());
    }

    #[test]
    fn test_permanent_identifiers() {
        let queue = QueueBase {
            id: 4,
            name: "Math".into(),
            status: QueueStatus::Closed,
            hosts: Vec::new(),
        };
        assert_eq!(queue.as_entity().permanent_identifier(), "ID number 4");

        let mut meeting = Meeting {
            id: 12,
            backend_type: "inperson".into(),
            assignee: None,
            attendees: vec![User::new(2, "stu"), User::new(3, "other")],
            status: MeetingStatus::Unstarted,
        };
        assert_eq!(meeting.as_entity().permanent_identifier(), "attendee stu");

        meeting.attendees.clear();
        assert_eq!(meeting.as_entity().permanent_identifier(), "ID number 12");
    }

    #[test]
    fn test_structural_equality_covers_nested_users() {
        let a = Meeting {
            id: 1,
            backend_type: "zoom".into(),
            assignee: Some(User::new(5, "host")),
            attendees: vec![User::new(2, "stu")],
            status: MeetingStatus::Started,
        };
        let mut b = a.clone();
        assert_eq!(a, b);

        b.attendees[0].last_name = "Changed".into();
        assert_ne!(a, b);
    }
}
