//! Change detection between successive snapshots of one entity collection.
//!
//! [`compare_entities`] finds what differs between two snapshots and renders
//! it as a single human-readable sentence, e.g.
//! `The queue with ID number 4 was changed. Its status was changed from "open" to "closed".`

use crate::model::{ComparableEntity, EntityRef, MeetingStatus, User};

const IN_PROGRESS_CLAUSE: &str = "The status indicates the meeting is now in progress.";

/// One watched field whose value differs between two versions of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    /// Raw field name, e.g. `backend_type`.
    pub field: &'static str,
    pub old: String,
    pub new: String,
}

impl FieldChange {
    fn new(field: &'static str, old: impl ToString, new: impl ToString) -> Self {
        Self {
            field,
            old: old.to_string(),
            new: new.to_string(),
        }
    }

    /// Human-readable name of the field.
    #[must_use]
    pub fn property_name(&self) -> &'static str {
        match self.field {
            "backend_type" => "meeting type",
            "assignee" => "host",
            other => other,
        }
    }

    /// Sentence describing the change.
    #[must_use]
    pub fn clause(&self) -> String {
        format!(
            "Its {} was changed from \"{}\" to \"{}\".",
            self.property_name(),
            self.old,
            self.new
        )
    }
}

fn display_user(user: Option<&User>) -> String {
    user.map_or_else(|| "null".to_string(), |u| u.username.clone())
}

/// Diff the watched fields of two versions of the same entity.
///
/// Queues watch `status` and `name`; meetings watch `backend_type` and
/// `assignee`. Other fields are ignored.
///
/// # Panics
/// Panics if the two entities are of different kinds.
#[must_use]
pub fn watched_changes(old: EntityRef<'_>, new: EntityRef<'_>) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    match (old, new) {
        (EntityRef::Queue(a), EntityRef::Queue(b)) => {
            if a.status != b.status {
                changes.push(FieldChange::new("status", a.status, b.status));
            }
            if a.name != b.name {
                changes.push(FieldChange::new("name", &a.name, &b.name));
            }
        }
        (EntityRef::Meeting(a), EntityRef::Meeting(b)) => {
            if a.backend_type != b.backend_type {
                changes.push(FieldChange::new("backend_type", &a.backend_type, &b.backend_type));
            }
            if a.assignee != b.assignee {
                changes.push(FieldChange::new(
                    "assignee",
                    display_user(a.assignee.as_ref()),
                    display_user(b.assignee.as_ref()),
                ));
            }
        }
        (a, b) => panic!("cannot compare a {} with a {}", a.kind(), b.kind()),
    }
    changes
}

/// Clauses describing how `old` became `new`.
fn describe_modification(old: EntityRef<'_>, new: EntityRef<'_>) -> Vec<String> {
    let mut clauses: Vec<String> = watched_changes(old, new)
        .iter()
        .map(FieldChange::clause)
        .collect();

    if let (EntityRef::Meeting(a), EntityRef::Meeting(b)) = (old, new) {
        if a.status != b.status && b.status == MeetingStatus::Started {
            clauses.push(IN_PROGRESS_CLAUSE.to_string());
        }
    }
    clauses
}

/// Entities present in exactly one of the two snapshots.
///
/// Entities only in `old` come first, in `old` order, followed by those only
/// in `new`.
#[must_use]
pub fn symmetric_difference<'a, E: ComparableEntity>(old: &'a [E], new: &'a [E]) -> Vec<&'a E> {
    let removed = old.iter().filter(|e| !new.contains(e));
    let added = new.iter().filter(|e| !old.contains(e));
    let mut diff: Vec<&E> = Vec::new();
    for entity in removed.chain(added) {
        if !diff.contains(&entity) {
            diff.push(entity);
        }
    }
    diff
}

/// Describe the difference between two snapshots of one collection.
///
/// Returns `None` when the snapshots are equal, or when the only differences
/// are in fields nobody watches. A single net change per call is assumed:
/// when more than two entities differ, only the first two are described.
#[must_use]
pub fn compare_entities<E: ComparableEntity>(old: &[E], new: &[E]) -> Option<String> {
    let diff = symmetric_difference(old, new);
    let subject = diff.first()?.as_entity();
    let counterpart = diff.get(1).map(|e| e.as_entity());

    let kind = E::KIND;
    let identifier = subject.permanent_identifier();

    if new.len() > old.len() {
        return Some(format!("A new {kind} with {identifier} was added."));
    }
    if new.len() < old.len() {
        return Some(format!("The {kind} with {identifier} was deleted."));
    }

    let clauses = describe_modification(subject, counterpart?);
    if clauses.is_empty() {
        tracing::trace!(%kind, %identifier, "difference only in unwatched fields");
        return None;
    }
    Some(format!(
        "The {kind} with {identifier} was changed. {}",
        clauses.join(" ")
    ))
}
