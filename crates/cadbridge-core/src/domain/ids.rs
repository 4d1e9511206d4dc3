//! Strongly-typed identifiers.
//!
//! All ids are ULIDs wrapped in `Id<T>`, where `T` is a zero-sized marker.
//! ULIDs sort by creation time, which keeps log lines and queue dumps in a
//! readable order, and the marker keeps a `TaskId` from being passed where a
//! `RequestId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Supplies the display prefix for an id type.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueuedTask {}

impl IdMarker for QueuedTask {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Request {}

impl IdMarker for Request {
    fn prefix() -> &'static str {
        "req-"
    }
}

/// Identifier of an enqueued task (diagnostics only, never used for ordering).
pub type TaskId = Id<QueuedTask>;

/// Identifier of one inbound HTTP request, used to correlate log lines.
pub type RequestId = Id<Request>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_their_prefix() {
        let task = TaskId::from_ulid(Ulid::new());
        let request = RequestId::from_ulid(Ulid::new());

        assert!(task.to_string().starts_with("task-"));
        assert!(request.to_string().starts_with("req-"));
        // let _: TaskId = request; // <- does not compile
    }

    #[test]
    fn ids_serialize_as_plain_ulids() {
        let ulid = Ulid::new();
        let id: TaskId = ulid.into();

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{ulid}\""));

        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn marker_adds_no_size() {
        assert_eq!(std::mem::size_of::<TaskId>(), std::mem::size_of::<Ulid>());
    }
}
