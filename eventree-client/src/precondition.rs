//! Write preconditions for optimistic concurrency.
//!
//! Preconditions are evaluated atomically by the store against the whole
//! write batch: either every precondition holds and all candidates are
//! persisted, or none are.

use serde::{Deserialize, Serialize};

/// A predicate over store state that must hold for a write to succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Precondition {
    /// The subject must not yet exist. Not violated by events stored under
    /// descendant subjects.
    #[serde(rename = "isSubjectPristine")]
    SubjectIsPristine {
        /// Path of the subject that must be pristine.
        subject: String,
    },

    /// The subject must already exist, i.e. at least one event was published
    /// exactly for it. Not violated by descendant subjects either way.
    #[serde(rename = "isSubjectPopulated")]
    SubjectIsPopulated {
        /// Path of the subject that must be populated.
        subject: String,
    },

    /// The subject's most recent event must carry the given id. Violated if
    /// the subject does not exist or was updated by another event since.
    #[serde(rename = "isSubjectOnEventId")]
    SubjectIsOnEventId {
        /// Path of the subject.
        subject: String,
        /// The expected id of the subject's latest event.
        #[serde(rename = "eventId")]
        event_id: String,
    },

    /// The given query must evaluate to `true`, enabling cross-subject
    /// consistency conditions beyond the fixed subject predicates.
    #[serde(rename = "isEventQlQueryTrue")]
    EventQlQueryIsTrue {
        /// The query expression the store evaluates.
        query: String,
    },
}
