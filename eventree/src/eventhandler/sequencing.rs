//! Sequencing keys: the caller's ordering scope.
//!
//! The sequencing key decides which events must be handled in relative order.
//! All events with the same key map to the same partition, so handling order
//! within the key is preserved regardless of partition count.

use eventree_client::Event;

/// Derives a sequencing key from an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSequenceResolver {
    /// Order all events of the same subject.
    PerSubject,
    /// Order all events whose subjects share the first `n` path segments.
    /// Useful when an aggregate spans a subtree, e.g. `/books/42/...`.
    PerLeadingSubjectLevels(usize),
    /// No ordering requirement; every event sequences on its own id and
    /// spreads across partitions individually.
    NoSequence,
}

impl EventSequenceResolver {
    /// The sequencing key for the given event.
    pub fn resolve(&self, event: &Event) -> String {
        match self {
            Self::PerSubject => event.subject.clone(),
            Self::PerLeadingSubjectLevels(levels) => {
                let prefix: Vec<&str> = event
                    .subject
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .take((*levels).max(1))
                    .collect();
                format!("/{}", prefix.join("/"))
            }
            Self::NoSequence => event.id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn event(id: &str, subject: &str) -> Event {
        Event {
            source: "tag://test".into(),
            subject: subject.into(),
            event_type: "book.added".into(),
            data: eventree_client::event::DataMap::new(),
            spec_version: "1.0".into(),
            id: id.into(),
            time_raw: "2026-08-27T10:15:30.000000Z".into(),
            data_content_type: "application/json".into(),
            hash: None,
            predecessor_hash: "0".repeat(64),
        }
    }

    #[test]
    fn per_subject_uses_the_full_subject() {
        let resolver = EventSequenceResolver::PerSubject;
        assert_eq!(resolver.resolve(&event("1", "/books/42/pages/1")), "/books/42/pages/1");
    }

    #[test]
    fn leading_levels_share_a_key_across_the_subtree() {
        let resolver = EventSequenceResolver::PerLeadingSubjectLevels(2);
        let a = resolver.resolve(&event("1", "/books/42/pages/1"));
        let b = resolver.resolve(&event("2", "/books/42/pages/2"));
        assert_eq!(a, "/books/42");
        assert_eq!(a, b);
        assert_ne!(a, resolver.resolve(&event("3", "/books/43/pages/1")));
    }

    #[test]
    fn leading_levels_with_short_subjects_use_the_whole_subject() {
        let resolver = EventSequenceResolver::PerLeadingSubjectLevels(3);
        assert_eq!(resolver.resolve(&event("1", "/books")), "/books");
    }

    #[test]
    fn no_sequence_spreads_by_event_id() {
        let resolver = EventSequenceResolver::NoSequence;
        assert_ne!(
            resolver.resolve(&event("1", "/books/42")),
            resolver.resolve(&event("2", "/books/42"))
        );
    }

    proptest! {
        #[test]
        fn leading_levels_key_is_a_prefix_of_the_subject(
            segments in prop::collection::vec("[a-z0-9]{1,8}", 1..6),
            levels in 1usize..5
        ) {
            let subject = format!("/{}", segments.join("/"));
            let key = EventSequenceResolver::PerLeadingSubjectLevels(levels)
                .resolve(&event("1", &subject));
            prop_assert!(subject.starts_with(&key));
            let expected = levels.min(segments.len());
            prop_assert_eq!(key.split('/').filter(|s| !s.is_empty()).count(), expected);
        }
    }
}
