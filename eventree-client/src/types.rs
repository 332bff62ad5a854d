//! Validated domain types for the wire model.
//!
//! All types use smart constructors so that a value, once constructed, is
//! known to be valid everywhere it flows ("parse, don't validate").

use nutype::nutype;

/// Validation predicate: a subject is an absolute path without empty segments.
fn is_absolute_path(s: &str) -> bool {
    s.starts_with('/') && (s == "/" || !s.split('/').skip(1).any(str::is_empty))
}

/// An absolute, hierarchical path identifying the entity an event pertains to.
///
/// Subjects form a tree like a filesystem: `/books/42` is a descendant of
/// `/books`, and recursive reads of `/books` include it. A `Subject` is
/// guaranteed non-empty, to start with `/`, and to contain no empty path
/// segments.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 1024, predicate = is_absolute_path),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct Subject(String);

impl Subject {
    /// Returns the non-empty path segments of this subject.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.as_ref().split('/').filter(|s| !s.is_empty())
    }

    /// Joins a relative path onto this subject, yielding a descendant subject.
    ///
    /// Leading and trailing slashes on `relative` are ignored; joining an
    /// effectively empty path returns this subject unchanged.
    pub fn join(&self, relative: &str) -> Result<Self, SubjectError> {
        let relative = relative.trim_matches('/');
        if relative.is_empty() {
            return Ok(self.clone());
        }
        let base = self.as_ref().trim_end_matches('/');
        Self::try_new(format!("{base}/{relative}"))
    }
}

/// Uniquely identifies an event type so its data structure can be interpreted.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct EventType(String);

/// Identifies the originating source of an event publication.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct Source(String);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn subject_accepts_absolute_paths(segments in prop::collection::vec("[a-zA-Z0-9_-]{1,12}", 1..6)) {
            let path = format!("/{}", segments.join("/"));
            let subject = Subject::try_new(path.clone());
            prop_assert!(subject.is_ok());
            let subject = subject.unwrap();
            prop_assert_eq!(subject.as_ref(), &path);
        }

        #[test]
        fn subject_rejects_relative_paths(s in "[a-zA-Z0-9_-]{1,32}") {
            prop_assert!(Subject::try_new(s).is_err());
        }

        #[test]
        fn subject_segments_roundtrip(segments in prop::collection::vec("[a-zA-Z0-9_-]{1,12}", 1..6)) {
            let subject = Subject::try_new(format!("/{}", segments.join("/"))).unwrap();
            let collected: Vec<&str> = subject.segments().collect();
            prop_assert_eq!(collected, segments.iter().map(String::as_str).collect::<Vec<_>>());
        }

        #[test]
        fn subject_join_produces_descendant(
            base in prop::collection::vec("[a-z0-9]{1,8}", 1..4),
            rel in prop::collection::vec("[a-z0-9]{1,8}", 1..4)
        ) {
            let subject = Subject::try_new(format!("/{}", base.join("/"))).unwrap();
            let joined = subject.join(&rel.join("/")).unwrap();
            prop_assert!(joined.as_ref().starts_with(subject.as_ref()));
            prop_assert_eq!(joined.segments().count(), base.len() + rel.len());
        }
    }

    #[test]
    fn subject_rejects_invalid_inputs() {
        assert!(Subject::try_new("").is_err());
        assert!(Subject::try_new("   ").is_err());
        assert!(Subject::try_new("books/42").is_err());
        assert!(Subject::try_new("/books//42").is_err());
        assert!(Subject::try_new("/".repeat(1025)).is_err());
    }

    #[test]
    fn subject_root_is_valid() {
        let root = Subject::try_new("/").unwrap();
        assert_eq!(root.segments().count(), 0);
    }

    #[test]
    fn subject_join_ignores_surrounding_slashes() {
        let subject = Subject::try_new("/books/42").unwrap();
        assert_eq!(subject.join("/pages/1/").unwrap().as_ref(), "/books/42/pages/1");
        assert_eq!(subject.join("").unwrap(), subject);
    }

    #[test]
    fn event_type_and_source_reject_blank() {
        assert!(EventType::try_new("  ").is_err());
        assert!(Source::try_new("").is_err());
        assert!(EventType::try_new("book.added").is_ok());
        assert!(Source::try_new("tag://library").is_ok());
    }
}
