//! Candidate enrichment hook.
//!
//! The single observability extension point of the client: a function applied
//! to every candidate before it is written, typically attaching W3C Trace
//! Context headers. The default attaches nothing.

use crate::event::EventCandidate;

/// Enriches event candidates before publication.
pub trait EventEnricher: Send + Sync {
    /// Returns the candidate to publish in place of `candidate`.
    fn enrich(&self, candidate: EventCandidate) -> EventCandidate;
}

/// Identity enricher: publishes candidates untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTracingEnricher;

impl EventEnricher for NoTracingEnricher {
    fn enrich(&self, candidate: EventCandidate) -> EventCandidate {
        candidate
    }
}
