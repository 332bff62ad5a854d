//! In-memory event store adapter for eventree.
//!
//! This crate provides [`InMemoryClient`], an implementation of the
//! `eventree_client::Client` port that keeps the whole event log in process
//! memory, useful for testing and development scenarios where a running store
//! is not available. It honors the same semantics as the wire client: atomic
//! precondition-guarded writes, hierarchical subjects with recursive reads,
//! hash-chained events, and endless observation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use eventree_client::event::sha256_hex;
use eventree_client::options::{
    ensure_supported, IfEventIsMissing, Order, StoreOption, OBSERVE_OPTIONS, READ_OPTIONS,
};
use eventree_client::{
    Client, ClientError, Event, EventCandidate, EventStream, Health, HealthStatus, Precondition,
    Subject,
};
use futures::StreamExt;
use tokio::sync::broadcast;
use tracing::debug;

const SPEC_VERSION: &str = "1.0";
const DATA_CONTENT_TYPE: &str = "application/json";
const INITIAL_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Thread-safe in-memory event store client for testing.
///
/// Cloning yields handles onto the same log. Writes are serialized through a
/// lock so precondition evaluation and the append are atomic per batch, the
/// same guarantee the real store gives.
#[derive(Clone)]
pub struct InMemoryClient {
    state: Arc<RwLock<StoreState>>,
    live: broadcast::Sender<Event>,
}

struct StoreState {
    events: Vec<Event>,
    next_id: u64,
    last_hash: String,
}

impl InMemoryClient {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(1024);
        Self {
            state: Arc::new(RwLock::new(StoreState {
                events: Vec::new(),
                next_id: 0,
                last_hash: INITIAL_HASH.to_owned(),
            })),
            live,
        }
    }

    /// Number of events currently stored.
    pub fn len(&self) -> usize {
        self.state.read().expect("RwLock poisoned").events.len()
    }

    /// Whether the store holds no events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

fn check_precondition(events: &[Event], precondition: &Precondition) -> Result<(), ClientError> {
    match precondition {
        Precondition::SubjectIsPristine { subject } => {
            if events.iter().any(|e| &e.subject == subject) {
                return Err(ClientError::Concurrency(format!(
                    "subject {subject} is not pristine"
                )));
            }
        }
        Precondition::SubjectIsPopulated { subject } => {
            if !events.iter().any(|e| &e.subject == subject) {
                return Err(ClientError::Concurrency(format!(
                    "subject {subject} is not populated"
                )));
            }
        }
        Precondition::SubjectIsOnEventId { subject, event_id } => {
            let latest = events.iter().rev().find(|e| &e.subject == subject);
            match latest {
                Some(event) if &event.id == event_id => {}
                Some(event) => {
                    return Err(ClientError::Concurrency(format!(
                        "subject {subject} is on event {} rather than {event_id}",
                        event.id
                    )));
                }
                None => {
                    return Err(ClientError::Concurrency(format!(
                        "subject {subject} has no events, expected event {event_id}"
                    )));
                }
            }
        }
        Precondition::EventQlQueryIsTrue { .. } => {
            return Err(ClientError::InvalidUsage(
                "EventQL preconditions are not supported by the in-memory store".into(),
            ));
        }
    }
    Ok(())
}

fn compute_hash(event: &Event) -> Result<String, ClientError> {
    let metadata = [
        event.spec_version.as_str(),
        event.id.as_str(),
        event.predecessor_hash.as_str(),
        event.time_raw.as_str(),
        event.source.as_str(),
        event.subject.as_str(),
        event.event_type.as_str(),
        event.data_content_type.as_str(),
    ]
    .join("|");
    let data_json = serde_json::to_string(&event.data)
        .map_err(|e| ClientError::Marshalling(format!("unserializable event data: {e}")))?;
    Ok(sha256_hex(&format!(
        "{}{}",
        sha256_hex(&metadata),
        sha256_hex(&data_json)
    )))
}

fn matches_subject(event_subject: &str, subject: &str, recursive: bool) -> bool {
    if event_subject == subject {
        return true;
    }
    if !recursive {
        return false;
    }
    subject == "/" || event_subject.starts_with(&format!("{subject}/"))
}

fn numeric_id(id: &str) -> Result<u64, ClientError> {
    id.parse::<u64>().map_err(|_| {
        ClientError::InvalidUsage(format!(
            "the in-memory store issues numeric event ids, got {id:?}"
        ))
    })
}

/// The per-request filter derived from subject and options, shared by read
/// and observe.
struct EventFilter {
    subject: String,
    recursive: bool,
    lower_bound: Option<u64>,
    upper_bound: Option<u64>,
    order: Order,
    from_latest: Option<FromLatest>,
}

struct FromLatest {
    subject: String,
    event_type: String,
    if_event_is_missing: IfEventIsMissing,
    /// Set once the starting event has been seen; earlier events are skipped.
    started: bool,
}

impl EventFilter {
    fn new(subject: &Subject, options: &[StoreOption]) -> Result<Self, ClientError> {
        let mut filter = Self {
            subject: subject.as_ref().to_owned(),
            recursive: false,
            lower_bound: None,
            upper_bound: None,
            order: Order::Chronological,
            from_latest: None,
        };
        for option in options {
            match option {
                StoreOption::Recursive => filter.recursive = true,
                StoreOption::Order(order) => filter.order = *order,
                StoreOption::LowerBoundId(id) => filter.lower_bound = Some(numeric_id(id)?),
                StoreOption::UpperBoundId(id) => filter.upper_bound = Some(numeric_id(id)?),
                StoreOption::FromLatestEvent {
                    subject,
                    event_type,
                    if_event_is_missing,
                } => {
                    filter.from_latest = Some(FromLatest {
                        subject: subject.clone(),
                        event_type: event_type.clone(),
                        if_event_is_missing: *if_event_is_missing,
                        started: false,
                    });
                }
            }
        }
        Ok(filter)
    }

    /// Resolves the `FromLatestEvent` starting point against the current log.
    ///
    /// Returns `false` when nothing should be delivered from the backlog and
    /// the missing-event strategy does not allow reading everything.
    fn resolve_from_latest(&mut self, events: &[Event]) -> Result<bool, ClientError> {
        let Some(from_latest) = &mut self.from_latest else {
            return Ok(true);
        };
        let latest = events
            .iter()
            .rev()
            .find(|e| e.subject == from_latest.subject && e.event_type == from_latest.event_type);
        match latest {
            Some(event) => {
                let start = numeric_id(&event.id)?;
                self.lower_bound = Some(self.lower_bound.map_or(start, |b| b.max(start)));
                from_latest.started = true;
                Ok(true)
            }
            None => match from_latest.if_event_is_missing {
                IfEventIsMissing::ReadEverything => {
                    from_latest.started = true;
                    Ok(true)
                }
                IfEventIsMissing::ReadNothing | IfEventIsMissing::WaitForEvent => Ok(false),
            },
        }
    }

    /// Whether a live event passes the filter, flipping the waiting
    /// `FromLatestEvent` state when its starting event arrives.
    fn admits_live(&mut self, event: &Event) -> Result<bool, ClientError> {
        if let Some(from_latest) = &mut self.from_latest {
            if !from_latest.started {
                if event.subject == from_latest.subject && event.event_type == from_latest.event_type
                {
                    from_latest.started = true;
                } else {
                    return Ok(false);
                }
            }
        }
        if !matches_subject(&event.subject, &self.subject, self.recursive) {
            return Ok(false);
        }
        if let Some(bound) = self.lower_bound {
            if numeric_id(&event.id)? < bound {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn backlog(&mut self, events: &[Event]) -> Result<Vec<Event>, ClientError> {
        if !self.resolve_from_latest(events)? {
            return Ok(Vec::new());
        }
        let mut selected = Vec::new();
        for event in events {
            if !matches_subject(&event.subject, &self.subject, self.recursive) {
                continue;
            }
            let id = numeric_id(&event.id)?;
            if self.lower_bound.is_some_and(|b| id < b) {
                continue;
            }
            if self.upper_bound.is_some_and(|b| id > b) {
                continue;
            }
            selected.push(event.clone());
        }
        if self.order == Order::Antichronological {
            selected.reverse();
        }
        Ok(selected)
    }
}

#[async_trait]
impl Client for InMemoryClient {
    async fn health(&self) -> Result<Health, ClientError> {
        Ok(Health {
            status: HealthStatus::Pass,
            checks: serde_json::Map::new(),
        })
    }

    async fn write(
        &self,
        candidates: Vec<EventCandidate>,
        preconditions: Vec<Precondition>,
    ) -> Result<Vec<Event>, ClientError> {
        let mut state = self.state.write().expect("RwLock poisoned");

        for precondition in &preconditions {
            check_precondition(&state.events, precondition)?;
        }

        let mut written = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let mut event = Event {
                source: candidate.source.to_string(),
                subject: candidate.subject.to_string(),
                event_type: candidate.event_type.to_string(),
                data: candidate.data,
                spec_version: SPEC_VERSION.to_owned(),
                id: state.next_id.to_string(),
                time_raw: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
                data_content_type: DATA_CONTENT_TYPE.to_owned(),
                hash: None,
                predecessor_hash: state.last_hash.clone(),
            };
            event.hash = Some(compute_hash(&event)?);
            state.next_id += 1;
            state.last_hash = event.hash.clone().unwrap_or_default();

            state.events.push(event.clone());
            // No receivers is fine; nobody is observing.
            let _ = self.live.send(event.clone());

            event.hash = None;
            written.push(event);
        }

        debug!(events = written.len(), "appended events to in-memory store");
        Ok(written)
    }

    async fn read_stream(
        &self,
        subject: &Subject,
        options: &[StoreOption],
    ) -> Result<EventStream, ClientError> {
        ensure_supported(options, &READ_OPTIONS)?;
        let mut filter = EventFilter::new(subject, options)?;
        let backlog = {
            let state = self.state.read().expect("RwLock poisoned");
            filter.backlog(&state.events)?
        };
        Ok(futures::stream::iter(backlog.into_iter().map(Ok)).boxed())
    }

    async fn observe(
        &self,
        subject: &Subject,
        options: &[StoreOption],
    ) -> Result<EventStream, ClientError> {
        ensure_supported(options, &OBSERVE_OPTIONS)?;
        let mut filter = EventFilter::new(subject, options)?;

        // Snapshot and subscribe under the same lock: writes are serialized
        // through the write lock, so the live feed picks up exactly where the
        // snapshot ends.
        let (backlog, mut live) = {
            let state = self.state.read().expect("RwLock poisoned");
            (filter.backlog(&state.events)?, self.live.subscribe())
        };

        // The sender handle keeps the channel open for the lifetime of the
        // stream, so observation outlives the client handle it came from.
        let keepalive = self.live.clone();
        Ok(Box::pin(async_stream::stream! {
            let _keepalive = keepalive;
            for event in backlog {
                yield Ok(event);
            }
            loop {
                match live.recv().await {
                    Ok(event) => match filter.admits_live(&event) {
                        Ok(true) => yield Ok(event),
                        Ok(false) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        yield Err(ClientError::Transport(format!(
                            "observation lagged behind the store by {missed} events"
                        )));
                        return;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        yield Err(ClientError::Transport(
                            "event observation stopped unexpectedly".into(),
                        ));
                        return;
                    }
                }
            }
        }))
    }
}
