//! Wire-protocol client for hierarchical-subject event sourcing stores.
//!
//! The store keeps an append-only log of immutable, hash-chained events, each
//! attached to a `Subject`: an absolute, filesystem-like path identifying the
//! entity the event pertains to. This crate provides the value types for that
//! wire model together with [`EventStoreClient`], an HTTP(S) implementation of
//! the [`Client`] port covering the four store operations: health, write,
//! read, and observe.
//!
//! Writes are atomic per batch and guarded by [`Precondition`]s evaluated by
//! the store at commit time (optimistic concurrency). Reads and observations
//! are newline-delimited JSON streams; `observe` never completes under normal
//! operation and an ended observe stream is surfaced as a transport error.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod enricher;
pub mod error;
pub mod event;
pub mod health;
pub mod options;
pub mod precondition;
pub mod types;

pub use client::{Client, EventStoreClient, EventStoreClientConfig, EventStream};
pub use enricher::{EventEnricher, NoTracingEnricher};
pub use error::ClientError;
pub use event::{Event, EventCandidate};
pub use health::{Health, HealthStatus};
pub use options::{IfEventIsMissing, Order, StoreOption};
pub use precondition::Precondition;
pub use types::{EventType, EventTypeError, Source, SourceError, Subject, SubjectError};
