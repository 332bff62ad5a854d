//! Event and event-candidate value types.
//!
//! Events conform to the CloudEvents JSON shape used by the store: lowercase
//! attribute names, a JSON object payload under `data`, and server-assigned
//! identity (`id`, `time`, `hash`, `predecessorhash`) stamped on write
//! acknowledgement. Clients never recompute the hash chain except to verify
//! it.

use crate::error::ClientError;
use crate::types::{EventType, Source, Subject};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// A JSON object carrying an event's payload data.
pub type DataMap = Map<String, Value>;

/// An immutable event as persisted in the store.
///
/// The `hash` covers both the event's metadata and its data, and chains to
/// the preceding event in the store via `predecessor_hash`. It is only
/// populated on the read/observe path; write acknowledgements omit it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Identifies the originating source of publication.
    pub source: String,
    /// Absolute path of the subject this event pertains to.
    pub subject: String,
    /// Uniquely identifies the event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// The event payload.
    pub data: DataMap,
    /// CloudEvents specification version.
    #[serde(rename = "specversion")]
    pub spec_version: String,
    /// Unique event identifier assigned by the store.
    pub id: String,
    /// Publication timestamp as the raw RFC 3339 string received from the
    /// store. Kept verbatim because it participates in the hash chain;
    /// re-serializing a parsed instant could perturb verification.
    #[serde(rename = "time")]
    pub time_raw: String,
    /// The data content type, always `application/json`.
    #[serde(rename = "datacontenttype")]
    pub data_content_type: String,
    /// Hash of this event; absent on write acknowledgements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Hash of the preceding event in the store.
    #[serde(rename = "predecessorhash")]
    pub predecessor_hash: String,
}

impl Event {
    /// Parses the publication timestamp.
    pub fn time(&self) -> Result<DateTime<Utc>, ClientError> {
        DateTime::parse_from_rfc3339(&self.time_raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| ClientError::Marshalling(format!("invalid event time {:?}: {e}", self.time_raw)))
    }

    /// Verifies the integrity of this event against its stored hash.
    ///
    /// Recomputes `sha256(sha256(metadata) ++ sha256(json(data)))` where the
    /// metadata string joins `specversion|id|predecessorhash|time|source|
    /// subject|type|datacontenttype` with `|`, and compares hex digests.
    pub fn verify_hash(&self) -> Result<(), ClientError> {
        let stored = self
            .hash
            .as_deref()
            .ok_or_else(|| ClientError::Validation("event carries no hash to verify".into()))?;

        let metadata = [
            self.spec_version.as_str(),
            self.id.as_str(),
            self.predecessor_hash.as_str(),
            self.time_raw.as_str(),
            self.source.as_str(),
            self.subject.as_str(),
            self.event_type.as_str(),
            self.data_content_type.as_str(),
        ]
        .join("|");

        let data_json = serde_json::to_string(&self.data)
            .map_err(|e| ClientError::Validation(format!("failed to serialize event data for hash verification: {e}")))?;

        let computed = sha256_hex(&format!("{}{}", sha256_hex(&metadata), sha256_hex(&data_json)));
        if computed == stored {
            Ok(())
        } else {
            Err(ClientError::Validation(format!(
                "hash verification failed for event {}",
                self.id
            )))
        }
    }
}

/// Computes the lowercase hex SHA-256 digest of a string.
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// A caller-constructed event awaiting publication.
///
/// Candidates carry no identity; `id`, `time`, and the hash chain are
/// assigned by the store when the write is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCandidate {
    /// Identifies the originating source of publication.
    pub source: Source,
    /// Absolute path of the subject this event pertains to.
    pub subject: Subject,
    /// Uniquely identifies the event type.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// The event payload.
    pub data: DataMap,
    /// W3C Trace Context `traceparent` header, if tracing is enabled.
    #[serde(rename = "traceparent", default, skip_serializing_if = "Option::is_none")]
    pub trace_parent: Option<String>,
    /// W3C Trace Context `tracestate` header, if tracing is enabled.
    #[serde(rename = "tracestate", default, skip_serializing_if = "Option::is_none")]
    pub trace_state: Option<String>,
}

impl EventCandidate {
    /// Creates a candidate without tracing context.
    pub fn new(source: Source, subject: Subject, event_type: EventType, data: DataMap) -> Self {
        Self {
            source,
            subject,
            event_type,
            data,
            trace_parent: None,
            trace_state: None,
        }
    }
}
