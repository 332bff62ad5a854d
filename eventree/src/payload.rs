//! Typed event payloads.
//!
//! Application code models domain events as plain serde types implementing
//! [`EventPayload`]. The associated `EVENT_TYPE` string is the stable wire
//! identifier: publishers stamp it on candidates, and handler registries use
//! it to route persisted events back to typed code.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Free-form key/value metadata attached to events alongside the payload.
pub type MetaData = Map<String, Value>;

/// A domain event payload with a stable wire type identifier.
///
/// `EVENT_TYPE` must be unique within the application and must never change
/// for a payload type once events of that type have been persisted.
pub trait EventPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The wire identifier written as the event's `type` attribute.
    const EVENT_TYPE: &'static str;
}
