//! The event data envelope.
//!
//! The framework stores each event's `data` map as a two-key envelope,
//! `{"metadata": {...}, "payload": {...}}`, so that per-event metadata
//! travels with the payload without polluting its namespace. An
//! [`EventDataMarshaller`] converts between the envelope and its parts;
//! failures are non-transient and never retried.

use crate::payload::{EventPayload, MetaData};
use eventree_client::event::DataMap;
use serde_json::Value;
use thiserror::Error;

const METADATA_KEY: &str = "metadata";
const PAYLOAD_KEY: &str = "payload";

/// A serialization failure. Fatal for the operation that hit it.
#[derive(Debug, Error)]
pub enum MarshalError {
    /// Encoding a payload or envelope failed.
    #[error("failed to encode event data: {0}")]
    Encode(String),

    /// A persisted envelope or payload could not be decoded.
    #[error("failed to decode event data: {0}")]
    Decode(String),
}

/// The decoded parts of an event's data envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventData {
    /// Per-event metadata.
    pub metadata: MetaData,
    /// The raw payload, not yet bound to a payload type.
    pub payload: Value,
}

/// Converts between the stored `data` map and the metadata/payload envelope.
pub trait EventDataMarshaller: Send + Sync {
    /// Builds the `data` map to store for the given parts.
    fn marshal(&self, metadata: &MetaData, payload: &Value) -> Result<DataMap, MarshalError>;

    /// Splits a stored `data` map back into its parts.
    fn unmarshal(&self, data: &DataMap) -> Result<EventData, MarshalError>;
}

/// The default, serde_json-backed envelope marshaller.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventDataMarshaller;

impl EventDataMarshaller for JsonEventDataMarshaller {
    fn marshal(&self, metadata: &MetaData, payload: &Value) -> Result<DataMap, MarshalError> {
        let mut data = DataMap::new();
        data.insert(METADATA_KEY.into(), Value::Object(metadata.clone()));
        data.insert(PAYLOAD_KEY.into(), payload.clone());
        Ok(data)
    }

    fn unmarshal(&self, data: &DataMap) -> Result<EventData, MarshalError> {
        let metadata = match data.get(METADATA_KEY) {
            None | Some(Value::Null) => MetaData::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(MarshalError::Decode(format!(
                    "envelope metadata is not an object: {other}"
                )));
            }
        };
        let payload = data
            .get(PAYLOAD_KEY)
            .cloned()
            .ok_or_else(|| MarshalError::Decode("envelope carries no payload".into()))?;
        Ok(EventData { metadata, payload })
    }
}

/// Encodes a typed payload to its raw JSON form.
pub fn encode_payload<P: EventPayload>(payload: &P) -> Result<Value, MarshalError> {
    serde_json::to_value(payload).map_err(|e| {
        MarshalError::Encode(format!("payload of type {}: {e}", P::EVENT_TYPE))
    })
}

/// Decodes a raw JSON payload into its typed form.
pub fn decode_payload<P: EventPayload>(payload: &Value) -> Result<P, MarshalError> {
    serde_json::from_value(payload.clone()).map_err(|e| {
        MarshalError::Decode(format!("payload of type {}: {e}", P::EVENT_TYPE))
    })
}
