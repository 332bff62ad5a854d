//! The store client port and its HTTP implementation.

use crate::error::ClientError;
use crate::event::{Event, EventCandidate};
use crate::health::Health;
use crate::options::{self, StoreOption, OBSERVE_OPTIONS, READ_OPTIONS};
use crate::precondition::Precondition;
use crate::types::Subject;
use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// A stream of decoded events, terminated by the first transport error.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event, ClientError>> + Send>>;

/// Port interface to the remote event store.
///
/// Implemented by [`EventStoreClient`] for the HTTP wire protocol and by
/// in-memory stand-ins for tests. The client layer never retries; transport
/// and concurrency errors propagate to the caller untouched.
#[async_trait]
pub trait Client: Send + Sync {
    /// Probes the store's health endpoint.
    async fn health(&self) -> Result<Health, ClientError>;

    /// Atomically appends the candidates, provided all preconditions hold.
    ///
    /// Returns the acknowledged events in candidate order. Acknowledgements
    /// carry no `hash`; the hash only becomes available via read or observe.
    async fn write(
        &self,
        candidates: Vec<EventCandidate>,
        preconditions: Vec<Precondition>,
    ) -> Result<Vec<Event>, ClientError>;

    /// Reads the subject's events into memory.
    async fn read(&self, subject: &Subject, options: &[StoreOption]) -> Result<Vec<Event>, ClientError> {
        let mut stream = self.read_stream(subject, options).await?;
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event?);
        }
        Ok(events)
    }

    /// Reads the subject's events as a stream that completes when the store
    /// has delivered everything it currently holds.
    async fn read_stream(
        &self,
        subject: &Subject,
        options: &[StoreOption],
    ) -> Result<EventStream, ClientError>;

    /// Observes the subject's events indefinitely.
    ///
    /// The stream yields newly appended events as they arrive and never
    /// completes under normal operation; if the underlying connection ends,
    /// the final item is a [`ClientError::Transport`] and callers are
    /// expected to re-establish the observation.
    async fn observe(
        &self,
        subject: &Subject,
        options: &[StoreOption],
    ) -> Result<EventStream, ClientError>;
}

/// Configuration for [`EventStoreClient`].
#[derive(Debug, Clone)]
pub struct EventStoreClientConfig {
    /// Base URI of the store, e.g. `http://localhost:3000`.
    pub server_uri: String,
    /// Bearer token presented on every request.
    pub api_token: String,
    /// Bound on connection establishment, not on total request latency.
    pub connect_timeout: Duration,
}

impl EventStoreClientConfig {
    /// Creates a configuration with the default 10 second connect timeout.
    pub fn new(server_uri: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            server_uri: server_uri.into(),
            api_token: api_token.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Sets the connection-establishment timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// HTTP(S) implementation of the [`Client`] port.
pub struct EventStoreClient {
    http: reqwest::Client,
    base_uri: String,
    api_token: String,
}

/// Write acknowledgement as sent by the store: all event metadata, no hash.
#[derive(Debug, Deserialize)]
struct WriteAck {
    source: String,
    subject: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(rename = "specversion")]
    spec_version: String,
    id: String,
    #[serde(rename = "time")]
    time_raw: String,
    #[serde(rename = "datacontenttype")]
    data_content_type: String,
    #[serde(rename = "predecessorhash")]
    predecessor_hash: String,
}

impl EventStoreClient {
    /// Creates a client for the configured store.
    pub fn new(config: EventStoreClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            base_uri: config.server_uri.trim_end_matches('/').to_owned(),
            api_token: config.api_token,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{path}", self.base_uri))
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json")
    }

    async fn open_line_stream(
        &self,
        path: &str,
        subject: &Subject,
        options: &[StoreOption],
        endless: bool,
    ) -> Result<EventStream, ClientError> {
        let body = options::request_body(subject, options);
        debug!(%subject, path, "opening event stream");

        let response = self
            .post(path)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let mut bytes = response.bytes_stream();
        Ok(Box::pin(stream! {
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = buffer.find('\n') {
                            let line = buffer[..pos].trim().to_string();
                            buffer.drain(..=pos);
                            if line.is_empty() {
                                continue;
                            }
                            match decode_line(&line) {
                                Some(Ok(event)) => yield Ok(event),
                                Some(Err(e)) => {
                                    yield Err(e);
                                    return;
                                }
                                None => {}
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(ClientError::Transport(e.to_string()));
                        return;
                    }
                }
            }
            if endless {
                yield Err(ClientError::Transport(
                    "event observation stopped unexpectedly".into(),
                ));
            }
        }))
    }
}

/// Decodes one response line: an event, a fatal stream error, or a control
/// line to be ignored (`None`).
fn decode_line(line: &str) -> Option<Result<Event, ClientError>> {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => return Some(Err(ClientError::Marshalling(format!("undecodable stream line: {e}")))),
    };

    match value.get("type").and_then(Value::as_str) {
        Some("event") => {
            let payload = value.get("payload").cloned().unwrap_or(Value::Null);
            Some(
                serde_json::from_value::<Event>(payload)
                    .map_err(|e| ClientError::Marshalling(format!("undecodable event payload: {e}"))),
            )
        }
        Some("error") => Some(Err(ClientError::Transport(format!(
            "server reported stream error: {}",
            value.get("payload").unwrap_or(&Value::Null)
        )))),
        _ => None,
    }
}

#[async_trait]
impl Client for EventStoreClient {
    async fn health(&self) -> Result<Health, ClientError> {
        let response = self
            .http
            .get(format!("{}/api/health", self.base_uri))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Health>()
            .await
            .map_err(|e| ClientError::Marshalling(format!("undecodable health response: {e}")))
    }

    async fn write(
        &self,
        candidates: Vec<EventCandidate>,
        preconditions: Vec<Precondition>,
    ) -> Result<Vec<Event>, ClientError> {
        debug!(candidates = candidates.len(), preconditions = preconditions.len(), "writing events");

        let body = json!({
            "events": candidates,
            "preconditions": preconditions,
        });

        let response = self
            .post("/api/write-events")
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Concurrency(message));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let acks: Vec<WriteAck> = response
            .json()
            .await
            .map_err(|e| ClientError::Marshalling(format!("undecodable write response: {e}")))?;

        if acks.len() != candidates.len() {
            return Err(ClientError::Marshalling(format!(
                "write acknowledged {} events for {} candidates",
                acks.len(),
                candidates.len()
            )));
        }

        // The acknowledgement omits both hash and data; data is taken from
        // the original candidate.
        Ok(candidates
            .into_iter()
            .zip(acks)
            .map(|(candidate, ack)| Event {
                source: ack.source,
                subject: ack.subject,
                event_type: ack.event_type,
                data: candidate.data,
                spec_version: ack.spec_version,
                id: ack.id,
                time_raw: ack.time_raw,
                data_content_type: ack.data_content_type,
                hash: None,
                predecessor_hash: ack.predecessor_hash,
            })
            .collect())
    }

    async fn read_stream(
        &self,
        subject: &Subject,
        options: &[StoreOption],
    ) -> Result<EventStream, ClientError> {
        options::ensure_supported(options, &READ_OPTIONS)?;
        self.open_line_stream("/api/read-events", subject, options, false)
            .await
    }

    async fn observe(
        &self,
        subject: &Subject,
        options: &[StoreOption],
    ) -> Result<EventStream, ClientError> {
        options::ensure_supported(options, &OBSERVE_OPTIONS)?;
        self.open_line_stream("/api/observe-events", subject, options, true)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_line_yields_events() {
        let line = json!({
            "type": "event",
            "payload": {
                "source": "tag://test",
                "subject": "/books/42",
                "type": "book.added",
                "data": {"isbn": "978-3-16"},
                "specversion": "1.0",
                "id": "0",
                "time": "2026-08-27T10:15:30.000000Z",
                "datacontenttype": "application/json",
                "hash": "ab",
                "predecessorhash": "00",
            },
        })
        .to_string();

        let event = decode_line(&line).unwrap().unwrap();
        assert_eq!(event.subject, "/books/42");
        assert_eq!(event.hash.as_deref(), Some("ab"));
    }

    #[test]
    fn decode_line_ignores_control_lines() {
        assert!(decode_line(&json!({"type": "heartbeat"}).to_string()).is_none());
        assert!(decode_line(&json!({"type": "row", "payload": {}}).to_string()).is_none());
    }

    #[test]
    fn decode_line_surfaces_server_errors() {
        let line = json!({"type": "error", "payload": {"error": "boom"}}).to_string();
        assert!(matches!(
            decode_line(&line),
            Some(Err(ClientError::Transport(_)))
        ));
    }

    #[test]
    fn decode_line_rejects_garbage() {
        assert!(matches!(
            decode_line("not json"),
            Some(Err(ClientError::Marshalling(_)))
        ));
    }

    #[test]
    fn config_defaults_connect_timeout() {
        let config = EventStoreClientConfig::new("http://localhost:3000/", "secret");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));

        let config = config.with_connect_timeout(Duration::from_secs(2));
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
    }

    #[test]
    fn client_trims_trailing_slash_from_base_uri() {
        let client =
            EventStoreClient::new(EventStoreClientConfig::new("http://localhost:3000/", "secret"))
                .unwrap();
        assert_eq!(client.base_uri, "http://localhost:3000");
    }
}
