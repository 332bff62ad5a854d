//! Continuous, partitioned event consumption.
//!
//! Handlers are grouped: each group consumes the stream independently with
//! its own partitioning, retry policy, and progress. Within a group, events
//! are distributed across partitions by sequencing key, and each partition is
//! driven by one [`processor::EventHandlingProcessor`].

pub mod backoff;
pub mod lifecycle;
pub mod partition;
pub mod processor;
pub mod progress;
pub mod sequencing;

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use nutype::nutype;
use serde_json::Value;

use crate::payload::{EventPayload, MetaData};
use crate::serialization::{decode_payload, MarshalError};
use eventree_client::Event;

/// Names a consuming group. Groups track progress and partition work
/// independently of each other.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(Debug, Clone, PartialEq, Eq, Hash, AsRef, Deref, Display, Serialize, Deserialize)
)]
pub struct GroupId(String);

/// Failure raised by an event handler body. Retried per the group's backoff
/// policy.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Internal result of invoking an erased handler: serialization problems are
/// fatal, handler failures are retryable.
pub(crate) enum HandlerInvokeError {
    NonTransient(MarshalError),
    Failed(HandlerError),
}

#[async_trait]
pub(crate) trait ErasedEventHandler: Send + Sync {
    async fn handle(
        &self,
        payload: &Value,
        metadata: &MetaData,
        event: &Event,
    ) -> Result<(), HandlerInvokeError>;
}

struct PayloadOnly<P, F> {
    f: F,
    _payload: PhantomData<fn() -> P>,
}

#[async_trait]
impl<P, F> ErasedEventHandler for PayloadOnly<P, F>
where
    P: EventPayload,
    F: Fn(P) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync,
{
    async fn handle(
        &self,
        payload: &Value,
        _metadata: &MetaData,
        _event: &Event,
    ) -> Result<(), HandlerInvokeError> {
        let payload: P = decode_payload(payload).map_err(HandlerInvokeError::NonTransient)?;
        (self.f)(payload).await.map_err(HandlerInvokeError::Failed)
    }
}

struct WithMetadata<P, F> {
    f: F,
    _payload: PhantomData<fn() -> P>,
}

#[async_trait]
impl<P, F> ErasedEventHandler for WithMetadata<P, F>
where
    P: EventPayload,
    F: Fn(P, MetaData) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync,
{
    async fn handle(
        &self,
        payload: &Value,
        metadata: &MetaData,
        _event: &Event,
    ) -> Result<(), HandlerInvokeError> {
        let payload: P = decode_payload(payload).map_err(HandlerInvokeError::NonTransient)?;
        (self.f)(payload, metadata.clone())
            .await
            .map_err(HandlerInvokeError::Failed)
    }
}

struct WithContext<P, F> {
    f: F,
    _payload: PhantomData<fn() -> P>,
}

#[async_trait]
impl<P, F> ErasedEventHandler for WithContext<P, F>
where
    P: EventPayload,
    F: Fn(P, MetaData, Event) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync,
{
    async fn handle(
        &self,
        payload: &Value,
        metadata: &MetaData,
        event: &Event,
    ) -> Result<(), HandlerInvokeError> {
        let payload: P = decode_payload(payload).map_err(HandlerInvokeError::NonTransient)?;
        (self.f)(payload, metadata.clone(), event.clone())
            .await
            .map_err(HandlerInvokeError::Failed)
    }
}

/// Event handlers per group, keyed by wire event type. Multiple handlers may
/// subscribe to the same event type within one group; all of them run for
/// each matching event.
#[derive(Default)]
pub struct EventHandlerRegistry {
    handlers: HashMap<(GroupId, String), Vec<Arc<dyn ErasedEventHandler>>>,
}

impl EventHandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn push<P: EventPayload>(&mut self, group: &GroupId, handler: Arc<dyn ErasedEventHandler>) {
        self.handlers
            .entry((group.clone(), P::EVENT_TYPE.to_owned()))
            .or_default()
            .push(handler);
    }

    /// Registers a `(payload) -> result` handler.
    pub fn register<P, F, Fut>(&mut self, group: &GroupId, f: F)
    where
        P: EventPayload,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.push::<P>(
            group,
            Arc::new(PayloadOnly::<P, _> {
                f: move |payload| Box::pin(f(payload)) as BoxFuture<'static, _>,
                _payload: PhantomData,
            }),
        );
    }

    /// Registers a `(payload, metadata) -> result` handler.
    pub fn register_with_metadata<P, F, Fut>(&mut self, group: &GroupId, f: F)
    where
        P: EventPayload,
        F: Fn(P, MetaData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.push::<P>(
            group,
            Arc::new(WithMetadata::<P, _> {
                f: move |payload, metadata| {
                    Box::pin(f(payload, metadata)) as BoxFuture<'static, _>
                },
                _payload: PhantomData,
            }),
        );
    }

    /// Registers a `(payload, metadata, raw event) -> result` handler.
    pub fn register_with_context<P, F, Fut>(&mut self, group: &GroupId, f: F)
    where
        P: EventPayload,
        F: Fn(P, MetaData, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.push::<P>(
            group,
            Arc::new(WithContext::<P, _> {
                f: move |payload, metadata, event| {
                    Box::pin(f(payload, metadata, event)) as BoxFuture<'static, _>
                },
                _payload: PhantomData,
            }),
        );
    }

    pub(crate) fn handlers_for(
        &self,
        group: &GroupId,
        event_type: &str,
    ) -> &[Arc<dyn ErasedEventHandler>] {
        self.handlers
            .get(&(group.clone(), event_type.to_owned()))
            .map_or(&[], Vec::as_slice)
    }
}
