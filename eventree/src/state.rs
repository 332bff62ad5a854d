//! State rebuilding: folding a subject's event history into aggregate state.
//!
//! A [`StateRebuildingRegistry`] holds fold steps keyed by state type and
//! wire event type. The [`StateProjector`] replays persisted events through
//! the matching steps in arrival order, threading the evolving state through.
//! Persisted events with no matching step are skipped; synthetic event sets
//! used to seed tests are folded strictly so mis-wired fixtures fail fast.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::errors::CommandError;
use crate::payload::{EventPayload, MetaData};
use crate::serialization::{decode_payload, EventDataMarshaller};
use eventree_client::Event;
use serde_json::Value;

type DynState = Box<dyn Any + Send>;

trait ErasedStateHandler: Send + Sync {
    fn apply(
        &self,
        state: Option<DynState>,
        payload: &Value,
        metadata: &MetaData,
        event: &Event,
    ) -> Result<DynState, CommandError>;
}

fn downcast_state<S: Send + 'static>(state: Option<DynState>) -> Result<Option<S>, CommandError> {
    state
        .map(|boxed| {
            boxed.downcast::<S>().map(|s| *s).map_err(|_| {
                CommandError::StateRebuilding(format!(
                    "state is not of the expected type {}",
                    std::any::type_name::<S>()
                ))
            })
        })
        .transpose()
}

struct Shape<S, P, F> {
    f: F,
    _types: PhantomData<fn() -> (S, P)>,
}

impl<S, P, F> Shape<S, P, F> {
    fn boxed(f: F) -> Box<Self> {
        Box::new(Self {
            f,
            _types: PhantomData,
        })
    }
}

struct Basic<F>(F);
struct WithMetadata<F>(F);
struct WithSubject<F>(F);
struct WithRawEvent<F>(F);
struct Full<F>(F);

impl<S, P, F> ErasedStateHandler for Shape<S, P, Basic<F>>
where
    S: Send + 'static,
    P: EventPayload,
    F: Fn(Option<S>, P) -> S + Send + Sync,
{
    fn apply(
        &self,
        state: Option<DynState>,
        payload: &Value,
        _metadata: &MetaData,
        _event: &Event,
    ) -> Result<DynState, CommandError> {
        let state = downcast_state::<S>(state)?;
        let payload: P = decode_payload(payload)?;
        Ok(Box::new((self.f.0)(state, payload)))
    }
}

impl<S, P, F> ErasedStateHandler for Shape<S, P, WithMetadata<F>>
where
    S: Send + 'static,
    P: EventPayload,
    F: Fn(Option<S>, P, &MetaData) -> S + Send + Sync,
{
    fn apply(
        &self,
        state: Option<DynState>,
        payload: &Value,
        metadata: &MetaData,
        _event: &Event,
    ) -> Result<DynState, CommandError> {
        let state = downcast_state::<S>(state)?;
        let payload: P = decode_payload(payload)?;
        Ok(Box::new((self.f.0)(state, payload, metadata)))
    }
}

impl<S, P, F> ErasedStateHandler for Shape<S, P, WithSubject<F>>
where
    S: Send + 'static,
    P: EventPayload,
    F: Fn(Option<S>, P, &MetaData, &str) -> S + Send + Sync,
{
    fn apply(
        &self,
        state: Option<DynState>,
        payload: &Value,
        metadata: &MetaData,
        event: &Event,
    ) -> Result<DynState, CommandError> {
        let state = downcast_state::<S>(state)?;
        let payload: P = decode_payload(payload)?;
        Ok(Box::new((self.f.0)(state, payload, metadata, event.subject.as_str())))
    }
}

impl<S, P, F> ErasedStateHandler for Shape<S, P, WithRawEvent<F>>
where
    S: Send + 'static,
    P: EventPayload,
    F: Fn(Option<S>, P, &Event) -> S + Send + Sync,
{
    fn apply(
        &self,
        state: Option<DynState>,
        payload: &Value,
        _metadata: &MetaData,
        event: &Event,
    ) -> Result<DynState, CommandError> {
        let state = downcast_state::<S>(state)?;
        let payload: P = decode_payload(payload)?;
        Ok(Box::new((self.f.0)(state, payload, event)))
    }
}

impl<S, P, F> ErasedStateHandler for Shape<S, P, Full<F>>
where
    S: Send + 'static,
    P: EventPayload,
    F: Fn(Option<S>, P, &MetaData, &str, &Event) -> S + Send + Sync,
{
    fn apply(
        &self,
        state: Option<DynState>,
        payload: &Value,
        metadata: &MetaData,
        event: &Event,
    ) -> Result<DynState, CommandError> {
        let state = downcast_state::<S>(state)?;
        let payload: P = decode_payload(payload)?;
        Ok(Box::new((self.f.0)(
            state,
            payload,
            metadata,
            event.subject.as_str(),
            event,
        )))
    }
}

/// Fold steps for rebuilding aggregate state, keyed by `(state type, event
/// type)`.
#[derive(Default)]
pub struct StateRebuildingRegistry {
    handlers: HashMap<(TypeId, String), Box<dyn ErasedStateHandler>>,
}

impl StateRebuildingRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert<S: 'static, P: EventPayload>(&mut self, handler: Box<dyn ErasedStateHandler>) {
        self.handlers
            .insert((TypeId::of::<S>(), P::EVENT_TYPE.to_owned()), handler);
    }

    /// Registers a `(state, payload) -> state` fold step.
    pub fn register<S, P, F>(&mut self, f: F)
    where
        S: Send + 'static,
        P: EventPayload,
        F: Fn(Option<S>, P) -> S + Send + Sync + 'static,
    {
        self.insert::<S, P>(Shape::<S, P, _>::boxed(Basic(f)));
    }

    /// Registers a fold step that also receives the event's metadata.
    pub fn register_with_metadata<S, P, F>(&mut self, f: F)
    where
        S: Send + 'static,
        P: EventPayload,
        F: Fn(Option<S>, P, &MetaData) -> S + Send + Sync + 'static,
    {
        self.insert::<S, P>(Shape::<S, P, _>::boxed(WithMetadata(f)));
    }

    /// Registers a fold step that also receives metadata and the event's
    /// subject.
    pub fn register_with_subject<S, P, F>(&mut self, f: F)
    where
        S: Send + 'static,
        P: EventPayload,
        F: Fn(Option<S>, P, &MetaData, &str) -> S + Send + Sync + 'static,
    {
        self.insert::<S, P>(Shape::<S, P, _>::boxed(WithSubject(f)));
    }

    /// Registers a fold step that also receives the raw persisted event.
    pub fn register_with_raw_event<S, P, F>(&mut self, f: F)
    where
        S: Send + 'static,
        P: EventPayload,
        F: Fn(Option<S>, P, &Event) -> S + Send + Sync + 'static,
    {
        self.insert::<S, P>(Shape::<S, P, _>::boxed(WithRawEvent(f)));
    }

    /// Registers a fold step receiving metadata, subject, and the raw event.
    pub fn register_full<S, P, F>(&mut self, f: F)
    where
        S: Send + 'static,
        P: EventPayload,
        F: Fn(Option<S>, P, &MetaData, &str, &Event) -> S + Send + Sync + 'static,
    {
        self.insert::<S, P>(Shape::<S, P, _>::boxed(Full(f)));
    }

    fn get(&self, state_type: TypeId, event_type: &str) -> Option<&dyn ErasedStateHandler> {
        self.handlers
            .get(&(state_type, event_type.to_owned()))
            .map(Box::as_ref)
    }
}

/// Replays event history through registered fold steps to produce state.
#[derive(Clone)]
pub struct StateProjector {
    registry: Arc<StateRebuildingRegistry>,
    marshaller: Arc<dyn EventDataMarshaller>,
}

impl StateProjector {
    /// Creates a projector over the given registry and envelope marshaller.
    pub fn new(
        registry: Arc<StateRebuildingRegistry>,
        marshaller: Arc<dyn EventDataMarshaller>,
    ) -> Self {
        Self {
            registry,
            marshaller,
        }
    }

    fn fold<S: Send + 'static>(
        &self,
        events: &[Event],
        strict: bool,
    ) -> Result<Option<S>, CommandError> {
        let state_type = TypeId::of::<S>();
        let mut state: Option<DynState> = None;
        for event in events {
            let Some(handler) = self.registry.get(state_type, &event.event_type) else {
                if strict {
                    return Err(CommandError::StateRebuilding(format!(
                        "no fold step registered for event type {:?} and state {}",
                        event.event_type,
                        std::any::type_name::<S>()
                    )));
                }
                continue;
            };
            let data = self.marshaller.unmarshal(&event.data)?;
            state = Some(handler.apply(state, &data.payload, &data.metadata, event)?);
        }
        downcast_state::<S>(state)
    }

    /// Folds persisted history into state, skipping events with no matching
    /// fold step.
    pub fn project<S: Send + 'static>(&self, events: &[Event]) -> Result<Option<S>, CommandError> {
        self.fold(events, false)
    }

    /// Folds a synthetic event set into state, failing on any event with no
    /// matching fold step.
    pub fn project_strict<S: Send + 'static>(
        &self,
        events: &[Event],
    ) -> Result<Option<S>, CommandError> {
        self.fold(events, true)
    }
}
