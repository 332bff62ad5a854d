//! Commands, command handlers, and the publishing capability handed to them.
//!
//! A command names the subject it operates on and the condition that subject
//! must satisfy. The matching handler is invoked with rebuilt state and emits
//! zero or more events through a [`CommandEventPublisher`]; nothing is
//! persisted until dispatch writes the captured batch atomically.

use crate::errors::CommandError;
use crate::payload::{EventPayload, MetaData};
use crate::serialization::encode_payload;
use eventree_client::{EventType, Precondition, Subject};
use serde_json::Value;

/// The existence check a command imposes on its subject.
///
/// The check runs twice: as a local fast path against sourced events before
/// the handler is invoked, and authoritatively by the store via a matching
/// precondition attached to the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubjectCondition {
    /// No existence check.
    #[default]
    None,
    /// The subject must hold no events yet.
    Pristine,
    /// The subject must hold at least one event.
    Exists,
}

/// Which events are fetched to rebuild state before a handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourcingMode {
    /// No events are fetched; the handler sees no state.
    None,
    /// Only events published exactly for the command's subject.
    Local,
    /// The subject's whole subtree.
    #[default]
    Recursive,
}

/// A request to change the state of one subject.
pub trait Command: Send + Sync {
    /// The subject this command operates on.
    fn subject(&self) -> Subject;

    /// The existence condition imposed on the subject.
    fn subject_condition(&self) -> SubjectCondition {
        SubjectCondition::None
    }
}

/// An event emitted by a command handler, captured prior to persistence.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    /// Subject the event will be published for.
    pub subject: Subject,
    /// Wire type identifier of the payload.
    pub event_type: EventType,
    /// The raw payload.
    pub payload: Value,
    /// Metadata stored alongside the payload.
    pub metadata: MetaData,
}

/// Capability through which a command handler emits events.
///
/// Supports publishing to the command's own subject, to arbitrary absolute
/// subjects, and to subjects relative to the command's subject. Handlers may
/// also attach additional store preconditions for cross-subject consistency.
pub struct CommandEventPublisher {
    base: Subject,
    default_metadata: MetaData,
    captured: Vec<CapturedEvent>,
    preconditions: Vec<Precondition>,
}

impl CommandEventPublisher {
    pub(crate) fn new(base: Subject, default_metadata: MetaData) -> Self {
        Self {
            base,
            default_metadata,
            captured: Vec::new(),
            preconditions: Vec::new(),
        }
    }

    fn capture<P: EventPayload>(
        &mut self,
        subject: Subject,
        payload: &P,
        metadata: MetaData,
    ) -> Result<(), CommandError> {
        let event_type = EventType::try_new(P::EVENT_TYPE)
            .map_err(|e| CommandError::InvalidEventType(e.to_string()))?;
        let payload = encode_payload(payload)?;
        self.captured.push(CapturedEvent {
            subject,
            event_type,
            payload,
            metadata,
        });
        Ok(())
    }

    /// Publishes a payload for the command's subject, carrying the dispatch
    /// metadata.
    pub fn publish<P: EventPayload>(&mut self, payload: &P) -> Result<(), CommandError> {
        let subject = self.base.clone();
        let metadata = self.default_metadata.clone();
        self.capture(subject, payload, metadata)
    }

    /// Publishes a payload for the command's subject with explicit metadata.
    pub fn publish_with_metadata<P: EventPayload>(
        &mut self,
        payload: &P,
        metadata: MetaData,
    ) -> Result<(), CommandError> {
        let subject = self.base.clone();
        self.capture(subject, payload, metadata)
    }

    /// Publishes a payload for an arbitrary absolute subject.
    pub fn publish_to<P: EventPayload>(
        &mut self,
        subject: Subject,
        payload: &P,
    ) -> Result<(), CommandError> {
        let metadata = self.default_metadata.clone();
        self.capture(subject, payload, metadata)
    }

    /// Publishes a payload for a descendant of the command's subject.
    pub fn publish_relative<P: EventPayload>(
        &mut self,
        relative: &str,
        payload: &P,
    ) -> Result<(), CommandError> {
        let subject = self
            .base
            .join(relative)
            .map_err(|e| CommandError::InvalidSubject(format!("{relative:?}: {e}")))?;
        let metadata = self.default_metadata.clone();
        self.capture(subject, payload, metadata)
    }

    /// Attaches an additional precondition to the write batch.
    pub fn require(&mut self, precondition: Precondition) {
        self.preconditions.push(precondition);
    }

    pub(crate) fn into_parts(self) -> (Vec<CapturedEvent>, Vec<Precondition>) {
        (self.captured, self.preconditions)
    }
}

/// The business-logic function of a command handler.
///
/// Exactly one shape applies per handler: plain, state-sourced, or
/// state-sourced with access to the dispatch metadata. `S` is the aggregate
/// state type, `C` the command type, `R` the result returned to the caller.
#[allow(clippy::type_complexity)]
pub enum CommandHandler<S, C, R> {
    /// `(command, publisher) -> result`
    CommandOnly(Box<dyn Fn(&C, &mut CommandEventPublisher) -> Result<R, CommandError> + Send + Sync>),
    /// `(state, command, publisher) -> result`
    Sourced(
        Box<dyn Fn(Option<&S>, &C, &mut CommandEventPublisher) -> Result<R, CommandError> + Send + Sync>,
    ),
    /// `(state, command, metadata, publisher) -> result`
    SourcedWithMetadata(
        Box<
            dyn Fn(Option<&S>, &C, &MetaData, &mut CommandEventPublisher) -> Result<R, CommandError>
                + Send
                + Sync,
        >,
    ),
}

/// A registered command handler plus its sourcing configuration.
pub struct CommandHandlerDefinition<S, C, R> {
    /// How state is sourced before the handler runs.
    pub sourcing_mode: SourcingMode,
    /// The handler body.
    pub handler: CommandHandler<S, C, R>,
}

impl<S, C, R> CommandHandlerDefinition<S, C, R> {
    /// Defines a handler that ignores prior state.
    pub fn command_only<F>(f: F) -> Self
    where
        F: Fn(&C, &mut CommandEventPublisher) -> Result<R, CommandError> + Send + Sync + 'static,
    {
        Self {
            sourcing_mode: SourcingMode::None,
            handler: CommandHandler::CommandOnly(Box::new(f)),
        }
    }

    /// Defines a handler over rebuilt state, sourcing recursively by default.
    pub fn sourced<F>(f: F) -> Self
    where
        F: Fn(Option<&S>, &C, &mut CommandEventPublisher) -> Result<R, CommandError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            sourcing_mode: SourcingMode::Recursive,
            handler: CommandHandler::Sourced(Box::new(f)),
        }
    }

    /// Defines a handler over rebuilt state with access to the dispatch
    /// metadata, sourcing recursively by default.
    pub fn sourced_with_metadata<F>(f: F) -> Self
    where
        F: Fn(Option<&S>, &C, &MetaData, &mut CommandEventPublisher) -> Result<R, CommandError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            sourcing_mode: SourcingMode::Recursive,
            handler: CommandHandler::SourcedWithMetadata(Box::new(f)),
        }
    }

    /// Overrides the sourcing mode.
    #[must_use]
    pub fn with_sourcing_mode(mut self, mode: SourcingMode) -> Self {
        self.sourcing_mode = mode;
        self
    }
}
