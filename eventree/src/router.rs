//! Command dispatch.
//!
//! The router owns the full dispatch protocol: source the subject's events
//! per the handler's sourcing mode, rebuild state, enforce the subject
//! condition as a local fast path, invoke the handler, and write the captured
//! events in one atomic batch guarded by preconditions that make the store
//! the final arbiter of concurrent dispatches. The router never retries;
//! concurrency errors propagate so the caller can re-read and re-decide.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use eventree_client::{
    Client, Event, EventCandidate, EventEnricher, NoTracingEnricher, Precondition, Source,
    StoreOption, Subject,
};
use tracing::{debug, warn};

use crate::command::{
    CapturedEvent, Command, CommandEventPublisher, CommandHandler, CommandHandlerDefinition,
    SourcingMode, SubjectCondition,
};
use crate::errors::CommandError;
use crate::payload::MetaData;
use crate::serialization::{EventDataMarshaller, JsonEventDataMarshaller};
use crate::state::{StateProjector, StateRebuildingRegistry};

struct RouterContext {
    client: Arc<dyn Client>,
    source: Source,
    enricher: Arc<dyn EventEnricher>,
    marshaller: Arc<dyn EventDataMarshaller>,
    projector: StateProjector,
}

#[async_trait]
trait ErasedCommandHandler: Send + Sync {
    async fn dispatch(
        &self,
        ctx: &RouterContext,
        command: &(dyn Any + Send + Sync),
        metadata: &MetaData,
    ) -> Result<Box<dyn Any + Send>, CommandError>;
}

struct TypedHandler<S, C, R> {
    definition: CommandHandlerDefinition<S, C, R>,
}

/// Finds the id of the most recent event published exactly for the subject.
fn latest_exact_event<'a>(events: &'a [Event], subject: &Subject) -> Option<&'a Event> {
    events.iter().rev().find(|e| e.subject == subject.as_str())
}

fn push_unique(preconditions: &mut Vec<Precondition>, candidate: Precondition) {
    if !preconditions.contains(&candidate) {
        preconditions.push(candidate);
    }
}

#[async_trait]
impl<S, C, R> ErasedCommandHandler for TypedHandler<S, C, R>
where
    S: Send + 'static,
    C: Command + 'static,
    R: Send + 'static,
{
    async fn dispatch(
        &self,
        ctx: &RouterContext,
        command: &(dyn Any + Send + Sync),
        metadata: &MetaData,
    ) -> Result<Box<dyn Any + Send>, CommandError> {
        let command = command.downcast_ref::<C>().ok_or_else(|| {
            CommandError::Handler("registered handler does not match the command type".into())
        })?;
        let subject = command.subject();
        let condition = command.subject_condition();
        let sourcing = self.definition.sourcing_mode;

        let events = match sourcing {
            SourcingMode::None => Vec::new(),
            SourcingMode::Local => ctx.client.read(&subject, &[]).await?,
            SourcingMode::Recursive => {
                ctx.client.read(&subject, &[StoreOption::Recursive]).await?
            }
        };
        debug!(%subject, sourced = events.len(), "dispatching command");

        // Local fast path; the store re-checks via preconditions below.
        if sourcing != SourcingMode::None {
            let exists = latest_exact_event(&events, &subject).is_some();
            match condition {
                SubjectCondition::Pristine if exists => {
                    return Err(CommandError::SubjectAlreadyExists(
                        subject.as_ref().to_owned(),
                    ));
                }
                SubjectCondition::Exists if !exists => {
                    return Err(CommandError::SubjectDoesNotExist(
                        subject.as_ref().to_owned(),
                    ));
                }
                _ => {}
            }
        }

        let mut publisher = CommandEventPublisher::new(subject.clone(), metadata.clone());
        let result: R = match &self.definition.handler {
            CommandHandler::CommandOnly(f) => f(command, &mut publisher)?,
            CommandHandler::Sourced(f) => {
                let state: Option<S> = ctx.projector.project(&events)?;
                f(state.as_ref(), command, &mut publisher)?
            }
            CommandHandler::SourcedWithMetadata(f) => {
                let state: Option<S> = ctx.projector.project(&events)?;
                f(state.as_ref(), command, metadata, &mut publisher)?
            }
        };

        let (captured, extra) = publisher.into_parts();
        if captured.is_empty() {
            debug!(%subject, "command handler published no events, skipping write");
            return Ok(Box::new(result));
        }

        let mut preconditions = Vec::new();
        match condition {
            SubjectCondition::Pristine => push_unique(
                &mut preconditions,
                Precondition::SubjectIsPristine {
                    subject: subject.as_ref().to_owned(),
                },
            ),
            SubjectCondition::Exists => push_unique(
                &mut preconditions,
                Precondition::SubjectIsPopulated {
                    subject: subject.as_ref().to_owned(),
                },
            ),
            SubjectCondition::None => {}
        }
        // Guard the sourced state: another write to the subject between
        // sourcing and commit invalidates the decision the handler just made.
        if sourcing != SourcingMode::None {
            let guard = match latest_exact_event(&events, &subject) {
                Some(latest) => Precondition::SubjectIsOnEventId {
                    subject: subject.as_ref().to_owned(),
                    event_id: latest.id.clone(),
                },
                None => Precondition::SubjectIsPristine {
                    subject: subject.as_ref().to_owned(),
                },
            };
            push_unique(&mut preconditions, guard);
        }
        for precondition in extra {
            push_unique(&mut preconditions, precondition);
        }

        let candidates = captured
            .into_iter()
            .map(|captured| to_candidate(ctx, captured))
            .collect::<Result<Vec<_>, _>>()?;

        match ctx.client.write(candidates, preconditions).await {
            Ok(written) => {
                debug!(%subject, written = written.len(), "command events written");
                Ok(Box::new(result))
            }
            Err(err) => {
                let err = CommandError::from(err);
                if matches!(err, CommandError::Concurrency(_)) {
                    warn!(%subject, %err, "write rejected by store precondition");
                }
                Err(err)
            }
        }
    }
}

fn to_candidate(
    ctx: &RouterContext,
    captured: CapturedEvent,
) -> Result<EventCandidate, CommandError> {
    let data = ctx.marshaller.marshal(&captured.metadata, &captured.payload)?;
    let candidate = EventCandidate::new(
        ctx.source.clone(),
        captured.subject,
        captured.event_type,
        data,
    );
    Ok(ctx.enricher.enrich(candidate))
}

/// Routes commands to their registered handler definitions.
pub struct CommandRouter {
    ctx: RouterContext,
    handlers: HashMap<TypeId, Box<dyn ErasedCommandHandler>>,
}

impl CommandRouter {
    /// Starts building a router over the given store client and event source.
    pub fn builder(client: Arc<dyn Client>, source: Source) -> CommandRouterBuilder {
        CommandRouterBuilder {
            client,
            source,
            enricher: Arc::new(NoTracingEnricher),
            marshaller: Arc::new(JsonEventDataMarshaller),
            state_registry: StateRebuildingRegistry::new(),
            handlers: HashMap::new(),
        }
    }

    /// Dispatches a command with empty metadata.
    pub async fn send<C, R>(&self, command: &C) -> Result<R, CommandError>
    where
        C: Command + 'static,
        R: Send + 'static,
    {
        self.send_with_metadata(command, &MetaData::new()).await
    }

    /// Dispatches a command; the metadata is handed to the handler and stored
    /// with every event it publishes.
    pub async fn send_with_metadata<C, R>(
        &self,
        command: &C,
        metadata: &MetaData,
    ) -> Result<R, CommandError>
    where
        C: Command + 'static,
        R: Send + 'static,
    {
        let handler = self.handlers.get(&TypeId::of::<C>()).ok_or_else(|| {
            CommandError::NoHandlerRegistered(std::any::type_name::<C>().to_owned())
        })?;
        let result = handler.dispatch(&self.ctx, command, metadata).await?;
        result.downcast::<R>().map(|boxed| *boxed).map_err(|_| {
            CommandError::Handler(format!(
                "handler result does not match the requested type {}",
                std::any::type_name::<R>()
            ))
        })
    }
}

/// Builder for [`CommandRouter`].
pub struct CommandRouterBuilder {
    client: Arc<dyn Client>,
    source: Source,
    enricher: Arc<dyn EventEnricher>,
    marshaller: Arc<dyn EventDataMarshaller>,
    state_registry: StateRebuildingRegistry,
    handlers: HashMap<TypeId, Box<dyn ErasedCommandHandler>>,
}

impl CommandRouterBuilder {
    /// Replaces the candidate enricher applied before every write.
    #[must_use]
    pub fn with_enricher(mut self, enricher: Arc<dyn EventEnricher>) -> Self {
        self.enricher = enricher;
        self
    }

    /// Replaces the event data envelope marshaller.
    #[must_use]
    pub fn with_marshaller(mut self, marshaller: Arc<dyn EventDataMarshaller>) -> Self {
        self.marshaller = marshaller;
        self
    }

    /// Installs the state rebuilding registry used for sourcing.
    #[must_use]
    pub fn with_state_registry(mut self, registry: StateRebuildingRegistry) -> Self {
        self.state_registry = registry;
        self
    }

    /// Registers the handler definition for command type `C`. A later
    /// registration for the same command type replaces the earlier one.
    #[must_use]
    pub fn register<S, C, R>(mut self, definition: CommandHandlerDefinition<S, C, R>) -> Self
    where
        S: Send + 'static,
        C: Command + 'static,
        R: Send + 'static,
    {
        self.handlers
            .insert(TypeId::of::<C>(), Box::new(TypedHandler { definition }));
        self
    }

    /// Finishes the router.
    pub fn build(self) -> CommandRouter {
        let projector = StateProjector::new(Arc::new(self.state_registry), self.marshaller.clone());
        CommandRouter {
            ctx: RouterContext {
                client: self.client,
                source: self.source,
                enricher: self.enricher,
                marshaller: self.marshaller,
                projector,
            },
            handlers: self.handlers,
        }
    }
}
