//! The per-partition event-handling processor.
//!
//! One processor instance owns one (group, partition) pair for the process
//! lifetime. It observes the configured subject tree, filters events down to
//! its own partition by sequencing key, invokes the group's handlers strictly
//! sequentially, and checkpoints progress after every success. Handler
//! failures are retried in place per the backoff policy; exhausting the
//! budget stops the processor with the failure recorded, never skipping the
//! event.

use std::sync::{Arc, Mutex};

use eventree_client::{Client, ClientError, Event, EventStream, StoreOption};
use futures::StreamExt;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backoff::RetrySchedule;
use super::partition::PartitionKeyResolver;
use super::progress::ProgressTracker;
use super::{ErasedEventHandler, EventHandlerRegistry, GroupId, HandlerInvokeError};
use crate::config::{ProcessorSettings, StartPosition};
use crate::errors::{ConfigError, ProcessorError};
use crate::serialization::{EventData, EventDataMarshaller};

/// Lifecycle states of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Not running.
    Stopped,
    /// Establishing the event stream.
    Starting,
    /// Consuming events.
    Running,
    /// A handler failed; waiting out the backoff delay before retrying.
    FailedRetryWait,
    /// Winding down after a stop request.
    Stopping,
}

enum LoopExit {
    Shutdown,
    Fatal(ProcessorError),
}

enum ConsumeExit {
    Reconnect,
    Shutdown,
    Fatal(ProcessorError),
}

enum HandleExit {
    Done,
    Shutdown,
    Fatal(ProcessorError),
}

struct Inner {
    settings: ProcessorSettings,
    partition: u32,
    partitioner: PartitionKeyResolver,
    client: Arc<dyn Client>,
    registry: Arc<EventHandlerRegistry>,
    marshaller: Arc<dyn EventDataMarshaller>,
    progress: Arc<dyn ProgressTracker>,
    state: watch::Sender<ProcessorState>,
    last_error: Mutex<Option<ProcessorError>>,
}

/// Drives event consumption for one (group, partition).
pub struct EventHandlingProcessor {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl EventHandlingProcessor {
    /// Creates a stopped processor for the given partition index.
    pub fn new(
        settings: ProcessorSettings,
        partition: u32,
        client: Arc<dyn Client>,
        registry: Arc<EventHandlerRegistry>,
        marshaller: Arc<dyn EventDataMarshaller>,
        progress: Arc<dyn ProgressTracker>,
    ) -> Result<Self, ConfigError> {
        let partitions = *settings.partitions.as_ref();
        if partition >= partitions {
            return Err(ConfigError::PartitionOutOfRange {
                partition,
                partitions,
            });
        }
        let partitioner = PartitionKeyResolver::new(settings.partitions);
        let (state, _) = watch::channel(ProcessorState::Stopped);
        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                partition,
                partitioner,
                client,
                registry,
                marshaller,
                progress,
                state,
                last_error: Mutex::new(None),
            }),
            task: Mutex::new(None),
            shutdown: Mutex::new(None),
        })
    }

    /// The consuming group this processor belongs to.
    pub fn group(&self) -> &GroupId {
        &self.inner.settings.group
    }

    /// The partition index this processor owns.
    pub fn partition(&self) -> u32 {
        self.inner.partition
    }

    /// The group settings this processor was built from.
    pub fn settings(&self) -> &ProcessorSettings {
        &self.inner.settings
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ProcessorState {
        *self.inner.state.borrow()
    }

    /// A receiver notified on every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ProcessorState> {
        self.inner.state.subscribe()
    }

    /// The failure that stopped the processor, if it stopped on its own.
    pub fn last_error(&self) -> Option<ProcessorError> {
        self.inner
            .last_error
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }

    /// Starts consuming. Fails if the processor is already running.
    pub fn start(&self) -> Result<(), ProcessorError> {
        let mut task = self.task.lock().expect("Mutex poisoned");
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(ProcessorError::AlreadyRunning);
        }

        if let Ok(mut last_error) = self.inner.last_error.lock() {
            *last_error = None;
        }
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        if let Ok(mut shutdown) = self.shutdown.lock() {
            *shutdown = Some(shutdown_tx);
        }

        let inner = Arc::clone(&self.inner);
        info!(group = %inner.settings.group, partition = inner.partition, "starting processor");
        *task = Some(tokio::spawn(run(inner, shutdown_rx)));
        Ok(())
    }

    /// Stops consuming promptly, interrupting in-flight streaming and any
    /// backoff sleep. The checkpoint is retained.
    pub async fn stop(&self) {
        let sender = self.shutdown.lock().ok().and_then(|mut guard| guard.take());
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
        let handle = self.task.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn run(inner: Arc<Inner>, mut shutdown: oneshot::Receiver<()>) {
    inner.set_state(ProcessorState::Starting);
    match inner.event_loop(&mut shutdown).await {
        LoopExit::Shutdown => {
            inner.set_state(ProcessorState::Stopping);
            info!(
                group = %inner.settings.group,
                partition = inner.partition,
                "processor stopped"
            );
        }
        LoopExit::Fatal(err) => {
            error!(
                group = %inner.settings.group,
                partition = inner.partition,
                error = %err,
                "processor failed"
            );
            if let Ok(mut last_error) = inner.last_error.lock() {
                *last_error = Some(err);
            }
        }
    }
    inner.set_state(ProcessorState::Stopped);
}

impl Inner {
    fn set_state(&self, state: ProcessorState) {
        // send() drops the value when no receiver is subscribed; the state
        // must be observable through state() regardless.
        self.state.send_replace(state);
    }

    fn observe_options(&self, checkpoint: Option<&str>) -> Vec<StoreOption> {
        let mut options = Vec::new();
        if self.settings.recursive {
            options.push(StoreOption::Recursive);
        }
        match checkpoint {
            Some(id) => options.push(StoreOption::LowerBoundId(id.to_owned())),
            None => match &self.settings.start {
                StartPosition::Beginning => {}
                StartPosition::LowerBoundId(id) => {
                    options.push(StoreOption::LowerBoundId(id.clone()));
                }
                StartPosition::FromLatestEvent {
                    subject,
                    event_type,
                    if_event_is_missing,
                } => options.push(StoreOption::FromLatestEvent {
                    subject: subject.clone(),
                    event_type: event_type.clone(),
                    if_event_is_missing: *if_event_is_missing,
                }),
            },
        }
        options
    }

    /// Sleeps, unless shutdown arrives first. Returns `false` on shutdown.
    async fn sleep_or_shutdown(
        &self,
        delay: std::time::Duration,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> bool {
        tokio::select! {
            biased;
            _ = &mut *shutdown => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    async fn event_loop(&self, shutdown: &mut oneshot::Receiver<()>) -> LoopExit {
        loop {
            let checkpoint = match self
                .progress
                .load(&self.settings.group, self.partition)
                .await
            {
                Ok(checkpoint) => checkpoint,
                Err(e) => return LoopExit::Fatal(ProcessorError::Progress(e.to_string())),
            };
            let options = self.observe_options(checkpoint.as_deref());

            let stream = tokio::select! {
                biased;
                _ = &mut *shutdown => return LoopExit::Shutdown,
                stream = self.client.observe(&self.settings.subject, &options) => stream,
            };
            let mut stream = match stream {
                Ok(stream) => stream,
                Err(err @ ClientError::InvalidUsage(_)) => {
                    return LoopExit::Fatal(ProcessorError::Stream(err.to_string()));
                }
                Err(err) => {
                    warn!(error = %err, "could not open event stream, reconnecting");
                    if self
                        .sleep_or_shutdown(self.settings.reconnect_interval, shutdown)
                        .await
                    {
                        continue;
                    }
                    return LoopExit::Shutdown;
                }
            };

            self.set_state(ProcessorState::Running);
            debug!(
                group = %self.settings.group,
                partition = self.partition,
                checkpoint = checkpoint.as_deref().unwrap_or("none"),
                "observing events"
            );

            match self.consume(&mut stream, checkpoint, shutdown).await {
                ConsumeExit::Reconnect => {
                    if self
                        .sleep_or_shutdown(self.settings.reconnect_interval, shutdown)
                        .await
                    {
                        continue;
                    }
                    return LoopExit::Shutdown;
                }
                ConsumeExit::Shutdown => return LoopExit::Shutdown,
                ConsumeExit::Fatal(err) => return LoopExit::Fatal(err),
            }
        }
    }

    async fn consume(
        &self,
        stream: &mut EventStream,
        resume_from: Option<String>,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> ConsumeExit {
        loop {
            let item = tokio::select! {
                biased;
                _ = &mut *shutdown => return ConsumeExit::Shutdown,
                item = stream.next() => item,
            };
            let event = match item {
                // Observation never completes under normal operation.
                None => {
                    warn!("event stream ended unexpectedly, reconnecting");
                    return ConsumeExit::Reconnect;
                }
                // Undecodable or tampered stream content never heals on its
                // own; reconnecting would replay the same broken line.
                Some(Err(err @ (ClientError::Marshalling(_) | ClientError::Validation(_)))) => {
                    return ConsumeExit::Fatal(ProcessorError::NonTransient(err.to_string()));
                }
                Some(Err(err)) => {
                    warn!(error = %err, "event stream failed, reconnecting");
                    return ConsumeExit::Reconnect;
                }
                Some(Ok(event)) => event,
            };

            // The lower bound is inclusive, so the checkpointed event itself
            // is replayed on resume and must be skipped.
            if resume_from.as_deref() == Some(event.id.as_str()) {
                continue;
            }

            let key = self.settings.sequencing.resolve(&event);
            if self.partitioner.resolve(&key) != self.partition {
                continue;
            }

            let handlers = self
                .registry
                .handlers_for(&self.settings.group, &event.event_type);
            if handlers.is_empty() {
                continue;
            }

            let data = match self.marshaller.unmarshal(&event.data) {
                Ok(data) => data,
                Err(err) => return ConsumeExit::Fatal(ProcessorError::NonTransient(err.to_string())),
            };

            match self.handle_with_retry(handlers, &data, &event, shutdown).await {
                HandleExit::Done => {}
                HandleExit::Shutdown => return ConsumeExit::Shutdown,
                HandleExit::Fatal(err) => return ConsumeExit::Fatal(err),
            }

            if let Err(err) = self
                .progress
                .save(&self.settings.group, self.partition, event.id.clone())
                .await
            {
                return ConsumeExit::Fatal(ProcessorError::Progress(err.to_string()));
            }
        }
    }

    /// Invokes every handler for the event, retrying the whole set per the
    /// backoff policy until success, shutdown, or budget exhaustion. Handlers
    /// must tolerate re-invocation; delivery is at-least-once.
    async fn handle_with_retry(
        &self,
        handlers: &[Arc<dyn ErasedEventHandler>],
        data: &EventData,
        event: &Event,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> HandleExit {
        let mut schedule: RetrySchedule<'_> = self.settings.backoff.schedule();
        loop {
            let mut failure = None;
            for handler in handlers {
                match handler.handle(&data.payload, &data.metadata, event).await {
                    Ok(()) => {}
                    Err(HandlerInvokeError::NonTransient(err)) => {
                        return HandleExit::Fatal(ProcessorError::NonTransient(err.to_string()));
                    }
                    Err(HandlerInvokeError::Failed(err)) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
            let Some(err) = failure else {
                return HandleExit::Done;
            };

            self.set_state(ProcessorState::FailedRetryWait);
            match schedule.next_delay() {
                Some(delay) => {
                    warn!(
                        event_id = %event.id,
                        attempt = schedule.attempts(),
                        error = %err,
                        "handler failed, retrying after backoff"
                    );
                    if !self.sleep_or_shutdown(delay, shutdown).await {
                        return HandleExit::Shutdown;
                    }
                    self.set_state(ProcessorState::Running);
                }
                None => {
                    return HandleExit::Fatal(ProcessorError::RetriesExhausted {
                        event_id: event.id.clone(),
                        attempts: schedule.attempts(),
                        last_error: err.to_string(),
                    });
                }
            }
        }
    }
}
