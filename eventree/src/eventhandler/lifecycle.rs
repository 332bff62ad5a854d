//! Processor lifecycle governance.
//!
//! Processors are either tied directly to the owning process
//! ([`LifecycleController`]) or gated on leadership for their partition
//! ([`LeaderElectionController`]). Leader election keeps at most one active
//! runner per (group, partition) across a cluster; a brief overlap during
//! lock handover is tolerable because checkpoint resumption is idempotent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::processor::{EventHandlingProcessor, ProcessorState};

/// A lock registry failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("lock registry failed: {0}")]
pub struct LockError(pub String);

/// Distributed lock storage used by leader election.
///
/// Implementations back this with a coordination service; correctness only
/// requires that at most one holder owns a name at a time and that ownership
/// survives until released or the holder expires.
#[async_trait]
pub trait LockRegistry: Send + Sync {
    /// Attempts to take, or re-confirm, the named lock for `holder`. Returns
    /// whether `holder` owns the lock afterwards. Must be reentrant for the
    /// current holder.
    async fn try_acquire(&self, name: &str, holder: &str) -> Result<bool, LockError>;

    /// Whether `holder` currently owns the named lock, without acquiring.
    async fn is_held_by(&self, name: &str, holder: &str) -> Result<bool, LockError>;

    /// Releases the named lock if `holder` owns it; otherwise does nothing.
    async fn release(&self, name: &str, holder: &str) -> Result<(), LockError>;
}

/// Single-process lock registry for tests and local development.
#[derive(Clone, Default)]
pub struct InMemoryLockRegistry {
    locks: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryLockRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockRegistry for InMemoryLockRegistry {
    async fn try_acquire(&self, name: &str, holder: &str) -> Result<bool, LockError> {
        let mut locks = self.locks.write().expect("RwLock poisoned");
        match locks.get(name) {
            Some(owner) => Ok(owner == holder),
            None => {
                locks.insert(name.to_owned(), holder.to_owned());
                Ok(true)
            }
        }
    }

    async fn is_held_by(&self, name: &str, holder: &str) -> Result<bool, LockError> {
        let locks = self.locks.read().expect("RwLock poisoned");
        Ok(locks.get(name).is_some_and(|owner| owner == holder))
    }

    async fn release(&self, name: &str, holder: &str) -> Result<(), LockError> {
        let mut locks = self.locks.write().expect("RwLock poisoned");
        if locks.get(name).is_some_and(|owner| owner == holder) {
            locks.remove(name);
        }
        Ok(())
    }
}

/// Starts and stops processors with the owning process, honoring each
/// processor's `auto_start` setting.
pub struct LifecycleController {
    processors: Vec<Arc<EventHandlingProcessor>>,
}

impl LifecycleController {
    /// Creates a controller over the given processors.
    pub fn new(processors: Vec<Arc<EventHandlingProcessor>>) -> Self {
        Self { processors }
    }

    /// Starts every processor configured to auto-start.
    pub fn start(&self) {
        for processor in &self.processors {
            if !processor.settings().auto_start {
                continue;
            }
            if let Err(err) = processor.start() {
                warn!(
                    group = %processor.group(),
                    partition = processor.partition(),
                    error = %err,
                    "processor not started"
                );
            }
        }
    }

    /// Stops every processor, waiting for each to wind down.
    pub async fn stop(&self) {
        for processor in &self.processors {
            processor.stop().await;
        }
    }

    /// The governed processors.
    pub fn processors(&self) -> &[Arc<EventHandlingProcessor>] {
        &self.processors
    }
}

/// Runs each governed processor only while holding the partition's lock.
///
/// Leadership is polled: each governed processor gets a task that repeatedly
/// tries to acquire `eventree/{group}/{partition}` under this controller's
/// holder id, starting the processor on acquisition and stopping it on loss.
/// A processor that stopped itself with a fatal error is not restarted while
/// the error stands.
pub struct LeaderElectionController {
    registry: Arc<dyn LockRegistry>,
    holder: String,
    poll_interval: Duration,
    tasks: Mutex<Vec<(oneshot::Sender<()>, JoinHandle<()>)>>,
}

impl LeaderElectionController {
    /// Creates a controller with a process-unique holder id and a 1s
    /// leadership poll interval.
    pub fn new(registry: Arc<dyn LockRegistry>) -> Self {
        let holder = format!("{:016x}", rand::rng().random::<u64>());
        Self {
            registry,
            holder,
            poll_interval: Duration::from_secs(1),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Overrides the leadership poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The id under which this controller competes for locks.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Places the processor under leadership governance. It starts once this
    /// controller wins its partition lock and stops when leadership is lost.
    pub fn govern(&self, processor: Arc<EventHandlingProcessor>) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(campaign(
            Arc::clone(&self.registry),
            self.holder.clone(),
            self.poll_interval,
            processor,
            shutdown_rx,
        ));
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push((shutdown_tx, task));
        }
    }

    /// Ends governance: stops all governed processors and releases their
    /// locks.
    pub async fn shutdown(&self) {
        let tasks = self
            .tasks
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default();
        for (shutdown_tx, task) in tasks {
            let _ = shutdown_tx.send(());
            let _ = task.await;
        }
    }
}

fn lock_name(processor: &EventHandlingProcessor) -> String {
    format!("eventree/{}/{}", processor.group(), processor.partition())
}

async fn campaign(
    registry: Arc<dyn LockRegistry>,
    holder: String,
    poll_interval: Duration,
    processor: Arc<EventHandlingProcessor>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let name = lock_name(&processor);
    loop {
        let leading = match registry.try_acquire(&name, &holder).await {
            Ok(leading) => leading,
            Err(err) => {
                // Leadership cannot be confirmed; err on the side of not
                // running.
                warn!(lock = %name, error = %err, "lock registry unavailable");
                false
            }
        };

        if leading {
            if processor.state() == ProcessorState::Stopped && processor.last_error().is_none() {
                info!(lock = %name, holder = %holder, "acquired leadership");
                if let Err(err) = processor.start() {
                    warn!(lock = %name, error = %err, "processor not started");
                }
            }
        } else if processor.state() != ProcessorState::Stopped {
            info!(lock = %name, holder = %holder, "lost leadership, stopping processor");
            processor.stop().await;
        }

        let keep_going = tokio::select! {
            biased;
            _ = &mut shutdown => false,
            () = tokio::time::sleep(poll_interval) => true,
        };
        if !keep_going {
            break;
        }
    }

    processor.stop().await;
    if let Err(err) = registry.release(&name, &holder).await {
        warn!(lock = %name, error = %err, "lock not released");
    }
    debug!(lock = %name, holder = %holder, "governance ended");
}
