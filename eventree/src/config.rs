//! Resolved processor configuration.
//!
//! The framework consumes plain structs assembled by the application's
//! bootstrap code; there is no configuration file or environment parsing in
//! this layer.

use std::time::Duration;

use eventree_client::{IfEventIsMissing, Subject};

use crate::eventhandler::backoff::BackoffPolicy;
use crate::eventhandler::partition::PartitionCount;
use crate::eventhandler::sequencing::EventSequenceResolver;
use crate::eventhandler::GroupId;

/// Where a processor starts when no checkpoint exists yet. A persisted
/// checkpoint always wins over this setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPosition {
    /// From the oldest event of the fetched subject tree.
    Beginning,
    /// From the given event id, inclusive.
    LowerBoundId(String),
    /// From the latest event of the given subject and type.
    FromLatestEvent {
        /// Subject of the marker event.
        subject: String,
        /// Type of the marker event.
        event_type: String,
        /// Behavior when no marker exists yet.
        if_event_is_missing: IfEventIsMissing,
    },
}

/// How processor lifecycles are governed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleMode {
    /// Start and stop with the owning process.
    #[default]
    ApplicationContext,
    /// Run only while holding leadership for the partition.
    LeaderElection,
}

/// Group-level settings shared by all of a group's partition processors.
#[derive(Clone)]
pub struct ProcessorSettings {
    /// The consuming group.
    pub group: GroupId,
    /// Root of the fetched subject tree.
    pub subject: Subject,
    /// Whether descendant subjects are included.
    pub recursive: bool,
    /// Number of partitions the group is divided into.
    pub partitions: PartitionCount,
    /// Ordering scope for events.
    pub sequencing: EventSequenceResolver,
    /// Retry behavior for failing handlers.
    pub backoff: BackoffPolicy,
    /// Starting point when no checkpoint exists.
    pub start: StartPosition,
    /// Whether processors start on construction.
    pub auto_start: bool,
    /// How processor lifecycles are governed.
    pub lifecycle: LifecycleMode,
    /// Delay before re-establishing a dropped observation stream.
    pub reconnect_interval: Duration,
}

impl ProcessorSettings {
    /// Settings with a single partition, recursive fetch, per-subject
    /// sequencing, and the default exponential backoff.
    pub fn new(group: GroupId, subject: Subject) -> Self {
        Self {
            group,
            subject,
            recursive: true,
            partitions: PartitionCount::try_new(1).unwrap_or_else(|_| unreachable!()),
            sequencing: EventSequenceResolver::PerSubject,
            backoff: BackoffPolicy::default_exponential(),
            start: StartPosition::Beginning,
            auto_start: true,
            lifecycle: LifecycleMode::ApplicationContext,
            reconnect_interval: Duration::from_secs(1),
        }
    }

    /// Sets the partition count.
    #[must_use]
    pub fn with_partitions(mut self, partitions: PartitionCount) -> Self {
        self.partitions = partitions;
        self
    }

    /// Sets the sequencing strategy.
    #[must_use]
    pub fn with_sequencing(mut self, sequencing: EventSequenceResolver) -> Self {
        self.sequencing = sequencing;
        self
    }

    /// Sets the retry backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the starting point used when no checkpoint exists.
    #[must_use]
    pub fn with_start(mut self, start: StartPosition) -> Self {
        self.start = start;
        self
    }

    /// Restricts the fetch to the subject itself, excluding descendants.
    #[must_use]
    pub const fn non_recursive(mut self) -> Self {
        self.recursive = false;
        self
    }

    /// Sets whether processors start on construction.
    #[must_use]
    pub const fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Sets the lifecycle governance mode.
    #[must_use]
    pub const fn with_lifecycle(mut self, lifecycle: LifecycleMode) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Sets the stream reconnect delay.
    #[must_use]
    pub const fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }
}
