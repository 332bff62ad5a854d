//! Durable progress per (group, partition).
//!
//! A processor checkpoints the id of the last successfully handled event and
//! resumes from it after a restart. Progress advances only after handler
//! success, which is what makes delivery at-least-once rather than at-most-
//! once.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use super::GroupId;

/// A progress storage failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("progress storage failed: {0}")]
pub struct ProgressError(pub String);

/// Durable key-value storage of the last handled position per
/// (group, partition).
#[async_trait]
pub trait ProgressTracker: Send + Sync {
    /// The checkpointed position, if any.
    async fn load(&self, group: &GroupId, partition: u32) -> Result<Option<String>, ProgressError>;

    /// Advances the checkpoint. Must only be called after the event at
    /// `position` was handled successfully.
    async fn save(
        &self,
        group: &GroupId,
        partition: u32,
        position: String,
    ) -> Result<(), ProgressError>;
}

/// Non-durable tracker for tests and single-process development setups.
#[derive(Clone, Default)]
pub struct InMemoryProgressTracker {
    positions: Arc<RwLock<HashMap<(GroupId, u32), String>>>,
}

impl InMemoryProgressTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressTracker for InMemoryProgressTracker {
    async fn load(&self, group: &GroupId, partition: u32) -> Result<Option<String>, ProgressError> {
        let positions = self.positions.read().expect("RwLock poisoned");
        Ok(positions.get(&(group.clone(), partition)).cloned())
    }

    async fn save(
        &self,
        group: &GroupId,
        partition: u32,
        position: String,
    ) -> Result<(), ProgressError> {
        let mut positions = self.positions.write().expect("RwLock poisoned");
        positions.insert((group.clone(), partition), position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn progress_is_scoped_per_group_and_partition() {
        let tracker = InMemoryProgressTracker::new();
        let catalog = GroupId::try_new("catalog").unwrap();
        let search = GroupId::try_new("search").unwrap();

        tracker.save(&catalog, 0, "5".into()).await.unwrap();
        tracker.save(&catalog, 1, "9".into()).await.unwrap();

        assert_eq!(tracker.load(&catalog, 0).await.unwrap(), Some("5".into()));
        assert_eq!(tracker.load(&catalog, 1).await.unwrap(), Some("9".into()));
        assert_eq!(tracker.load(&search, 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_overwrites_the_previous_checkpoint() {
        let tracker = InMemoryProgressTracker::new();
        let group = GroupId::try_new("catalog").unwrap();
        tracker.save(&group, 0, "5".into()).await.unwrap();
        tracker.save(&group, 0, "6".into()).await.unwrap();
        assert_eq!(tracker.load(&group, 0).await.unwrap(), Some("6".into()));
    }
}
