//! QueueService port.
//!
//! Ordered, at-least-once channels plus a per-owner versioned state cell.
//! The channel side carries ids only; records live in the `TaskStore`.
//! The state cell is what the committer compare-and-swaps against, so every
//! engine instance sharing one `QueueService` sees the same versions.
//!
//! Transport failures are reported as `SwarmError::QueueUnavailable`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::errors::SwarmError;
use crate::domain::ids::OwnerId;

/// Owner state as read at a given version. `state` is `None` until the
/// first successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedState {
    pub version: u64,
    pub state: Option<Vec<u8>>,
}

#[async_trait]
pub trait QueueService: Send + Sync {
    /// Append to the tail of `channel`.
    async fn push(&self, channel: &str, item: Vec<u8>) -> Result<(), SwarmError>;

    /// Take the oldest item, waiting at most `timeout`. `Ok(None)` on timeout.
    async fn pop(&self, channel: &str, timeout: Duration) -> Result<Option<Vec<u8>>, SwarmError>;

    async fn len(&self, channel: &str) -> Result<usize, SwarmError>;

    async fn get_version(&self, owner: &OwnerId) -> Result<u64, SwarmError>;

    /// Bump the owner's version and return the new value.
    async fn increment_version(&self, owner: &OwnerId) -> Result<u64, SwarmError>;

    async fn read_state(&self, owner: &OwnerId) -> Result<VersionedState, SwarmError>;

    /// Replace the owner's state if its version is still `expected`.
    /// Returns the new version, or `StateConflict` without writing.
    async fn compare_and_swap(
        &self,
        owner: &OwnerId,
        expected: u64,
        state: Vec<u8>,
    ) -> Result<u64, SwarmError>;
}

/// JSON helpers over any `QueueService`.
#[async_trait]
pub trait QueueExt: QueueService {
    async fn push_json<T>(&self, channel: &str, item: &T) -> Result<(), SwarmError>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(item)?;
        self.push(channel, bytes).await
    }

    async fn pop_json<T>(&self, channel: &str, timeout: Duration) -> Result<Option<T>, SwarmError>
    where
        T: DeserializeOwned + Send,
    {
        match self.pop(channel, timeout).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl<Q: QueueService + ?Sized> QueueExt for Q {}

/// Channel carrying `TaskId`s waiting for an executor.
pub fn task_channel(owner: &OwnerId) -> String {
    format!("agent:{owner}:tasks")
}

/// Channel carrying `ResultId`s waiting for the validator.
pub fn review_channel(owner: &OwnerId) -> String {
    format!("agent:{owner}:review")
}

/// Append-only channel of `EscalationRecord`s for human reviewers.
pub fn escalation_channel(owner: &OwnerId) -> String {
    format!("agent:{owner}:escalations")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_are_scoped_per_owner() {
        let owner = OwnerId::new("test_agent_001");
        assert_eq!(task_channel(&owner), "agent:test_agent_001:tasks");
        assert_eq!(review_channel(&owner), "agent:test_agent_001:review");
        assert_eq!(escalation_channel(&owner), "agent:test_agent_001:escalations");
    }
}
