//! StateCommitter: optimistic concurrency over the owner state cell.
//!
//! A commit is two steps so callers can interleave them:
//! 1. `stage`: read `(version, state)` and reduce the approved result into
//!    a new state, remembering the version it was based on.
//! 2. `apply`: compare-and-swap against that base version. If anyone
//!    committed in between, the swap fails with `StateConflict` and nothing
//!    is written.
//!
//! No lock is held between the two.
//!
//! A task lands in the owner state at most once: `stage` refuses with
//! `AlreadyCommitted` when the reducer already holds the result's task.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::errors::SwarmError;
use crate::domain::ids::{OwnerId, ResultId, TaskId};
use crate::domain::result::TaskResult;
use crate::domain::task::Payload;
use crate::ports::QueueService;

/// Folds an approved result into the owner's serialized state.
pub trait StateReducer: Send + Sync {
    fn reduce(&self, current: Option<&[u8]>, result: &TaskResult) -> Result<Vec<u8>, SwarmError>;

    /// Whether `current` already holds a commit for `task`. Reducers that
    /// cannot tell answer `false`.
    fn has_committed(&self, _current: Option<&[u8]>, _task: TaskId) -> Result<bool, SwarmError> {
        Ok(false)
    }
}

/// Owner state kept by `RecordingReducer`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OwnerState {
    /// Committed artifact per task id.
    pub artifacts: BTreeMap<String, Payload>,
    pub committed_cost: f64,
    pub commits: u64,
}

impl OwnerState {
    pub fn decode(bytes: Option<&[u8]>) -> Result<Self, SwarmError> {
        match bytes {
            Some(b) => Ok(serde_json::from_slice(b)?),
            None => Ok(Self::default()),
        }
    }
}

/// Records each artifact under its task id and accumulates committed cost.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordingReducer;

impl StateReducer for RecordingReducer {
    fn reduce(&self, current: Option<&[u8]>, result: &TaskResult) -> Result<Vec<u8>, SwarmError> {
        let mut state = OwnerState::decode(current)?;
        state
            .artifacts
            .insert(result.task_id.to_string(), result.artifact.clone());
        state.committed_cost += result.cost;
        state.commits += 1;
        Ok(serde_json::to_vec(&state)?)
    }

    fn has_committed(&self, current: Option<&[u8]>, task: TaskId) -> Result<bool, SwarmError> {
        Ok(OwnerState::decode(current)?
            .artifacts
            .contains_key(&task.to_string()))
    }
}

/// An update computed against `base_version`, not yet written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedCommit {
    pub owner_id: OwnerId,
    pub result_id: ResultId,
    pub base_version: u64,
    pub state: Vec<u8>,
}

#[derive(Clone)]
pub struct StateCommitter {
    queue: Arc<dyn QueueService>,
    reducer: Arc<dyn StateReducer>,
}

impl StateCommitter {
    pub fn new(queue: Arc<dyn QueueService>, reducer: Arc<dyn StateReducer>) -> Self {
        Self { queue, reducer }
    }

    pub async fn stage(
        &self,
        owner: &OwnerId,
        result: &TaskResult,
    ) -> Result<StagedCommit, SwarmError> {
        let current = self.queue.read_state(owner).await?;
        if self.reducer.has_committed(current.state.as_deref(), result.task_id)? {
            return Err(SwarmError::AlreadyCommitted(result.task_id));
        }
        let state = self.reducer.reduce(current.state.as_deref(), result)?;
        Ok(StagedCommit {
            owner_id: owner.clone(),
            result_id: result.id,
            base_version: current.version,
            state,
        })
    }

    /// Returns the new version.
    pub async fn apply(&self, staged: StagedCommit) -> Result<u64, SwarmError> {
        let version = self
            .queue
            .compare_and_swap(&staged.owner_id, staged.base_version, staged.state)
            .await?;
        tracing::debug!(
            owner = %staged.owner_id,
            result = %staged.result_id,
            version,
            "state committed"
        );
        Ok(version)
    }

    pub async fn commit(&self, owner: &OwnerId, result: &TaskResult) -> Result<u64, SwarmError> {
        let staged = self.stage(owner, result).await?;
        self.apply(staged).await
    }

    pub async fn read(&self, owner: &OwnerId) -> Result<(u64, OwnerState), SwarmError> {
        let current = self.queue.read_state(owner).await?;
        Ok((current.version, OwnerState::decode(current.state.as_deref())?))
    }
}
