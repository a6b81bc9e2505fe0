//! Per-owner status snapshot: task counts, escalations, budget, state
//! version and queue depths.

use serde::{Deserialize, Serialize};

use super::Services;
use super::committer::StateCommitter;
use crate::domain::budget::BudgetWindow;
use crate::domain::errors::SwarmError;
use crate::domain::ids::OwnerId;
use crate::domain::task::TaskStatus;
use crate::ports::queue::{escalation_channel, review_channel, task_channel};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub review: usize,
    pub complete: usize,
    pub failed: usize,
}

impl TaskCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.review + self.complete + self.failed
    }

    fn count(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::InProgress => self.in_progress += 1,
            TaskStatus::Review => self.review += 1,
            TaskStatus::Complete => self.complete += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub owner_id: OwnerId,
    pub tasks: TaskCounts,
    /// Escalated results still waiting for a reviewer.
    pub pending_escalations: usize,
    pub budget: BudgetWindow,
    pub state_version: u64,
    pub committed: u64,
    pub task_queue_depth: usize,
    pub review_queue_depth: usize,
    pub escalation_queue_depth: usize,
}

impl StatusReport {
    pub(crate) async fn collect(
        services: &Services,
        committer: &StateCommitter,
        owner: &OwnerId,
    ) -> Result<Self, SwarmError> {
        let mut tasks = TaskCounts::default();
        for task in services.store.tasks_for_owner(owner).await? {
            tasks.count(task.status);
        }
        let pending_escalations = services.store.awaiting_review(Some(owner)).await?.len();
        let budget = services.ledger.window(owner).await?;
        let (state_version, state) = committer.read(owner).await?;

        Ok(Self {
            owner_id: owner.clone(),
            tasks,
            pending_escalations,
            budget,
            state_version,
            committed: state.commits,
            task_queue_depth: services.queue.len(&task_channel(owner)).await?,
            review_queue_depth: services.queue.len(&review_channel(owner)).await?,
            escalation_queue_depth: services.queue.len(&escalation_channel(owner)).await?,
        })
    }

    /// Nothing left for the engine to do on its own: every task is
    /// terminal or parked on a human reviewer.
    pub fn is_settled(&self) -> bool {
        self.tasks.pending == 0
            && self.tasks.in_progress == 0
            && self.tasks.review <= self.pending_escalations
            && self.review_queue_depth == 0
    }
}
