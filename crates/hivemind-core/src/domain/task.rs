//! Task record and its state machine.
//!
//! State transitions:
//! - Pending -> InProgress -> Review -> Complete
//! - Review -> Pending (rejected, or tagged `state_conflict` after an OCC miss)
//! - Review -> Failed (retry budget exhausted, or cancelled)
//! - InProgress -> InProgress, Review -> InProgress (redelivery after a crash)
//! - Pending -> Failed, InProgress -> Failed (cancellation; a pending task
//!   whose id never reached its channel fails as `not_queued`)
//!
//! Complete and Failed are terminal. Every transition goes through
//! `Task::transition`, so an illegal move surfaces as `InvalidTransition`
//! instead of corrupting the record. Callers mutate tasks only inside a
//! `TaskStore::update_task` closure, which makes check-and-transition atomic
//! against concurrent executors and validators.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::SwarmError;
use super::ids::{ExecutorId, OwnerId, TaskId};

/// Opaque payload owned by the skill layer.
pub type Payload = serde_json::Value;

/// Default for `Task::max_retries`.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Which skill executes a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    GenerateCaption,
    CreateImage,
    CreateVideo,
    ReplyComment,
    AnalyzeTrend,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::GenerateCaption,
        TaskKind::CreateImage,
        TaskKind::CreateVideo,
        TaskKind::ReplyComment,
        TaskKind::AnalyzeTrend,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::GenerateCaption => "generate_caption",
            TaskKind::CreateImage => "create_image",
            TaskKind::CreateVideo => "create_video",
            TaskKind::ReplyComment => "reply_comment",
            TaskKind::AnalyzeTrend => "analyze_trend",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory ordering hint from the planner. Queues stay FIFO; the value is
/// carried for skills and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Review,
    Complete,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }

    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, InProgress)
                | (InProgress, InProgress)
                | (Review, InProgress)
                | (InProgress, Review)
                | (Review, Complete)
                | (Review, Pending)
                | (Review, Failed)
                | (Pending, Failed)
                | (InProgress, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a task went back to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequeueReason {
    Rejected,
    StateConflict,
}

/// Why a task ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    RetryLimitExceeded,
    Cancelled,
    /// Stored at admission, but its id never reached the task channel.
    NotQueued,
}

/// What a rejection did to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Back to pending; carries the new `retry_count`.
    Requeued(u32),
    /// Retry budget exhausted; the task is failed for good.
    Exhausted,
}

/// The atomic unit of work.
///
/// Queues carry only the id; this record in the `TaskStore` is the single
/// source of truth an executor reads when a delivery arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub owner_id: OwnerId,
    pub kind: TaskKind,
    #[serde(default)]
    pub priority: Priority,
    /// Everything the skill needs to act without consulting the objective.
    pub context: Payload,
    pub status: TaskStatus,
    /// Rejections so far. State conflicts do not count.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Reserved against the budget at admission.
    #[serde(default)]
    pub estimated_cost: f64,
    /// Sum over every attempt; `None` until the first attempt finishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_executor: Option<ExecutorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requeue_reason: Option<RequeueReason>,
    /// Set by `Swarm::cancel`; an executor honors it at its next checkpoint.
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Task {
    pub fn new(
        id: TaskId,
        owner_id: OwnerId,
        kind: TaskKind,
        context: Payload,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner_id,
            kind,
            priority: Priority::default(),
            context,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            estimated_cost: 0.0,
            actual_cost: None,
            assigned_executor: None,
            requeue_reason: None,
            cancel_requested: false,
            failure: None,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_estimated_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = cost;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn transition(&mut self, to: TaskStatus) -> Result<(), SwarmError> {
        if !self.status.can_transition_to(to) {
            return Err(SwarmError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Executor picked the task up (first delivery or redelivery).
    pub fn start(&mut self, executor: ExecutorId, now: DateTime<Utc>) -> Result<(), SwarmError> {
        self.transition(TaskStatus::InProgress)?;
        self.assigned_executor = Some(executor);
        self.started_at = Some(now);
        Ok(())
    }

    pub fn submit_for_review(&mut self) -> Result<(), SwarmError> {
        self.transition(TaskStatus::Review)
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), SwarmError> {
        self.transition(TaskStatus::Complete)?;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Back to pending without spending a retry (used after an OCC miss).
    pub fn requeue(&mut self, reason: RequeueReason) -> Result<(), SwarmError> {
        self.transition(TaskStatus::Pending)?;
        self.requeue_reason = Some(reason);
        self.assigned_executor = None;
        Ok(())
    }

    /// Apply a rejection: spend one retry, or fail permanently once
    /// `max_retries` retries have been used.
    pub fn reject(&mut self, now: DateTime<Utc>) -> Result<RetryOutcome, SwarmError> {
        if self.status != TaskStatus::Review {
            return Err(SwarmError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to: TaskStatus::Pending,
            });
        }
        if self.retry_count < self.max_retries {
            self.requeue(RequeueReason::Rejected)?;
            self.retry_count += 1;
            Ok(RetryOutcome::Requeued(self.retry_count))
        } else {
            self.fail(FailureReason::RetryLimitExceeded, now)?;
            Ok(RetryOutcome::Exhausted)
        }
    }

    pub fn fail(&mut self, reason: FailureReason, now: DateTime<Utc>) -> Result<(), SwarmError> {
        self.transition(TaskStatus::Failed)?;
        self.failure = Some(reason);
        self.completed_at = Some(now);
        Ok(())
    }

    /// Record what an attempt cost and return the adjustment owed to the
    /// budget ledger. The first attempt replaces the reservation made at
    /// admission; later attempts are charged in full.
    pub fn record_cost(&mut self, cost: f64) -> f64 {
        match self.actual_cost {
            None => {
                self.actual_cost = Some(cost);
                cost - self.estimated_cost
            }
            Some(prev) => {
                self.actual_cost = Some(prev + cost);
                cost
            }
        }
    }

    /// Budget adjustment for a task that ends without ever running.
    pub fn unspent_reservation(&self) -> f64 {
        match self.actual_cost {
            None => self.estimated_cost,
            Some(_) => 0.0,
        }
    }
}
