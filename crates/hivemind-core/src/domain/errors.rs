//! Engine error taxonomy.
//!
//! Only `RetryLimitExceeded` and `QueueUnavailable` are meant to reach an
//! operator. Everything else is absorbed by a state transition somewhere in
//! the engine (a requeue, a low-confidence result, a shrunk plan).

use thiserror::Error;

use super::ids::{OwnerId, ResultId, TaskId};
use super::task::{TaskKind, TaskStatus};

/// Operational classification of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Handled inside the engine by changing plan or state.
    Recoverable,
    /// The unit of work is finished for good.
    Terminal,
    /// Transport or storage failure; back off and retry.
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("budget exceeded for owner={owner}: requested {requested:.4}, remaining {remaining:.4}")]
    BudgetExceeded {
        owner: OwnerId,
        requested: f64,
        remaining: f64,
    },

    #[error("skill for kind={kind} failed: {message}")]
    SkillExecutionFailure { kind: TaskKind, message: String },

    #[error("state conflict for owner={owner}: expected version {expected}, found {actual}")]
    StateConflict {
        owner: OwnerId,
        expected: u64,
        actual: u64,
    },

    #[error("task {task_id} exhausted its retries ({retries})")]
    RetryLimitExceeded { task_id: TaskId, retries: u32 },

    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("queue capacity reached on {channel}: depth {depth}, ceiling {ceiling}")]
    QueueSaturated {
        channel: String,
        depth: usize,
        ceiling: usize,
    },

    #[error("invalid objective: {0}")]
    InvalidObjective(String),

    #[error("confidence score {0} is outside [0.0, 1.0]")]
    InvalidConfidence(f64),

    #[error("task {task_id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("result not found: {0}")]
    ResultNotFound(ResultId),

    #[error("result {0} already carries a decision")]
    AlreadyDecided(ResultId),

    #[error("task {0} is already committed to owner state")]
    AlreadyCommitted(TaskId),

    #[error("result {0} is not awaiting review")]
    NotEscalated(ResultId),

    #[error("no skill registered for kind={0}")]
    SkillNotFound(TaskKind),

    #[error("duplicate skill for kind={0}")]
    DuplicateSkill(TaskKind),

    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
}

impl SwarmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SwarmError::QueueUnavailable(_) | SwarmError::QueueSaturated { .. } => {
                ErrorKind::Infrastructure
            }
            SwarmError::RetryLimitExceeded { .. }
            | SwarmError::InvalidObjective(_)
            | SwarmError::InvalidConfidence(_)
            | SwarmError::InvalidTransition { .. }
            | SwarmError::TaskNotFound(_)
            | SwarmError::ResultNotFound(_)
            | SwarmError::AlreadyDecided(_)
            | SwarmError::AlreadyCommitted(_)
            | SwarmError::NotEscalated(_)
            | SwarmError::SkillNotFound(_)
            | SwarmError::DuplicateSkill(_)
            | SwarmError::Codec(_) => ErrorKind::Terminal,
            SwarmError::BudgetExceeded { .. }
            | SwarmError::SkillExecutionFailure { .. }
            | SwarmError::StateConflict { .. } => ErrorKind::Recoverable,
        }
    }

    /// Whether this condition should be reported to a user or operator
    /// rather than handled through a state transition.
    pub fn is_operator_visible(&self) -> bool {
        matches!(
            self,
            SwarmError::RetryLimitExceeded { .. } | SwarmError::QueueUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn only_retry_limit_and_queue_unavailable_are_operator_visible() {
        let task_id = TaskId::from_ulid(Ulid::new());
        assert!(SwarmError::RetryLimitExceeded { task_id, retries: 3 }.is_operator_visible());
        assert!(SwarmError::QueueUnavailable("down".into()).is_operator_visible());

        let conflict = SwarmError::StateConflict {
            owner: OwnerId::new("o"),
            expected: 1,
            actual: 2,
        };
        assert!(!conflict.is_operator_visible());
        assert_eq!(conflict.kind(), ErrorKind::Recoverable);

        let budget = SwarmError::BudgetExceeded {
            owner: OwnerId::new("o"),
            requested: 4.0,
            remaining: 3.0,
        };
        assert!(!budget.is_operator_visible());
    }

    #[test]
    fn saturation_message_mentions_queue() {
        let err = SwarmError::QueueSaturated {
            channel: "agent:a:tasks".into(),
            depth: 101,
            ceiling: 100,
        };
        assert!(err.to_string().contains("queue capacity"));
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }
}
