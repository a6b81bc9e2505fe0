//! Records exchanged with the human-review surface.
//!
//! ## Flow
//! 1. The validator escalates a result: it writes `Decision::Escalate` onto
//!    the result and appends an `EscalationRecord` to
//!    `agent:{owner}:escalations`.
//! 2. A reviewer answers with a `ReviewVerdict` through `Swarm::review`.
//!    Approve commits like an automatic approval; reject requeues (or fails)
//!    like an automatic rejection.
//! 3. A record nobody answers within the escalation timeout is settled as a
//!    rejection by the reaper.
//!
//! The channel is append-only: settling an escalation writes onto the
//! result record, never back onto the channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{OwnerId, ResultId, TaskId};
use super::result::{ConfidenceScore, Decision, TaskResult};
use super::task::Payload;

/// One item on the escalation channel.
///
/// Self-contained: a reviewer can judge the artifact from this record alone,
/// without reading the task or the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub result_id: ResultId,
    pub task_id: TaskId,
    pub owner_id: OwnerId,
    pub artifact: Payload,
    /// The validator's final score, not the executor's self-reported one.
    pub confidence_score: ConfidenceScore,
    pub rationale: String,
    /// Why the result needs a human (safety screen hit or low confidence).
    pub flagged_reason: String,
    pub escalated_at: DateTime<Utc>,
}

impl EscalationRecord {
    pub fn from_result(
        result: &TaskResult,
        confidence_score: ConfidenceScore,
        flagged_reason: impl Into<String>,
        escalated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            result_id: result.id,
            task_id: result.task_id,
            owner_id: result.owner_id.clone(),
            artifact: result.artifact.clone(),
            confidence_score,
            rationale: result.rationale.clone(),
            flagged_reason: flagged_reason.into(),
            escalated_at,
        }
    }
}

/// A reviewer can approve or reject; escalating further is not an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

impl From<ReviewDecision> for Decision {
    fn from(d: ReviewDecision) -> Self {
        match d {
            ReviewDecision::Approve => Decision::Approve,
            ReviewDecision::Reject => Decision::Reject,
        }
    }
}

/// What a reviewer writes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub decision: ReviewDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ReviewVerdict {
    pub fn approve() -> Self {
        Self {
            decision: ReviewDecision::Approve,
            comment: None,
        }
    }

    pub fn reject(comment: impl Into<String>) -> Self {
        Self {
            decision: ReviewDecision::Reject,
            comment: Some(comment.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_wire_shape() {
        let v: ReviewVerdict =
            serde_json::from_str(r#"{"decision":"reject","comment":"off-brand"}"#).unwrap();
        assert_eq!(v, ReviewVerdict::reject("off-brand"));
        assert_eq!(Decision::from(v.decision), Decision::Reject);

        // reviewers cannot escalate further
        assert!(serde_json::from_str::<ReviewVerdict>(r#"{"decision":"escalate"}"#).is_err());
    }
}
