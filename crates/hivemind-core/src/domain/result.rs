//! Result of one execution attempt, plus the decision made about it.
//!
//! ## Lifecycle
//! 1. The executor builds a `TaskResult` with no decision and stores it.
//! 2. The validator writes exactly one `Decision` (`decide`). A second
//!    delivery of the same result id finds it decided and is skipped.
//! 3. An escalated result additionally receives one `ReviewOutcome`
//!    (`settle_review`), from a reviewer or from the escalation timeout.
//!
//! The decision fields are private so these write-once rules cannot be
//! bypassed; everything else is plain data.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::SwarmError;
use super::ids::{ExecutorId, OwnerId, ResultId, TaskId};
use super::task::Payload;

/// A confidence score guaranteed to lie in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ConfidenceScore(f64);

impl ConfidenceScore {
    pub const ZERO: ConfidenceScore = ConfidenceScore(0.0);
    pub const ONE: ConfidenceScore = ConfidenceScore(1.0);

    pub fn new(value: f64) -> Result<Self, SwarmError> {
        if (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            // NaN lands here too
            Err(SwarmError::InvalidConfidence(value))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }

    pub fn min(self, other: ConfidenceScore) -> ConfidenceScore {
        if other.0 < self.0 { other } else { self }
    }
}

impl<'de> Deserialize<'de> for ConfidenceScore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        ConfidenceScore::new(value).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for ConfidenceScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// How the skill itself judged the attempt.
///
/// `Failed` results are still reviewed; with zero confidence they normally
/// route to a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Partial,
    Failed,
}

/// Where the validator routed a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Escalate,
    Reject,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Decision::Approve => "approve",
            Decision::Escalate => "escalate",
            Decision::Reject => "reject",
        };
        f.write_str(s)
    }
}

/// A human (or the escalation timeout) settling an escalated result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub reviewed_at: DateTime<Utc>,
}

/// Output of one execution attempt.
///
/// A task collects one result per attempt (retries and redeliveries
/// included); each is judged on its own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: ResultId,
    pub task_id: TaskId,
    pub owner_id: OwnerId,
    pub executor_id: ExecutorId,
    pub status: ResultStatus,
    /// Skill output, opaque to the engine apart from structural checks.
    pub artifact: Payload,
    /// Self-reported by the skill; the validator may only lower it.
    pub confidence_score: ConfidenceScore,
    pub rationale: String,
    /// What the attempt actually cost.
    pub cost: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    decision: Option<Decision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    review: Option<ReviewOutcome>,
}

impl TaskResult {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ResultId,
        task_id: TaskId,
        owner_id: OwnerId,
        executor_id: ExecutorId,
        status: ResultStatus,
        artifact: Payload,
        confidence_score: ConfidenceScore,
        rationale: impl Into<String>,
        cost: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_id,
            owner_id,
            executor_id,
            status,
            artifact,
            confidence_score,
            rationale: rationale.into(),
            cost,
            created_at,
            decision: None,
            decided_at: None,
            review: None,
        }
    }

    /// A failed attempt: zero confidence, the error as rationale.
    pub fn failed(
        id: ResultId,
        task_id: TaskId,
        owner_id: OwnerId,
        executor_id: ExecutorId,
        reason: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            id,
            task_id,
            owner_id,
            executor_id,
            ResultStatus::Failed,
            Payload::Null,
            ConfidenceScore::ZERO,
            reason,
            0.0,
            created_at,
        )
    }

    pub fn decision(&self) -> Option<Decision> {
        self.decision
    }

    pub fn decided_at(&self) -> Option<DateTime<Utc>> {
        self.decided_at
    }

    pub fn review(&self) -> Option<&ReviewOutcome> {
        self.review.as_ref()
    }

    /// Write the validator's decision. Fails if one is already recorded.
    pub fn decide(&mut self, decision: Decision, at: DateTime<Utc>) -> Result<(), SwarmError> {
        if self.decision.is_some() {
            return Err(SwarmError::AlreadyDecided(self.id));
        }
        self.decision = Some(decision);
        self.decided_at = Some(at);
        Ok(())
    }

    /// Write the reviewer's verdict on an escalated result. Only once, and
    /// only for results the validator escalated.
    pub fn settle_review(&mut self, outcome: ReviewOutcome) -> Result<(), SwarmError> {
        if self.decision != Some(Decision::Escalate) {
            return Err(SwarmError::NotEscalated(self.id));
        }
        if self.review.is_some() {
            return Err(SwarmError::AlreadyDecided(self.id));
        }
        self.review = Some(outcome);
        Ok(())
    }

    /// Escalated and not yet settled.
    pub fn awaiting_review(&self) -> bool {
        self.decision == Some(Decision::Escalate) && self.review.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use ulid::Ulid;

    fn result(score: f64) -> TaskResult {
        TaskResult::new(
            ResultId::from_ulid(Ulid::new()),
            TaskId::from_ulid(Ulid::new()),
            OwnerId::new("o"),
            ExecutorId::new("executor-0"),
            ResultStatus::Success,
            serde_json::json!({"caption": "hello"}),
            ConfidenceScore::new(score).unwrap(),
            "wrote a caption",
            0.01,
            Utc::now(),
        )
    }

    #[rstest]
    #[case(0.0, true)]
    #[case(1.0, true)]
    #[case(0.78, true)]
    #[case(-0.01, false)]
    #[case(1.0001, false)]
    #[case(f64::NAN, false)]
    fn confidence_must_be_in_unit_interval(#[case] value: f64, #[case] ok: bool) {
        assert_eq!(ConfidenceScore::new(value).is_ok(), ok);
    }

    #[test]
    fn out_of_range_confidence_fails_to_decode() {
        assert!(serde_json::from_str::<ConfidenceScore>("1.5").is_err());
        assert_eq!(
            serde_json::from_str::<ConfidenceScore>("0.5").unwrap().value(),
            0.5
        );
    }

    #[test]
    fn decision_is_written_once() {
        let mut r = result(0.95);
        r.decide(Decision::Approve, Utc::now()).unwrap();
        assert_eq!(r.decision(), Some(Decision::Approve));
        assert!(r.decided_at().is_some());

        let err = r.decide(Decision::Reject, Utc::now()).unwrap_err();
        assert!(matches!(err, SwarmError::AlreadyDecided(_)));
        assert_eq!(r.decision(), Some(Decision::Approve));
    }

    #[test]
    fn review_requires_escalation() {
        let outcome = ReviewOutcome {
            decision: Decision::Reject,
            comment: Some("off-brand".into()),
            reviewed_at: Utc::now(),
        };

        let mut approved = result(0.95);
        approved.decide(Decision::Approve, Utc::now()).unwrap();
        assert!(matches!(
            approved.settle_review(outcome.clone()),
            Err(SwarmError::NotEscalated(_))
        ));

        let mut escalated = result(0.78);
        escalated.decide(Decision::Escalate, Utc::now()).unwrap();
        assert!(escalated.awaiting_review());
        escalated.settle_review(outcome.clone()).unwrap();
        assert!(!escalated.awaiting_review());
        assert!(escalated.settle_review(outcome).is_err());
    }

    #[test]
    fn failed_result_has_zero_confidence() {
        let r = TaskResult::failed(
            ResultId::from_ulid(Ulid::new()),
            TaskId::from_ulid(Ulid::new()),
            OwnerId::new("o"),
            ExecutorId::new("executor-0"),
            "boom",
            Utc::now(),
        );
        assert_eq!(r.status, ResultStatus::Failed);
        assert_eq!(r.confidence_score, ConfidenceScore::ZERO);
        assert_eq!(r.rationale, "boom");
    }
}
