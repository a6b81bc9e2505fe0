//! Validator: judge each result and route it.
//!
//! `evaluate` runs the domain-independent checks and computes
//! `final_score = min(self_score, ceiling for each failed check)`.
//! `route` then maps `(final_score, sensitive, thresholds)` to a decision:
//!
//! | condition                         | decision  |
//! |-----------------------------------|-----------|
//! | safety screen flags the artifact  | escalate  |
//! | score >= approve threshold        | approve   |
//! | score >= escalate threshold       | escalate  |
//! | otherwise                         | reject    |
//!
//! The decision is written once onto the result. Its effect on the task
//! (commit, escalation record, requeue or permanent failure) only applies
//! while the task is still waiting in `review`; a result for a task that
//! has moved on is judged and then ignored.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::committer::StateCommitter;
use super::{Services, sleep_or_shutdown};
use crate::config::ValidatorConfig;
use crate::domain::errors::SwarmError;
use crate::domain::escalation::{EscalationRecord, ReviewVerdict};
use crate::domain::events::{EngineEvent, EventType};
use crate::domain::ids::{OwnerId, ResultId};
use crate::domain::result::{ConfidenceScore, Decision, ReviewOutcome, TaskResult};
use crate::domain::retry::RetryPolicy;
use crate::domain::task::{Payload, RequeueReason, RetryOutcome, Task, TaskStatus};
use crate::ports::queue::{escalation_channel, review_channel, task_channel};
use crate::ports::{QueueExt, SafetyScreen, SafetyVerdict};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutingThresholds {
    pub approve: f64,
    pub escalate: f64,
}

impl Default for RoutingThresholds {
    fn default() -> Self {
        Self {
            approve: 0.90,
            escalate: 0.70,
        }
    }
}

impl From<&ValidatorConfig> for RoutingThresholds {
    fn from(c: &ValidatorConfig) -> Self {
        Self {
            approve: c.approve_threshold,
            escalate: c.escalate_threshold,
        }
    }
}

/// Pure routing. A sensitive artifact is never approved.
pub fn route(score: ConfidenceScore, sensitive: bool, thresholds: &RoutingThresholds) -> Decision {
    let score = score.value();
    if sensitive {
        Decision::Escalate
    } else if score >= thresholds.approve {
        Decision::Approve
    } else if score >= thresholds.escalate {
        Decision::Escalate
    } else {
        Decision::Reject
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub self_score: ConfidenceScore,
    pub final_score: ConfidenceScore,
    pub failed_checks: Vec<String>,
    /// Safety screen's reason, when it flagged the artifact.
    pub sensitive: Option<String>,
    pub decision: Decision,
}

impl Evaluation {
    fn flagged_reason(&self, thresholds: &RoutingThresholds) -> String {
        match &self.sensitive {
            Some(reason) => format!("safety screen: {reason}"),
            None => format!(
                "confidence {} below approve threshold {:.2}",
                self.final_score, thresholds.approve
            ),
        }
    }
}

pub struct Validator {
    services: Services,
    committer: StateCommitter,
    safety: Arc<dyn SafetyScreen>,
    thresholds: RoutingThresholds,
    failed_check_ceiling: ConfidenceScore,
    required_keys: Vec<String>,
    escalation_timeout: chrono::Duration,
}

impl Validator {
    pub fn new(
        services: Services,
        committer: StateCommitter,
        safety: Arc<dyn SafetyScreen>,
        config: &ValidatorConfig,
        escalation_timeout: chrono::Duration,
    ) -> Self {
        Self {
            services,
            committer,
            safety,
            thresholds: RoutingThresholds::from(config),
            failed_check_ceiling: ConfidenceScore::new(config.failed_check_ceiling)
                .unwrap_or(ConfidenceScore::ZERO),
            required_keys: config.required_artifact_keys.clone(),
            escalation_timeout,
        }
    }

    pub fn thresholds(&self) -> &RoutingThresholds {
        &self.thresholds
    }

    pub fn committer(&self) -> &StateCommitter {
        &self.committer
    }

    pub fn evaluate(&self, result: &TaskResult) -> Evaluation {
        let failed_checks = self.structural_checks(result);
        let sensitive = match self.safety.screen(&result.artifact) {
            SafetyVerdict::Clear => None,
            SafetyVerdict::Sensitive { reason } => Some(reason),
        };

        let self_score = result.confidence_score;
        let final_score = failed_checks
            .iter()
            .fold(self_score, |score, _| score.min(self.failed_check_ceiling));
        let decision = route(final_score, sensitive.is_some(), &self.thresholds);

        Evaluation {
            self_score,
            final_score,
            failed_checks,
            sensitive,
            decision,
        }
    }

    fn structural_checks(&self, result: &TaskResult) -> Vec<String> {
        let mut failed = Vec::new();
        let artifact = &result.artifact;

        let empty = match artifact {
            Payload::Null => true,
            Payload::String(s) => s.trim().is_empty(),
            Payload::Array(a) => a.is_empty(),
            Payload::Object(o) => o.is_empty(),
            _ => false,
        };
        if empty {
            failed.push("artifact is empty".to_string());
        }
        if result.rationale.trim().is_empty() {
            failed.push("rationale is empty".to_string());
        }
        if !self.required_keys.is_empty() {
            match artifact.as_object() {
                Some(obj) => {
                    for key in &self.required_keys {
                        if obj.get(key).is_none_or(Payload::is_null) {
                            failed.push(format!("artifact is missing '{key}'"));
                        }
                    }
                }
                None => failed.push("artifact is not an object".to_string()),
            }
        }
        failed
    }

    /// Pop one result id for `owner` and judge it.
    pub async fn run_once(
        &self,
        owner: &OwnerId,
        timeout: Duration,
    ) -> Result<Option<Decision>, SwarmError> {
        match self
            .services
            .queue
            .pop_json::<ResultId>(&review_channel(owner), timeout)
            .await?
        {
            Some(result_id) => self.process(result_id).await,
            None => Ok(None),
        }
    }

    /// Judge one result and apply the decision. Redelivered ids of results
    /// that already carry a decision are ignored.
    pub async fn process(&self, result_id: ResultId) -> Result<Option<Decision>, SwarmError> {
        let Some(result) = self.services.store.get_result(result_id).await? else {
            warn!(result = %result_id, "delivered id has no result record");
            return Ok(None);
        };
        if let Some(decision) = result.decision() {
            debug!(result = %result_id, %decision, "result already decided");
            return Ok(None);
        }

        let eval = self.evaluate(&result);
        let now = self.services.clock.now();
        let decision = eval.decision;
        match self
            .services
            .store
            .update_result(
                result_id,
                Box::new(move |r: &mut TaskResult| r.decide(decision, now)),
            )
            .await
        {
            Ok(_) => {}
            Err(SwarmError::AlreadyDecided(_)) => return Ok(None),
            Err(e) => return Err(e),
        }

        info!(
            owner = %result.owner_id,
            task = %result.task_id,
            result = %result_id,
            %decision,
            self_score = eval.self_score.value(),
            final_score = eval.final_score.value(),
            "result decided"
        );
        self.services.emit(
            EngineEvent::for_task(now, result.owner_id.clone(), result.task_id, EventType::ResultDecided)
                .with("result_id", result_id.to_string())
                .with("decision", decision.to_string())
                .with("self_score", eval.self_score.value())
                .with("final_score", eval.final_score.value())
                .with("failed_checks", eval.failed_checks.clone())
                .with("sensitive", eval.sensitive.clone()),
        );

        let reason = eval.flagged_reason(&self.thresholds);
        self.apply(&result, decision, eval.final_score, reason).await?;
        Ok(Some(decision))
    }

    /// Settle an escalated result with a reviewer's verdict. Handled
    /// exactly like a validator decision.
    pub async fn resolve_escalation(
        &self,
        result_id: ResultId,
        verdict: ReviewVerdict,
    ) -> Result<Decision, SwarmError> {
        let decision = Decision::from(verdict.decision);
        let now = self.services.clock.now();
        let outcome = ReviewOutcome {
            decision,
            comment: verdict.comment,
            reviewed_at: now,
        };
        let comment = outcome.comment.clone();
        let result = self
            .services
            .store
            .update_result(
                result_id,
                Box::new(move |r: &mut TaskResult| r.settle_review(outcome)),
            )
            .await?;

        info!(
            owner = %result.owner_id,
            task = %result.task_id,
            result = %result_id,
            %decision,
            "escalation resolved"
        );
        self.services.emit(
            EngineEvent::for_task(now, result.owner_id.clone(), result.task_id, EventType::EscalationResolved)
                .with("result_id", result_id.to_string())
                .with("decision", decision.to_string())
                .with("comment", comment),
        );

        self.apply(&result, decision, result.confidence_score, "reviewer".to_string())
            .await?;
        Ok(decision)
    }

    /// Auto-reject escalations left unreviewed past the timeout. Returns
    /// how many were expired.
    pub async fn expire_escalations(&self) -> Result<usize, SwarmError> {
        let now = self.services.clock.now();
        let mut expired = 0;
        for result in self.services.store.awaiting_review(None).await? {
            if !self.is_overdue(result.decided_at(), now) {
                continue;
            }
            warn!(
                owner = %result.owner_id,
                result = %result.id,
                "escalation unreviewed past timeout, auto-rejecting"
            );
            match self
                .resolve_escalation(result.id, ReviewVerdict::reject("escalation timed out"))
                .await
            {
                Ok(_) | Err(SwarmError::RetryLimitExceeded { .. }) => expired += 1,
                // a reviewer got there first
                Err(SwarmError::AlreadyDecided(_)) => {}
                Err(e) => {
                    warn!(result = %result.id, error = %e, "failed to expire escalation");
                }
            }
        }
        Ok(expired)
    }

    fn is_overdue(&self, escalated_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        escalated_at.is_some_and(|at| now - at >= self.escalation_timeout)
    }

    async fn apply(
        &self,
        result: &TaskResult,
        decision: Decision,
        score: ConfidenceScore,
        reason: String,
    ) -> Result<(), SwarmError> {
        let Some(task) = self.services.store.get_task(result.task_id).await? else {
            warn!(task = %result.task_id, result = %result.id, "result refers to unknown task");
            return Ok(());
        };
        if task.status != TaskStatus::Review {
            debug!(
                task = %task.id,
                result = %result.id,
                status = %task.status,
                "task no longer in review, decision has no effect"
            );
            return Ok(());
        }

        match decision {
            Decision::Approve => self.commit_approved(&task, result).await,
            Decision::Escalate => self.escalate(&task, result, score, reason).await,
            Decision::Reject => self.reject(&task).await,
        }
    }

    async fn commit_approved(&self, task: &Task, result: &TaskResult) -> Result<(), SwarmError> {
        match self.committer.commit(&task.owner_id, result).await {
            Ok(version) => {
                self.complete(task).await?;
                info!(owner = %task.owner_id, task = %task.id, version, "result committed");
                self.services.emit(
                    self.services
                        .task_event(task, EventType::StateCommitted)
                        .with("result_id", result.id.to_string())
                        .with("version", version),
                );
                Ok(())
            }
            Err(SwarmError::StateConflict {
                expected, actual, ..
            }) => {
                warn!(
                    owner = %task.owner_id,
                    task = %task.id,
                    expected,
                    actual,
                    "state conflict, requeueing task"
                );
                self.services.emit(
                    self.services
                        .task_event(task, EventType::StateConflict)
                        .with("result_id", result.id.to_string())
                        .with("expected", expected)
                        .with("actual", actual),
                );
                self.requeue(task, RequeueReason::StateConflict).await
            }
            Err(SwarmError::AlreadyCommitted(_)) => {
                // an earlier delivery of this task already landed
                info!(owner = %task.owner_id, task = %task.id, result = %result.id, "task already committed, no second write");
                self.complete(task).await
            }
            Err(e) => Err(e),
        }
    }

    async fn complete(&self, task: &Task) -> Result<(), SwarmError> {
        let now = self.services.clock.now();
        match self
            .services
            .store
            .update_task(task.id, Box::new(move |t: &mut Task| t.complete(now)))
            .await
        {
            Ok(done) => {
                self.services
                    .emit(self.services.task_event(&done, EventType::TaskCompleted));
                Ok(())
            }
            // a redelivery is running it again; its result will find the commit
            Err(e @ SwarmError::InvalidTransition { .. }) => {
                warn!(task = %task.id, error = %e, "committed, but task moved on meanwhile");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn requeue(&self, task: &Task, reason: RequeueReason) -> Result<(), SwarmError> {
        let requeued = match self
            .services
            .store
            .update_task(task.id, Box::new(move |t: &mut Task| t.requeue(reason)))
            .await
        {
            Ok(t) => t,
            Err(e @ SwarmError::InvalidTransition { .. }) => {
                debug!(task = %task.id, error = %e, "task moved on, not requeued");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.push_task(&requeued, reason).await
    }

    async fn push_task(&self, task: &Task, reason: RequeueReason) -> Result<(), SwarmError> {
        self.services
            .queue
            .push_json(&task_channel(&task.owner_id), &task.id)
            .await?;
        let reason = match reason {
            RequeueReason::Rejected => "rejected",
            RequeueReason::StateConflict => "state_conflict",
        };
        self.services.emit(
            self.services
                .task_event(task, EventType::TaskRequeued)
                .with("reason", reason)
                .with("retry_count", task.retry_count),
        );
        Ok(())
    }

    async fn escalate(
        &self,
        task: &Task,
        result: &TaskResult,
        score: ConfidenceScore,
        reason: String,
    ) -> Result<(), SwarmError> {
        let record = EscalationRecord::from_result(result, score, reason, self.services.clock.now());
        self.services
            .queue
            .push_json(&escalation_channel(&task.owner_id), &record)
            .await?;
        info!(
            owner = %task.owner_id,
            task = %task.id,
            result = %result.id,
            reason = %record.flagged_reason,
            "result escalated for review"
        );
        self.services.emit(
            self.services
                .task_event(task, EventType::ResultEscalated)
                .with("result_id", result.id.to_string())
                .with("confidence", score.value())
                .with("flagged_reason", record.flagged_reason),
        );
        Ok(())
    }

    async fn reject(&self, task: &Task) -> Result<(), SwarmError> {
        let now = self.services.clock.now();
        let mut outcome = None;
        let updated = match self
            .services
            .store
            .update_task(
                task.id,
                Box::new(|t: &mut Task| -> Result<(), SwarmError> {
                    outcome = Some(t.reject(now)?);
                    Ok(())
                }),
            )
            .await
        {
            Ok(t) => t,
            Err(e @ SwarmError::InvalidTransition { .. }) => {
                debug!(task = %task.id, error = %e, "task moved on, rejection has no effect");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match outcome {
            Some(RetryOutcome::Requeued(retry_count)) => {
                info!(task = %updated.id, retry_count, max_retries = updated.max_retries, "task rejected, retrying");
                self.push_task(&updated, RequeueReason::Rejected).await
            }
            Some(RetryOutcome::Exhausted) => {
                let err = SwarmError::RetryLimitExceeded {
                    task_id: updated.id,
                    retries: updated.retry_count,
                };
                error!(owner = %updated.owner_id, task = %updated.id, error = %err, "task failed permanently");
                self.services.emit(
                    self.services
                        .task_event(&updated, EventType::TaskFailed)
                        .with("reason", "retry_limit_exceeded")
                        .with("retry_count", updated.retry_count),
                );
                Err(err)
            }
            None => Ok(()),
        }
    }
}

/// A group of validator tasks draining one owner's review channel.
pub struct ValidatorLoop {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl ValidatorLoop {
    pub fn spawn(
        n: usize,
        owner: OwnerId,
        validator: Arc<Validator>,
        pop_timeout: Duration,
        backoff: RetryPolicy,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut joins = Vec::with_capacity(n);
        for i in 0..n {
            let validator = Arc::clone(&validator);
            let owner = owner.clone();
            let backoff = backoff.clone();
            let mut rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                validator_loop(i, validator, owner, pop_timeout, backoff, &mut rx).await;
            }));
        }
        Self { shutdown_tx, joins }
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn validator_loop(
    index: usize,
    validator: Arc<Validator>,
    owner: OwnerId,
    pop_timeout: Duration,
    backoff: RetryPolicy,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let channel = review_channel(&owner);
    let mut failures: u32 = 0;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let popped = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            popped = validator.services.queue.pop_json::<ResultId>(&channel, pop_timeout) => popped,
        };

        let outcome = match popped {
            Ok(Some(result_id)) => validator.process(result_id).await.map(|_| ()),
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        match outcome {
            // already logged where it happened
            Ok(()) | Err(SwarmError::RetryLimitExceeded { .. }) => failures = 0,
            Err(e @ SwarmError::QueueUnavailable(_)) => {
                failures = failures.saturating_add(1);
                let delay = backoff.next_delay(failures);
                warn!(owner = %owner, validator = index, error = %e, failures, ?delay, "queue unavailable, backing off");
                if sleep_or_shutdown(delay, shutdown_rx).await {
                    break;
                }
            }
            Err(e) => {
                error!(owner = %owner, validator = index, error = %e, "validation failed");
            }
        }
    }
}
