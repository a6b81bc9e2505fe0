//! Executor: pop a task id, run its skill, emit exactly one result.
//!
//! Executors keep no state between deliveries; everything they know comes
//! from the store. The same task id may arrive more than once
//! (at-least-once delivery), so every step tolerates duplicates:
//! - terminal tasks are skipped;
//! - a redelivered `in_progress`/`review` task is run again and yields a
//!   second result, which the validator judges on its own merits;
//! - a result for a task that moved on meanwhile is still stored and
//!   reviewed, but leaves the task alone.
//!
//! No store or ledger lock is held while the skill runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Services, sleep_or_shutdown};
use crate::domain::errors::SwarmError;
use crate::domain::events::EventType;
use crate::domain::ids::{ExecutorId, OwnerId, ResultId, TaskId};
use crate::domain::result::{ConfidenceScore, ResultStatus, TaskResult};
use crate::domain::retry::RetryPolicy;
use crate::domain::task::{FailureReason, Task, TaskStatus};
use crate::ports::queue::{review_channel, task_channel};
use crate::ports::{CancellationCheck, QueueExt, SkillContext, SkillError, SkillOutput, TaskStore};
use crate::typed::SkillRegistry;

/// Cancellation checkpoint backed by the task store.
struct StoreCancellation {
    store: Arc<dyn TaskStore>,
    task_id: TaskId,
}

#[async_trait]
impl CancellationCheck for StoreCancellation {
    async fn is_cancelled(&self) -> bool {
        matches!(
            self.store.get_task(self.task_id).await,
            Ok(Some(task)) if task.cancel_requested
        )
    }
}

/// What to do with a delivery, decided atomically against the stored task.
enum Admission {
    Skip,
    Cancelled,
    Run,
}

/// Where a finished attempt goes, decided atomically with cost recording.
enum Settlement {
    Submit,
    Discard,
}

#[derive(Clone)]
pub struct Executor {
    id: ExecutorId,
    services: Services,
    registry: Arc<SkillRegistry>,
}

impl Executor {
    pub fn new(id: ExecutorId, services: Services, registry: Arc<SkillRegistry>) -> Self {
        Self {
            id,
            services,
            registry,
        }
    }

    pub fn id(&self) -> &ExecutorId {
        &self.id
    }

    /// Pop one task id for `owner` and process it. `Ok(None)` when the pop
    /// timed out or the delivery produced no result.
    pub async fn run_once(
        &self,
        owner: &OwnerId,
        timeout: Duration,
    ) -> Result<Option<ResultId>, SwarmError> {
        match self.services.queue.pop_json::<TaskId>(&task_channel(owner), timeout).await? {
            Some(task_id) => self.process(task_id).await,
            None => Ok(None),
        }
    }

    /// Handle one delivery of `task_id`.
    pub async fn process(&self, task_id: TaskId) -> Result<Option<ResultId>, SwarmError> {
        let now = self.services.clock.now();
        let mut admission = Admission::Skip;
        let executor = self.id.clone();
        let claimed = self
            .services
            .store
            .update_task(
                task_id,
                Box::new(|t: &mut Task| -> Result<(), SwarmError> {
                    if t.status.is_terminal() {
                        return Ok(());
                    }
                    if t.cancel_requested {
                        t.fail(FailureReason::Cancelled, now)?;
                        admission = Admission::Cancelled;
                        return Ok(());
                    }
                    t.start(executor, now)?;
                    admission = Admission::Run;
                    Ok(())
                }),
            )
            .await;

        let task = match claimed {
            Ok(task) => task,
            Err(SwarmError::TaskNotFound(_)) => {
                warn!(executor = %self.id, task = %task_id, "delivered id has no task record");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match admission {
            Admission::Skip => {
                debug!(executor = %self.id, task = %task.id, status = %task.status, "skipping terminal task");
                Ok(None)
            }
            Admission::Cancelled => {
                self.refund_unspent(&task).await?;
                info!(executor = %self.id, task = %task.id, "task cancelled before execution");
                self.services.emit(
                    self.services
                        .task_event(&task, EventType::TaskFailed)
                        .with("reason", "cancelled"),
                );
                Ok(None)
            }
            Admission::Run => {
                self.services.emit(
                    self.services
                        .task_event(&task, EventType::TaskStarted)
                        .with("executor", self.id.as_str())
                        .with("attempt", task.retry_count),
                );
                self.execute(task).await
            }
        }
    }

    async fn execute(&self, task: Task) -> Result<Option<ResultId>, SwarmError> {
        let ctx = SkillContext::new(
            task.id,
            task.owner_id.clone(),
            task.kind,
            task.retry_count,
            task.context.clone(),
            Arc::new(StoreCancellation {
                store: Arc::clone(&self.services.store),
                task_id: task.id,
            }),
        );

        let outcome = match self.registry.get(task.kind) {
            Some(skill) => skill.execute(&ctx).await,
            None => Err(SkillError::Failed(
                SwarmError::SkillNotFound(task.kind).to_string(),
            )),
        };

        let result_id = self.services.ids.generate_result_id();
        let now = self.services.clock.now();
        let cancelled_by_skill = matches!(outcome, Err(SkillError::Cancelled));
        let result = self.build_result(result_id, &task, outcome, now);

        let mut settlement = Settlement::Submit;
        let mut delta = 0.0;
        let cost = result.cost;
        let settled = self
            .services
            .store
            .update_task(
                task.id,
                Box::new(|t: &mut Task| -> Result<(), SwarmError> {
                    delta = t.record_cost(cost);
                    if t.status.is_terminal() {
                        return Ok(());
                    }
                    if cancelled_by_skill || t.cancel_requested {
                        t.fail(FailureReason::Cancelled, now)?;
                        settlement = Settlement::Discard;
                        return Ok(());
                    }
                    if t.status == TaskStatus::InProgress {
                        t.submit_for_review()?;
                    }
                    Ok(())
                }),
            )
            .await?;

        if delta != 0.0 {
            self.services.ledger.adjust(&settled.owner_id, delta).await?;
        }

        match settlement {
            Settlement::Discard => {
                info!(executor = %self.id, task = %settled.id, "result discarded after cancellation");
                self.services.emit(
                    self.services
                        .task_event(&settled, EventType::TaskFailed)
                        .with("reason", "cancelled")
                        .with("cost", cost),
                );
                Ok(None)
            }
            Settlement::Submit => {
                let status = result.status;
                let score = result.confidence_score.value();
                self.services.store.insert_result(result).await?;
                if let Err(e) = self
                    .services
                    .queue
                    .push_json(&review_channel(&settled.owner_id), &result_id)
                    .await
                {
                    // stored undecided; `Swarm::redeliver_pending` re-queues it
                    warn!(
                        executor = %self.id,
                        task = %settled.id,
                        result = %result_id,
                        error = %e,
                        "result stored but not queued for review"
                    );
                    return Err(e);
                }
                debug!(
                    executor = %self.id,
                    task = %settled.id,
                    result = %result_id,
                    confidence = score,
                    "result submitted for review"
                );
                self.services.emit(
                    self.services
                        .task_event(&settled, EventType::TaskSubmitted)
                        .with("result_id", result_id.to_string())
                        .with("result_status", format!("{status:?}").to_lowercase())
                        .with("confidence", score)
                        .with("cost", cost),
                );
                Ok(Some(result_id))
            }
        }
    }

    /// Turn a skill outcome into a result. Every failure mode becomes a
    /// failed result with zero confidence rather than an error.
    fn build_result(
        &self,
        result_id: ResultId,
        task: &Task,
        outcome: Result<SkillOutput, SkillError>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> TaskResult {
        let failed = |reason: String, cost: f64| {
            let mut r = TaskResult::failed(
                result_id,
                task.id,
                task.owner_id.clone(),
                self.id.clone(),
                reason,
                now,
            );
            r.cost = cost;
            r
        };

        let output = match outcome {
            Ok(output) => output,
            Err(e) => {
                let err = SwarmError::SkillExecutionFailure {
                    kind: task.kind,
                    message: e.to_string(),
                };
                warn!(executor = %self.id, task = %task.id, error = %err, "skill failed");
                return failed(err.to_string(), 0.0);
            }
        };

        let cost = output.cost.max(0.0);
        let score = match ConfidenceScore::new(output.confidence) {
            Ok(score) => score,
            Err(e) => {
                warn!(executor = %self.id, task = %task.id, error = %e, "skill reported invalid confidence");
                return failed(format!("skill reported invalid confidence: {e}"), cost);
            }
        };
        let status = if output.partial {
            ResultStatus::Partial
        } else {
            ResultStatus::Success
        };
        TaskResult::new(
            result_id,
            task.id,
            task.owner_id.clone(),
            self.id.clone(),
            status,
            output.artifact,
            score,
            output.rationale,
            cost,
            now,
        )
    }

    async fn refund_unspent(&self, task: &Task) -> Result<(), SwarmError> {
        let unspent = task.unspent_reservation();
        if unspent > 0.0 {
            self.services.ledger.adjust(&task.owner_id, -unspent).await?;
        }
        Ok(())
    }
}

/// A group of executors draining one owner's task channel.
/// - `request_shutdown()` stops them taking new deliveries
/// - `shutdown_and_join()` also waits for in-flight work
pub struct ExecutorPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl ExecutorPool {
    pub fn spawn(
        n: usize,
        owner: OwnerId,
        services: Services,
        registry: Arc<SkillRegistry>,
        pop_timeout: Duration,
        backoff: RetryPolicy,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for i in 0..n {
            let executor = Executor::new(
                ExecutorId::new(format!("{owner}-executor-{i}")),
                services.clone(),
                Arc::clone(&registry),
            );
            let owner = owner.clone();
            let backoff = backoff.clone();
            let mut rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                executor_loop(executor, owner, pop_timeout, backoff, &mut rx).await;
            }));
        }

        Self { shutdown_tx, joins }
    }

    pub fn size(&self) -> usize {
        self.joins.len()
    }

    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn executor_loop(
    executor: Executor,
    owner: OwnerId,
    pop_timeout: Duration,
    backoff: RetryPolicy,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let channel = task_channel(&owner);
    let mut failures: u32 = 0;
    debug!(executor = %executor.id, "executor started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // only the pop races shutdown; a started task runs to completion
        let popped = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            popped = executor.services.queue.pop_json::<TaskId>(&channel, pop_timeout) => popped,
        };

        let outcome = match popped {
            Ok(Some(task_id)) => executor.process(task_id).await.map(|_| ()),
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => failures = 0,
            Err(e @ SwarmError::QueueUnavailable(_)) => {
                failures = failures.saturating_add(1);
                let delay = backoff.next_delay(failures);
                warn!(executor = %executor.id, error = %e, failures, ?delay, "queue unavailable, backing off");
                if sleep_or_shutdown(delay, shutdown_rx).await {
                    break;
                }
            }
            Err(e) => {
                error!(executor = %executor.id, error = %e, "delivery failed");
            }
        }
    }
    debug!(executor = %executor.id, "executor stopped");
}
