//! Decomposer: objective -> admitted tasks on the owner's task channel.
//!
//! Order of operations:
//! 1. plan (pure, via `ObjectivePlanner`);
//! 2. wait for queue capacity (backpressure);
//! 3. reserve budget under the configured `BudgetPolicy`;
//! 4. per task: wait for capacity again, store it, then push its id.
//!
//! Admission only pushes while the task channel is below the depth ceiling,
//! so a plan never carries the depth past it. Whatever was reserved for a
//! task that never reached the channel is released again:
//! - the queue stays saturated past `backpressure_timeout` mid-plan: the
//!   tasks already queued are returned, the rest are dropped unstored;
//! - a store or push fails: the error is returned, and a task stored but
//!   not pushed is failed with `NotQueued`.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::Services;
use crate::config::{BudgetPolicy, QueueConfig};
use crate::domain::errors::SwarmError;
use crate::domain::events::{EngineEvent, EventType};
use crate::domain::ids::OwnerId;
use crate::domain::task::{DEFAULT_MAX_RETRIES, FailureReason, Task};
use crate::ports::queue::task_channel;
use crate::ports::{ObjectivePlanner, PlannedTask, QueueExt};

pub struct Decomposer {
    services: Services,
    planner: Arc<dyn ObjectivePlanner>,
    policy: BudgetPolicy,
    queue_config: QueueConfig,
    max_retries: u32,
}

impl Decomposer {
    pub fn new(
        services: Services,
        planner: Arc<dyn ObjectivePlanner>,
        policy: BudgetPolicy,
        queue_config: QueueConfig,
    ) -> Self {
        Self {
            services,
            planner,
            policy,
            queue_config,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn planner(&self) -> &Arc<dyn ObjectivePlanner> {
        &self.planner
    }

    /// Decompose `objective` for `owner`. Returns the admitted tasks in
    /// queue order; never an empty list.
    pub async fn decompose(&self, objective: &str, owner: &OwnerId) -> Result<Vec<Task>, SwarmError> {
        let plan = self.planner.plan(objective, owner)?;
        if plan.is_empty() {
            return Err(SwarmError::InvalidObjective(
                "planner produced no tasks".to_string(),
            ));
        }
        debug!(owner = %owner, planned = plan.len(), "objective planned");

        self.wait_for_capacity(owner).await?;
        let admitted = self.admit(owner, plan).await?;

        let channel = task_channel(owner);
        let now = self.services.clock.now();
        let mut tasks = Vec::with_capacity(admitted.len());
        let mut remaining = admitted.into_iter();
        while let Some(planned) = remaining.next() {
            let cost = planned.estimated_cost;
            // the first task was checked before reserving
            if !tasks.is_empty()
                && let Err(e) = self.wait_for_capacity(owner).await
            {
                let unqueued = cost + remaining.by_ref().map(|p| p.estimated_cost).sum::<f64>();
                self.release(owner, unqueued).await?;
                return match e {
                    SwarmError::QueueSaturated { .. } => {
                        warn!(owner = %owner, admitted = tasks.len(), "admission stopped at queue capacity");
                        Ok(tasks)
                    }
                    e => Err(e),
                };
            }

            let task = Task::new(
                self.services.ids.generate_task_id(),
                owner.clone(),
                planned.kind,
                planned.context,
                now,
            )
            .with_priority(planned.priority)
            .with_estimated_cost(cost)
            .with_max_retries(self.max_retries);

            if let Err(e) = self.enqueue(&channel, &task).await {
                let unqueued = cost + remaining.by_ref().map(|p| p.estimated_cost).sum::<f64>();
                self.release(owner, unqueued).await?;
                warn!(owner = %owner, queued = tasks.len(), error = %e, "decomposition aborted");
                return Err(e);
            }
            self.services.emit(
                self.services
                    .task_event(&task, EventType::TaskCreated)
                    .with("kind", task.kind.as_str())
                    .with("estimated_cost", task.estimated_cost),
            );
            tasks.push(task);
        }

        info!(owner = %owner, admitted = tasks.len(), "objective decomposed");
        Ok(tasks)
    }

    /// Store `task`, then push its id. A task whose push fails is failed
    /// with `NotQueued` so it never reads as pending.
    async fn enqueue(&self, channel: &str, task: &Task) -> Result<(), SwarmError> {
        self.services.store.insert_task(task.clone()).await?;
        if let Err(e) = self.services.queue.push_json(channel, &task.id).await {
            let now = self.services.clock.now();
            self.services
                .store
                .update_task(
                    task.id,
                    Box::new(move |t: &mut Task| t.fail(FailureReason::NotQueued, now)),
                )
                .await?;
            return Err(e);
        }
        Ok(())
    }

    /// Give back budget reserved for tasks that never reached the channel.
    async fn release(&self, owner: &OwnerId, amount: f64) -> Result<(), SwarmError> {
        if amount > 0.0 {
            self.services.ledger.adjust(owner, -amount).await?;
            debug!(owner = %owner, amount, "released unqueued reservation");
        }
        Ok(())
    }

    /// Block until the task channel is below the ceiling. Gives up with
    /// `QueueSaturated` after `backpressure_timeout`.
    async fn wait_for_capacity(&self, owner: &OwnerId) -> Result<(), SwarmError> {
        let channel = task_channel(owner);
        let ceiling = self.queue_config.depth_ceiling;
        let deadline = Instant::now() + self.queue_config.backpressure_timeout;
        let mut paused = false;

        loop {
            let depth = self.services.queue.len(&channel).await?;
            if depth < ceiling {
                if paused {
                    info!(owner = %owner, depth, "backpressure released");
                }
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(owner = %owner, depth, ceiling, "task queue saturated");
                return Err(SwarmError::QueueSaturated {
                    channel,
                    depth,
                    ceiling,
                });
            }
            if !paused {
                info!(owner = %owner, depth, ceiling, "admission paused for backpressure");
                paused = true;
            }
            tokio::time::sleep(self.queue_config.backpressure_poll).await;
        }
    }

    async fn admit(
        &self,
        owner: &OwnerId,
        plan: Vec<PlannedTask>,
    ) -> Result<Vec<PlannedTask>, SwarmError> {
        let ledger = &self.services.ledger;
        match self.policy {
            BudgetPolicy::AllOrNothing => {
                let total: f64 = plan.iter().map(|p| p.estimated_cost).sum();
                if let Err(e) = ledger.try_reserve(owner, total).await {
                    self.refused(owner, &e, plan.len());
                    return Err(e);
                }
                Ok(plan)
            }
            BudgetPolicy::Shrink => {
                let planned = plan.len();
                let mut admitted = Vec::with_capacity(planned);
                let mut first_refusal = None;
                for p in plan {
                    match ledger.try_reserve(owner, p.estimated_cost).await {
                        Ok(_) => admitted.push(p),
                        Err(e @ SwarmError::BudgetExceeded { .. }) => {
                            self.refused(owner, &e, 1);
                            first_refusal.get_or_insert(e);
                        }
                        Err(e) => {
                            // give back what this call already reserved
                            self.release(owner, admitted.iter().map(|p| p.estimated_cost).sum())
                                .await?;
                            return Err(e);
                        }
                    }
                }
                match first_refusal {
                    Some(e) if admitted.is_empty() => Err(e),
                    _ => {
                        if admitted.len() < planned {
                            info!(
                                owner = %owner,
                                planned,
                                admitted = admitted.len(),
                                "plan shrunk to fit budget"
                            );
                        }
                        Ok(admitted)
                    }
                }
            }
        }
    }

    fn refused(&self, owner: &OwnerId, err: &SwarmError, tasks: usize) {
        if let SwarmError::BudgetExceeded {
            requested,
            remaining,
            ..
        } = err
        {
            warn!(owner = %owner, requested, remaining, tasks, "budget refused admission");
            self.services.emit(
                EngineEvent::new(self.services.clock.now(), owner.clone(), EventType::BudgetRefused)
                    .with("requested", *requested)
                    .with("remaining", *remaining)
                    .with("tasks", tasks),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;
    use crate::app::testkit::{Kit, PushOutage, kit, kit_with_queue};
    use crate::domain::task::{Priority, TaskKind, TaskStatus};
    use crate::impls::KeywordPlanner;
    use crate::ports::QueueService;
    use serde_json::json;

    /// Fixed plan with the given costs.
    struct StaticPlanner(Vec<f64>);

    impl ObjectivePlanner for StaticPlanner {
        fn plan(&self, objective: &str, _owner: &OwnerId) -> Result<Vec<PlannedTask>, SwarmError> {
            Ok(self
                .0
                .iter()
                .map(|&cost| PlannedTask {
                    kind: TaskKind::CreateImage,
                    priority: Priority::Medium,
                    context: json!({"goal_description": objective}),
                    estimated_cost: cost,
                })
                .collect())
        }

        fn kinds(&self) -> Vec<TaskKind> {
            vec![TaskKind::CreateImage]
        }
    }

    fn decomposer(kit: &Kit, planner: Arc<dyn ObjectivePlanner>, policy: BudgetPolicy) -> Decomposer {
        Decomposer::new(
            kit.services.clone(),
            planner,
            policy,
            QueueConfig {
                backpressure_timeout: Duration::from_millis(100),
                backpressure_poll: Duration::from_millis(10),
                ..QueueConfig::default()
            },
        )
    }

    async fn spent_one_of_nine(kit: &Kit, owner: &OwnerId) {
        kit.services.ledger.set_allowance(owner, 9.0).await.unwrap();
        kit.services.ledger.try_reserve(owner, 1.0).await.unwrap();
    }

    #[tokio::test]
    async fn shrink_omits_the_task_that_does_not_fit() {
        let kit = kit(10.0);
        let owner = OwnerId::new("o");
        spent_one_of_nine(&kit, &owner).await;
        let mut events = kit.events.subscribe();

        let d = decomposer(&kit, Arc::new(StaticPlanner(vec![2.0, 3.0, 4.0])), BudgetPolicy::Shrink);
        let tasks = d.decompose("make images", &owner).await.unwrap();

        let costs: Vec<f64> = tasks.iter().map(|t| t.estimated_cost).collect();
        assert_eq!(costs, vec![2.0, 3.0]);
        let window = kit.services.ledger.window(&owner).await.unwrap();
        assert!((window.spent - 6.0).abs() < 1e-9);
        assert!(window.spent <= window.allowance);

        let first = events.recv().await.unwrap();
        assert_eq!(first.event_type, EventType::BudgetRefused);
    }

    #[tokio::test]
    async fn all_or_nothing_fails_whole_plan() {
        let kit = kit(10.0);
        let owner = OwnerId::new("o");
        spent_one_of_nine(&kit, &owner).await;

        let d = decomposer(
            &kit,
            Arc::new(StaticPlanner(vec![2.0, 3.0, 4.0])),
            BudgetPolicy::AllOrNothing,
        );
        let err = d.decompose("make images", &owner).await.unwrap_err();
        assert!(matches!(err, SwarmError::BudgetExceeded { .. }));

        // nothing stored, nothing queued, nothing spent
        assert!(kit.services.store.tasks_for_owner(&owner).await.unwrap().is_empty());
        assert_eq!(kit.queue.len(&task_channel(&owner)).await.unwrap(), 0);
        assert!((kit.services.ledger.window(&owner).await.unwrap().spent - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn shrink_with_nothing_fitting_is_budget_exceeded() {
        let kit = kit(1.0);
        let owner = OwnerId::new("o");
        let d = decomposer(&kit, Arc::new(StaticPlanner(vec![2.0, 3.0])), BudgetPolicy::Shrink);
        let err = d.decompose("too expensive", &owner).await.unwrap_err();
        assert!(matches!(err, SwarmError::BudgetExceeded { .. }));
    }

    #[tokio::test]
    async fn admitted_tasks_are_stored_then_queued() {
        let kit = kit(10.0);
        let owner = OwnerId::new("test_agent_001");
        let d = decomposer(&kit, Arc::new(KeywordPlanner::default()), BudgetPolicy::Shrink);

        let tasks = d.decompose("Create 2 posts", &owner).await.unwrap();
        assert_eq!(tasks.len(), 2);

        let channel = "agent:test_agent_001:tasks";
        assert_eq!(kit.queue.len(channel).await.unwrap(), 2);
        for t in &tasks {
            let stored = kit.services.store.get_task(t.id).await.unwrap().unwrap();
            assert_eq!(stored.status, TaskStatus::Pending);
            assert_eq!(stored.retry_count, 0);
            assert_eq!(stored.max_retries, 3);
            assert_eq!(stored.actual_cost, None);
        }
        let first: Option<crate::domain::ids::TaskId> = kit
            .queue
            .pop_json(channel, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(first, Some(tasks[0].id));
    }

    #[tokio::test]
    async fn saturated_queue_fails_with_capacity_error() {
        let kit = kit(10.0);
        let owner = OwnerId::new("test_agent_001");
        for i in 0..101 {
            kit.queue
                .push(&task_channel(&owner), format!("task_{i}").into_bytes())
                .await
                .unwrap();
        }
        let d = decomposer(&kit, Arc::new(KeywordPlanner::default()), BudgetPolicy::Shrink);

        let err = d.decompose("Create more posts", &owner).await.unwrap_err();
        assert!(matches!(err, SwarmError::QueueSaturated { depth: 101, ceiling: 100, .. }));
        assert!(err.to_string().contains("queue capacity"));
        // nothing reserved while saturated
        assert_eq!(kit.services.ledger.window(&owner).await.unwrap().spent, 0.0);
    }

    #[tokio::test]
    async fn admission_resumes_once_depth_drops() {
        let kit = kit(10.0);
        let owner = OwnerId::new("o");
        let channel = task_channel(&owner);
        for i in 0..100 {
            kit.queue.push(&channel, format!("{i}").into_bytes()).await.unwrap();
        }
        let d = Decomposer::new(
            kit.services.clone(),
            Arc::new(KeywordPlanner::default()),
            BudgetPolicy::Shrink,
            QueueConfig {
                backpressure_timeout: Duration::from_secs(5),
                backpressure_poll: Duration::from_millis(10),
                ..QueueConfig::default()
            },
        );

        let drain = tokio::spawn({
            let queue = kit.queue.clone();
            let channel = channel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                queue.pop(&channel, Duration::from_millis(10)).await.unwrap();
            }
        });

        let tasks = d.decompose("write a caption", &owner).await.unwrap();
        drain.await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(kit.queue.len(&channel).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn admission_stops_at_the_depth_ceiling() {
        let kit = kit(10.0);
        let owner = OwnerId::new("o");
        let channel = task_channel(&owner);
        for i in 0..98 {
            kit.queue.push(&channel, format!("{i}").into_bytes()).await.unwrap();
        }
        let d = decomposer(&kit, Arc::new(StaticPlanner(vec![1.0; 5])), BudgetPolicy::Shrink);

        let tasks = d.decompose("make images", &owner).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(kit.queue.len(&channel).await.unwrap(), 100);
        // only the queued tasks keep their reservation, and only they exist
        assert!((kit.services.ledger.window(&owner).await.unwrap().spent - 2.0).abs() < 1e-9);
        assert_eq!(kit.services.store.tasks_for_owner(&owner).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_push_releases_the_unqueued_reservations() {
        let owner = OwnerId::new("o");
        let channel = task_channel(&owner);
        let kit = kit_with_queue(10.0, |q| PushOutage::after(q, channel.clone(), 1));
        let d = decomposer(&kit, Arc::new(StaticPlanner(vec![1.5; 3])), BudgetPolicy::Shrink);

        let err = d.decompose("make images", &owner).await.unwrap_err();
        assert!(matches!(err, SwarmError::QueueUnavailable(_)));

        assert_eq!(kit.queue.len(&channel).await.unwrap(), 1);
        assert!((kit.services.ledger.window(&owner).await.unwrap().spent - 1.5).abs() < 1e-9);
        let mut stored = kit.services.store.tasks_for_owner(&owner).await.unwrap();
        stored.sort_by_key(|t| t.status != TaskStatus::Pending);
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].status, TaskStatus::Pending);
        assert_eq!(stored[1].status, TaskStatus::Failed);
        assert_eq!(stored[1].failure, Some(FailureReason::NotQueued));
    }

    #[tokio::test]
    async fn push_down_from_the_start_leaves_nothing_reserved() {
        let owner = OwnerId::new("o");
        let kit = kit_with_queue(10.0, |q| PushOutage::after(q, task_channel(&owner), 0));
        let planner = KeywordPlanner::default();
        let d = decomposer(&kit, Arc::new(planner), BudgetPolicy::AllOrNothing);

        let err = d.decompose("Create 3 videos", &owner).await.unwrap_err();
        assert!(matches!(err, SwarmError::QueueUnavailable(_)));
        assert_eq!(kit.services.ledger.window(&owner).await.unwrap().spent, 0.0);
        let stored = kit.services.store.tasks_for_owner(&owner).await.unwrap();
        assert!(stored.iter().all(|t| t.status == TaskStatus::Failed));
    }

    #[tokio::test]
    async fn empty_objective_is_invalid_and_creates_nothing() {
        let kit = kit(10.0);
        let owner = OwnerId::new("o");
        let d = decomposer(&kit, Arc::new(KeywordPlanner::default()), BudgetPolicy::Shrink);

        let err = d.decompose("", &owner).await.unwrap_err();
        assert!(matches!(err, SwarmError::InvalidObjective(_)));
        assert!(kit.services.store.tasks_for_owner(&owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_cost_plan_fits_any_budget() {
        let kit = kit(0.0);
        let owner = OwnerId::new("o");
        let planner = KeywordPlanner::new(&crate::config::PlannerConfig {
            costs: BTreeMap::new(),
            ..Default::default()
        });
        let d = decomposer(&kit, Arc::new(planner), BudgetPolicy::AllOrNothing);
        assert_eq!(d.decompose("reply to comments", &owner).await.unwrap().len(), 1);
    }
}
