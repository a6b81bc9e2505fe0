//! SwarmBuilder / Swarm: wiring, fail-fast checks and the public facade.
//!
//! ```ignore
//! let swarm = SwarmBuilder::new()
//!     .register::<CaptionInput, _>(CaptionSkill)?
//!     .expect_kinds(&[TaskKind::GenerateCaption])
//!     .build()?;
//! let tasks = swarm.decompose("Create 3 posts about coffee", &owner).await?;
//! swarm.start_owner(&owner).await;
//! ```
//!
//! Every port defaults to its in-memory implementation. `build()` checks
//! that each expected task kind has a skill, so a planner cannot produce
//! work nobody can run.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{Instrument, info};

use super::Services;
use super::committer::{RecordingReducer, StateCommitter, StateReducer};
use super::decomposer::Decomposer;
use super::executor::{Executor, ExecutorPool};
use super::reaper_loop::EscalationReaper;
use super::status::StatusReport;
use super::validator::{Validator, ValidatorLoop};
use crate::config::{ConfigError, SwarmConfig};
use crate::domain::budget::BudgetWindow;
use crate::domain::errors::SwarmError;
use crate::domain::escalation::ReviewVerdict;
use crate::domain::events::EventType;
use crate::domain::ids::{ExecutorId, OwnerId, ResultId, TaskId};
use crate::domain::result::{Decision, TaskResult};
use crate::domain::task::{FailureReason, Task, TaskKind, TaskStatus};
use crate::impls::{
    InMemoryBudgetLedger, InMemoryQueueService, InMemoryTaskStore, KeywordPlanner,
    KeywordSafetyScreen, TracingEventSink,
};
use crate::observability::owner_span;
use crate::ports::queue::{review_channel, task_channel};
use crate::ports::{
    BudgetLedger, Clock, EventSink, IdGenerator, ObjectivePlanner, QueueExt, QueueService,
    SafetyScreen, Skill, SystemClock, TaskStore, UlidGenerator,
};
use crate::typed::{RegistryError, SkillHandler, SkillInput, SkillRegistry};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing skills for task kinds {0:?}; these kinds are expected but not registered")]
    MissingSkills(Vec<TaskKind>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Which kinds must have a skill at build time.
enum Expected {
    Nothing,
    Kinds(Vec<TaskKind>),
    Planner,
}

pub struct SwarmBuilder {
    config: SwarmConfig,
    queue: Option<Arc<dyn QueueService>>,
    store: Option<Arc<dyn TaskStore>>,
    ledger: Option<Arc<dyn BudgetLedger>>,
    events: Option<Arc<dyn EventSink>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    planner: Option<Arc<dyn ObjectivePlanner>>,
    safety: Option<Arc<dyn SafetyScreen>>,
    reducer: Option<Arc<dyn StateReducer>>,
    registry: SkillRegistry,
    expected: Expected,
}

impl SwarmBuilder {
    pub fn new() -> Self {
        Self::with_config(SwarmConfig::default())
    }

    pub fn with_config(config: SwarmConfig) -> Self {
        Self {
            config,
            queue: None,
            store: None,
            ledger: None,
            events: None,
            clock: None,
            ids: None,
            planner: None,
            safety: None,
            reducer: None,
            registry: SkillRegistry::new(),
            expected: Expected::Nothing,
        }
    }

    pub fn with_queue(mut self, queue: Arc<dyn QueueService>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn BudgetLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_planner(mut self, planner: Arc<dyn ObjectivePlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_safety(mut self, safety: Arc<dyn SafetyScreen>) -> Self {
        self.safety = Some(safety);
        self
    }

    pub fn with_reducer(mut self, reducer: Arc<dyn StateReducer>) -> Self {
        self.reducer = Some(reducer);
        self
    }

    /// Register a typed skill handler for `I::KIND`.
    pub fn register<I, H>(mut self, handler: H) -> Result<Self, RegistryError>
    where
        I: SkillInput,
        H: SkillHandler<I> + 'static,
    {
        self.registry.register::<I, H>(handler)?;
        Ok(self)
    }

    pub fn register_dyn(mut self, skill: Arc<dyn Skill>) -> Result<Self, RegistryError> {
        self.registry.register_dyn(skill)?;
        Ok(self)
    }

    /// Require a skill for each of `kinds` at build time.
    pub fn expect_kinds(mut self, kinds: &[TaskKind]) -> Self {
        self.expected = Expected::Kinds(kinds.to_vec());
        self
    }

    /// Require a skill for every kind the planner can emit.
    pub fn expect_planner_kinds(mut self) -> Self {
        self.expected = Expected::Planner;
        self
    }

    pub fn build(self) -> Result<Swarm, BuildError> {
        self.config.validate()?;
        let config = self.config;

        let planner = self
            .planner
            .unwrap_or_else(|| Arc::new(KeywordPlanner::new(&config.planner)));

        let expected = match self.expected {
            Expected::Nothing => Vec::new(),
            Expected::Kinds(kinds) => kinds,
            Expected::Planner => planner.kinds(),
        };
        let registered = self.registry.kinds();
        let mut missing: Vec<TaskKind> = expected
            .into_iter()
            .filter(|k| !registered.contains(k))
            .collect();
        missing.sort();
        missing.dedup();
        if !missing.is_empty() {
            return Err(BuildError::MissingSkills(missing));
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let services = Services {
            queue: self
                .queue
                .unwrap_or_else(|| Arc::new(InMemoryQueueService::new())),
            store: self.store.unwrap_or_else(|| Arc::new(InMemoryTaskStore::new())),
            ledger: self.ledger.unwrap_or_else(|| {
                Arc::new(InMemoryBudgetLedger::new(
                    clock.clone(),
                    config.budget.default_allowance,
                    config.budget.window_length(),
                ))
            }),
            events: self.events.unwrap_or_else(|| Arc::new(TracingEventSink)),
            ids: self
                .ids
                .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone()))),
            clock,
        };

        let safety = self
            .safety
            .unwrap_or_else(|| Arc::new(KeywordSafetyScreen::new(&config.validator.sensitive_terms)));
        let reducer = self.reducer.unwrap_or_else(|| Arc::new(RecordingReducer));
        let committer = StateCommitter::new(services.queue.clone(), reducer);

        let decomposer = Decomposer::new(
            services.clone(),
            planner,
            config.budget.policy,
            config.queue.clone(),
        )
        .with_max_retries(config.executor.max_retries);
        let validator = Arc::new(Validator::new(
            services.clone(),
            committer,
            safety,
            &config.validator,
            config.escalation.timeout(),
        ));

        Ok(Swarm {
            config,
            services,
            registry: Arc::new(self.registry),
            decomposer,
            validator,
            owners: Mutex::new(HashMap::new()),
            reaper: Mutex::new(None),
        })
    }
}

impl Default for SwarmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct OwnerWorkers {
    executors: ExecutorPool,
    validators: ValidatorLoop,
}

impl OwnerWorkers {
    async fn shutdown_and_join(self) {
        self.executors.request_shutdown();
        self.validators.request_shutdown();
        self.executors.shutdown_and_join().await;
        self.validators.shutdown_and_join().await;
    }
}

/// The running engine. Cheap operations are plain async calls; background
/// work (executors, validators, the escalation reaper) is started per owner
/// and stopped with `stop_owner` or `shutdown`.
pub struct Swarm {
    config: SwarmConfig,
    services: Services,
    registry: Arc<SkillRegistry>,
    decomposer: Decomposer,
    validator: Arc<Validator>,
    owners: Mutex<HashMap<OwnerId, OwnerWorkers>>,
    reaper: Mutex<Option<EscalationReaper>>,
}

impl Swarm {
    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    pub fn validator(&self) -> Arc<Validator> {
        Arc::clone(&self.validator)
    }

    /// A standalone executor sharing this engine's ports, for driving
    /// deliveries by hand.
    pub fn executor(&self, name: impl Into<String>) -> Executor {
        Executor::new(
            ExecutorId::new(name),
            self.services.clone(),
            Arc::clone(&self.registry),
        )
    }

    pub async fn decompose(&self, objective: &str, owner: &OwnerId) -> Result<Vec<Task>, SwarmError> {
        self.decomposer
            .decompose(objective, owner)
            .instrument(owner_span("decompose", owner.as_str()))
            .await
    }

    /// Start executors and a validator for `owner`. Returns `false` when
    /// they are already running.
    pub async fn start_owner(&self, owner: &OwnerId) -> bool {
        let mut owners = self.owners.lock().await;
        if owners.contains_key(owner) {
            return false;
        }
        let executor = &self.config.executor;
        let workers = OwnerWorkers {
            executors: ExecutorPool::spawn(
                executor.pool_size,
                owner.clone(),
                self.services.clone(),
                Arc::clone(&self.registry),
                self.config.queue.pop_timeout,
                executor.backoff.clone(),
            ),
            validators: ValidatorLoop::spawn(
                1,
                owner.clone(),
                Arc::clone(&self.validator),
                self.config.queue.pop_timeout,
                executor.backoff.clone(),
            ),
        };
        owners.insert(owner.clone(), workers);
        info!(owner = %owner, executors = executor.pool_size, "owner started");
        true
    }

    /// Stop `owner`'s workers, letting in-flight work finish.
    pub async fn stop_owner(&self, owner: &OwnerId) -> bool {
        let workers = self.owners.lock().await.remove(owner);
        match workers {
            Some(w) => {
                w.shutdown_and_join().await;
                info!(owner = %owner, "owner stopped");
                true
            }
            None => false,
        }
    }

    pub async fn start_reaper(&self) {
        let mut reaper = self.reaper.lock().await;
        if reaper.is_none() {
            *reaper = Some(EscalationReaper::spawn(
                Arc::clone(&self.validator),
                self.config.escalation.reaper_interval,
            ));
        }
    }

    /// Request cancellation. Pending tasks and tasks waiting in review
    /// fail at once and give back their reservation; a task being executed
    /// fails at its next checkpoint. Terminal tasks are returned unchanged.
    pub async fn cancel(&self, task_id: TaskId) -> Result<Task, SwarmError> {
        let now = self.services.clock.now();
        let mut requested = false;
        let mut failed = false;
        let task = self
            .services
            .store
            .update_task(
                task_id,
                Box::new(|t: &mut Task| -> Result<(), SwarmError> {
                    if t.status.is_terminal() {
                        return Ok(());
                    }
                    t.cancel_requested = true;
                    requested = true;
                    if matches!(t.status, TaskStatus::Pending | TaskStatus::Review) {
                        t.fail(FailureReason::Cancelled, now)?;
                        failed = true;
                    }
                    Ok(())
                }),
            )
            .await?;

        if requested {
            info!(owner = %task.owner_id, task = %task.id, status = %task.status, "cancel requested");
            self.services
                .emit(self.services.task_event(&task, EventType::TaskCancelRequested));
        }
        if failed {
            let unspent = task.unspent_reservation();
            if unspent > 0.0 {
                self.services.ledger.adjust(&task.owner_id, -unspent).await?;
            }
            self.services.emit(
                self.services
                    .task_event(&task, EventType::TaskFailed)
                    .with("reason", "cancelled"),
            );
        }
        Ok(task)
    }

    /// A reviewer's verdict on an escalated result.
    pub async fn review(&self, result_id: ResultId, verdict: ReviewVerdict) -> Result<Decision, SwarmError> {
        self.validator.resolve_escalation(result_id, verdict).await
    }

    pub async fn expire_escalations(&self) -> Result<usize, SwarmError> {
        self.validator.expire_escalations().await
    }

    pub async fn set_allowance(&self, owner: &OwnerId, allowance: f64) -> Result<BudgetWindow, SwarmError> {
        self.services.ledger.set_allowance(owner, allowance).await
    }

    pub async fn status(&self, owner: &OwnerId) -> Result<StatusReport, SwarmError> {
        StatusReport::collect(&self.services, self.validator.committer(), owner).await
    }

    pub async fn task(&self, task_id: TaskId) -> Result<Option<Task>, SwarmError> {
        self.services.store.get_task(task_id).await
    }

    pub async fn results_for(&self, task_id: TaskId) -> Result<Vec<TaskResult>, SwarmError> {
        self.services.store.results_for_task(task_id).await
    }

    /// Put the unfinished work of `owner` back on its channels:
    /// - pending and in-progress tasks onto the task channel;
    /// - undecided results of live tasks onto the review channel.
    ///
    /// For recovery after the workers holding those deliveries are gone or
    /// a queue outage dropped a push. Executors and validators tolerate the
    /// duplicates. Returns how many items were pushed.
    pub async fn redeliver_pending(&self, owner: &OwnerId) -> Result<usize, SwarmError> {
        let tasks_channel = task_channel(owner);
        let reviews_channel = review_channel(owner);
        let (mut tasks, mut results) = (0usize, 0usize);
        for task in self.services.store.tasks_for_owner(owner).await? {
            if task.status.is_terminal() {
                continue;
            }
            if matches!(task.status, TaskStatus::Pending | TaskStatus::InProgress) {
                self.services.queue.push_json(&tasks_channel, &task.id).await?;
                tasks += 1;
            }
            for result in self.services.store.results_for_task(task.id).await? {
                if result.decision().is_none() {
                    self.services.queue.push_json(&reviews_channel, &result.id).await?;
                    results += 1;
                }
            }
        }
        if tasks + results > 0 {
            info!(owner = %owner, tasks, results, "redelivered unfinished work");
        }
        Ok(tasks + results)
    }

    /// Stop every owner's workers and the reaper.
    pub async fn shutdown(&self) {
        let owners: Vec<_> = self.owners.lock().await.drain().collect();
        for (owner, workers) in owners {
            workers.shutdown_and_join().await;
            info!(owner = %owner, "owner stopped");
        }
        if let Some(reaper) = self.reaper.lock().await.take() {
            reaper.shutdown_and_join().await;
        }
    }
}
