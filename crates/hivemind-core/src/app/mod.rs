//! App layer: the components wired over the ports.
//!
//! - **Decomposer**: objective -> admitted, queued tasks
//! - **Executor / ExecutorPool**: pop -> skill -> result -> review channel
//! - **Validator / ValidatorLoop**: score -> approve | escalate | reject
//! - **StateCommitter**: OCC writes of approved results into owner state
//! - **EscalationReaper**: auto-rejects escalations nobody reviewed
//! - **SwarmBuilder / Swarm**: wiring, fail-fast checks, the public facade

pub mod builder;
pub mod committer;
pub mod decomposer;
pub mod executor;
pub mod reaper_loop;
pub mod status;
pub mod validator;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::domain::events::{EngineEvent, EventType};
use crate::domain::task::Task;
use crate::ports::{BudgetLedger, Clock, EventSink, IdGenerator, QueueService, TaskStore};

pub use self::builder::{BuildError, Swarm, SwarmBuilder};
pub use self::committer::{OwnerState, RecordingReducer, StagedCommit, StateCommitter, StateReducer};
pub use self::decomposer::Decomposer;
pub use self::executor::{Executor, ExecutorPool};
pub use self::reaper_loop::EscalationReaper;
pub use self::status::{StatusReport, TaskCounts};
pub use self::validator::{Evaluation, RoutingThresholds, Validator, ValidatorLoop, route};

/// The ports every component shares.
#[derive(Clone)]
pub struct Services {
    pub queue: Arc<dyn QueueService>,
    pub store: Arc<dyn TaskStore>,
    pub ledger: Arc<dyn BudgetLedger>,
    pub events: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

impl Services {
    pub(crate) fn emit(&self, event: EngineEvent) {
        self.events.emit(event);
    }

    pub(crate) fn task_event(&self, task: &Task, event_type: EventType) -> EngineEvent {
        EngineEvent::for_task(self.clock.now(), task.owner_id.clone(), task.id, event_type)
    }
}

/// Sleep for `delay` unless shutdown is requested first.
/// Returns `true` when the caller should stop.
pub(crate) async fn sleep_or_shutdown(
    delay: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = shutdown_rx.changed() => changed.is_err() || *shutdown_rx.borrow(),
    }
}

#[cfg(test)]
pub(crate) mod testkit {
    //! Shared wiring for the app-layer unit tests.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use super::Services;
    use crate::domain::errors::SwarmError;
    use crate::domain::ids::OwnerId;
    use crate::impls::{BroadcastEventSink, InMemoryBudgetLedger, InMemoryQueueService, InMemoryTaskStore};
    use crate::ports::{FixedClock, QueueService, UlidGenerator, VersionedState};

    pub struct Kit {
        pub services: Services,
        pub queue: Arc<InMemoryQueueService>,
        pub clock: Arc<FixedClock>,
        pub events: BroadcastEventSink,
    }

    pub fn kit(allowance: f64) -> Kit {
        kit_with_queue(allowance, |queue| queue)
    }

    /// Like `kit`, but the services see the queue through `wrap`.
    /// `Kit::queue` stays the bare in-memory queue for inspection.
    pub fn kit_with_queue(
        allowance: f64,
        wrap: impl FnOnce(Arc<InMemoryQueueService>) -> Arc<dyn QueueService>,
    ) -> Kit {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap(),
        ));
        let queue = Arc::new(InMemoryQueueService::new());
        let events = BroadcastEventSink::new(4096);
        let services = Services {
            queue: wrap(queue.clone()),
            store: Arc::new(InMemoryTaskStore::new()),
            ledger: Arc::new(InMemoryBudgetLedger::new(
                clock.clone(),
                allowance,
                chrono::Duration::hours(24),
            )),
            events: Arc::new(events.clone()),
            clock: clock.clone(),
            ids: Arc::new(UlidGenerator::new(clock.clone())),
        };
        Kit {
            services,
            queue,
            clock,
            events,
        }
    }

    /// Lets `allowed` pushes onto `channel` through, then fails the rest
    /// with `QueueUnavailable`. Every other call passes straight through.
    pub struct PushOutage {
        inner: Arc<InMemoryQueueService>,
        channel: String,
        allowed: AtomicUsize,
    }

    impl PushOutage {
        pub fn after(inner: Arc<InMemoryQueueService>, channel: String, allowed: usize) -> Arc<dyn QueueService> {
            Arc::new(Self {
                inner,
                channel,
                allowed: AtomicUsize::new(allowed),
            })
        }
    }

    #[async_trait]
    impl QueueService for PushOutage {
        async fn push(&self, channel: &str, item: Vec<u8>) -> Result<(), SwarmError> {
            if channel == self.channel
                && self
                    .allowed
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_err()
            {
                return Err(SwarmError::QueueUnavailable("push down".to_string()));
            }
            self.inner.push(channel, item).await
        }
        async fn pop(&self, channel: &str, timeout: Duration) -> Result<Option<Vec<u8>>, SwarmError> {
            self.inner.pop(channel, timeout).await
        }
        async fn len(&self, channel: &str) -> Result<usize, SwarmError> {
            self.inner.len(channel).await
        }
        async fn get_version(&self, owner: &OwnerId) -> Result<u64, SwarmError> {
            self.inner.get_version(owner).await
        }
        async fn increment_version(&self, owner: &OwnerId) -> Result<u64, SwarmError> {
            self.inner.increment_version(owner).await
        }
        async fn read_state(&self, owner: &OwnerId) -> Result<VersionedState, SwarmError> {
            self.inner.read_state(owner).await
        }
        async fn compare_and_swap(
            &self,
            owner: &OwnerId,
            expected: u64,
            state: Vec<u8>,
        ) -> Result<u64, SwarmError> {
            self.inner.compare_and_swap(owner, expected, state).await
        }
    }
}
