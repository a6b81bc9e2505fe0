//! Ports.
//!
//! Each trait here is a seam to something the engine does not own: the
//! queue/state store shared by every instance, the authoritative task
//! store, the budget ledger, skills, the safety screen, the planner and the
//! observability sink. `impls` holds in-memory versions of each.

pub mod budget_ledger;
pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod planner;
pub mod queue;
pub mod safety;
pub mod skill;
pub mod task_store;

pub use self::budget_ledger::BudgetLedger;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::EventSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::planner::{ObjectivePlanner, PlannedTask};
pub use self::queue::{QueueExt, QueueService, VersionedState};
pub use self::safety::{SafetyScreen, SafetyVerdict};
pub use self::skill::{
    CancellationCheck, NeverCancelled, Skill, SkillContext, SkillError, SkillOutput,
};
pub use self::task_store::{ResultMutation, TaskMutation, TaskStore};
