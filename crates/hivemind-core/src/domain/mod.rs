//! Domain model (ids, tasks, results, budget windows, escalations, events).

pub mod budget;
pub mod errors;
pub mod escalation;
pub mod events;
pub mod ids;
pub mod result;
pub mod retry;
pub mod task;

pub use budget::BudgetWindow;
pub use errors::{ErrorKind, SwarmError};
pub use escalation::{EscalationRecord, ReviewDecision, ReviewVerdict};
pub use events::{EngineEvent, EventType};
pub use ids::{ExecutorId, OwnerId, ResultId, TaskId};
pub use result::{ConfidenceScore, Decision, ResultStatus, ReviewOutcome, TaskResult};
pub use retry::RetryPolicy;
pub use task::{
    FailureReason, Payload, Priority, RequeueReason, RetryOutcome, Task, TaskKind, TaskStatus,
};
