//! ObjectivePlanner port: turns an objective into an ordered plan.
//!
//! Planning is pure. Budget admission, storage and queueing are the
//! decomposer's job.

use crate::domain::errors::SwarmError;
use crate::domain::ids::OwnerId;
use crate::domain::task::{Payload, Priority, TaskKind};

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTask {
    pub kind: TaskKind,
    pub priority: Priority,
    pub context: Payload,
    pub estimated_cost: f64,
}

pub trait ObjectivePlanner: Send + Sync {
    /// A non-empty plan, or `InvalidObjective`.
    fn plan(&self, objective: &str, owner: &OwnerId) -> Result<Vec<PlannedTask>, SwarmError>;

    /// Every kind this planner can emit.
    fn kinds(&self) -> Vec<TaskKind>;
}
