//! TaskStore port: the authoritative copy of every Task and Result.
//!
//! Queues only deliver ids; whoever pops one reloads the record from here.
//! Mutations go through `update_*`, which applies a closure atomically to
//! the stored record. If the closure fails, nothing is written.

use async_trait::async_trait;

use crate::domain::errors::SwarmError;
use crate::domain::ids::{OwnerId, ResultId, TaskId};
use crate::domain::result::TaskResult;
use crate::domain::task::Task;

pub type TaskMutation<'a> = Box<dyn FnOnce(&mut Task) -> Result<(), SwarmError> + Send + 'a>;

pub type ResultMutation<'a> =
    Box<dyn FnOnce(&mut TaskResult) -> Result<(), SwarmError> + Send + 'a>;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, task: Task) -> Result<(), SwarmError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, SwarmError>;

    /// Apply `mutation` and return the updated task. `TaskNotFound` if absent.
    async fn update_task(&self, id: TaskId, mutation: TaskMutation<'_>)
    -> Result<Task, SwarmError>;

    async fn tasks_for_owner(&self, owner: &OwnerId) -> Result<Vec<Task>, SwarmError>;

    async fn insert_result(&self, result: TaskResult) -> Result<(), SwarmError>;

    async fn get_result(&self, id: ResultId) -> Result<Option<TaskResult>, SwarmError>;

    async fn update_result(
        &self,
        id: ResultId,
        mutation: ResultMutation<'_>,
    ) -> Result<TaskResult, SwarmError>;

    /// Every result produced for `task_id`, oldest first.
    async fn results_for_task(&self, task_id: TaskId) -> Result<Vec<TaskResult>, SwarmError>;

    /// Escalated results with no reviewer verdict yet, oldest first.
    /// `None` means every owner.
    async fn awaiting_review(&self, owner: Option<&OwnerId>)
    -> Result<Vec<TaskResult>, SwarmError>;
}
