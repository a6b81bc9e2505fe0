//! In-memory TaskStore.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::errors::SwarmError;
use crate::domain::ids::{OwnerId, ResultId, TaskId};
use crate::domain::result::TaskResult;
use crate::domain::task::Task;
use crate::ports::{ResultMutation, TaskMutation, TaskStore};

#[derive(Default)]
struct StoreState {
    tasks: HashMap<TaskId, Task>,
    results: HashMap<ResultId, TaskResult>,
    /// Result ids per task in insertion order.
    results_by_task: HashMap<TaskId, Vec<ResultId>>,
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    state: Mutex<StoreState>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert_task(&self, task: Task) -> Result<(), SwarmError> {
        let mut state = self.state.lock().await;
        state.tasks.insert(task.id, task);
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, SwarmError> {
        let state = self.state.lock().await;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn update_task(
        &self,
        id: TaskId,
        mutation: TaskMutation<'_>,
    ) -> Result<Task, SwarmError> {
        let mut state = self.state.lock().await;
        let stored = state
            .tasks
            .get_mut(&id)
            .ok_or(SwarmError::TaskNotFound(id))?;

        // work on a copy so a failed mutation leaves the record untouched
        let mut draft = stored.clone();
        mutation(&mut draft)?;
        *stored = draft.clone();
        Ok(draft)
    }

    async fn tasks_for_owner(&self, owner: &OwnerId) -> Result<Vec<Task>, SwarmError> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| &t.owner_id == owner)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    async fn insert_result(&self, result: TaskResult) -> Result<(), SwarmError> {
        let mut state = self.state.lock().await;
        state
            .results_by_task
            .entry(result.task_id)
            .or_default()
            .push(result.id);
        state.results.insert(result.id, result);
        Ok(())
    }

    async fn get_result(&self, id: ResultId) -> Result<Option<TaskResult>, SwarmError> {
        let state = self.state.lock().await;
        Ok(state.results.get(&id).cloned())
    }

    async fn update_result(
        &self,
        id: ResultId,
        mutation: ResultMutation<'_>,
    ) -> Result<TaskResult, SwarmError> {
        let mut state = self.state.lock().await;
        let stored = state
            .results
            .get_mut(&id)
            .ok_or(SwarmError::ResultNotFound(id))?;

        let mut draft = stored.clone();
        mutation(&mut draft)?;
        *stored = draft.clone();
        Ok(draft)
    }

    async fn results_for_task(&self, task_id: TaskId) -> Result<Vec<TaskResult>, SwarmError> {
        let state = self.state.lock().await;
        let ids = state.results_by_task.get(&task_id);
        Ok(ids
            .into_iter()
            .flatten()
            .filter_map(|id| state.results.get(id).cloned())
            .collect())
    }

    async fn awaiting_review(
        &self,
        owner: Option<&OwnerId>,
    ) -> Result<Vec<TaskResult>, SwarmError> {
        let state = self.state.lock().await;
        let mut pending: Vec<TaskResult> = state
            .results
            .values()
            .filter(|r| r.awaiting_review())
            .filter(|r| owner.is_none_or(|o| &r.owner_id == o))
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.decided_at());
        Ok(pending)
    }
}
