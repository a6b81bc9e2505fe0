//! Structured events emitted on every task transition and every decision.
//!
//! Events go to the `EventSink` port. The default sink turns them into
//! `tracing` records; tests subscribe to a broadcast sink and assert on the
//! sequence. Emission never fails and never blocks the caller.
//!
//! ## Shape
//! - `owner_id` is always present, `task_id` whenever the event concerns a
//!   single task.
//! - `fields` carries the event-specific details (`reason`, `version`,
//!   `confidence`, ...) as a flat JSON object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{OwnerId, TaskId};

/// What happened. Serialized in snake_case, matching `as_str`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Admitted, stored and pushed by the decomposer.
    TaskCreated,
    /// An executor claimed a delivery.
    TaskStarted,
    /// A result was stored and queued for review.
    TaskSubmitted,
    /// Back to `pending` after a rejection or a state conflict.
    TaskRequeued,
    TaskCompleted,
    TaskFailed,
    TaskCancelRequested,
    /// The validator wrote a decision onto a result.
    ResultDecided,
    /// A record was pushed onto the escalation channel.
    ResultEscalated,
    /// A reviewer, or the escalation timeout, settled an escalation.
    EscalationResolved,
    StateCommitted,
    /// A compare-and-swap lost against a concurrent commit.
    StateConflict,
    /// Budget refused part or all of a plan.
    BudgetRefused,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::TaskCreated => "task_created",
            EventType::TaskStarted => "task_started",
            EventType::TaskSubmitted => "task_submitted",
            EventType::TaskRequeued => "task_requeued",
            EventType::TaskCompleted => "task_completed",
            EventType::TaskFailed => "task_failed",
            EventType::TaskCancelRequested => "task_cancel_requested",
            EventType::ResultDecided => "result_decided",
            EventType::ResultEscalated => "result_escalated",
            EventType::EscalationResolved => "escalation_resolved",
            EventType::StateCommitted => "state_committed",
            EventType::StateConflict => "state_conflict",
            EventType::BudgetRefused => "budget_refused",
        }
    }
}

/// One structured event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub timestamp: DateTime<Utc>,
    pub owner_id: OwnerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub event_type: EventType,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl EngineEvent {
    pub fn new(timestamp: DateTime<Utc>, owner_id: OwnerId, event_type: EventType) -> Self {
        Self {
            timestamp,
            owner_id,
            task_id: None,
            event_type,
            fields: serde_json::Map::new(),
        }
    }

    pub fn for_task(
        timestamp: DateTime<Utc>,
        owner_id: OwnerId,
        task_id: TaskId,
        event_type: EventType,
    ) -> Self {
        let mut event = Self::new(timestamp, owner_id, event_type);
        event.task_id = Some(task_id);
        event
    }

    /// Attach one detail field; later keys overwrite earlier ones.
    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}
