//! Skill port.
//!
//! A skill is the only code that understands a task's `context` or a
//! result's `artifact`. The engine hands it a `SkillContext` and gets back
//! an artifact with a self-assessed confidence, or a `SkillError`.
//!
//! `Skill` is the object-safe form stored in the registry. Most skills are
//! written against the typed layer (`typed::SkillHandler<I>`) and erased
//! into a `Skill` on registration.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::ids::{OwnerId, TaskId};
use crate::domain::task::{Payload, TaskKind};

/// What a skill reports for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillOutput {
    pub artifact: Payload,
    /// Self-assessed, checked against [0, 1] by the executor.
    pub confidence: f64,
    pub rationale: String,
    pub cost: f64,
    /// The skill produced something usable but incomplete.
    pub partial: bool,
}

impl SkillOutput {
    pub fn new(artifact: Payload, confidence: f64, rationale: impl Into<String>) -> Self {
        Self {
            artifact,
            confidence,
            rationale: rationale.into(),
            cost: 0.0,
            partial: false,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn partial(mut self) -> Self {
        self.partial = true;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    /// `context` did not decode into the skill's input type.
    #[error("invalid context: {0}")]
    InvalidContext(String),

    #[error("{0}")]
    Failed(String),

    /// The skill stopped at a checkpoint after a cancel request.
    #[error("cancelled")]
    Cancelled,
}

/// Answers "has this task been cancelled?" at a checkpoint.
#[async_trait]
pub trait CancellationCheck: Send + Sync {
    async fn is_cancelled(&self) -> bool;
}

/// Never cancelled.
pub struct NeverCancelled;

#[async_trait]
impl CancellationCheck for NeverCancelled {
    async fn is_cancelled(&self) -> bool {
        false
    }
}

pub struct SkillContext {
    pub task_id: TaskId,
    pub owner_id: OwnerId,
    pub kind: TaskKind,
    /// Retries already spent on this task.
    pub attempt: u32,
    pub payload: Payload,
    cancellation: Arc<dyn CancellationCheck>,
}

impl SkillContext {
    pub fn new(
        task_id: TaskId,
        owner_id: OwnerId,
        kind: TaskKind,
        attempt: u32,
        payload: Payload,
        cancellation: Arc<dyn CancellationCheck>,
    ) -> Self {
        Self {
            task_id,
            owner_id,
            kind,
            attempt,
            payload,
            cancellation,
        }
    }

    pub async fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled().await
    }

    /// For skills with several sub-steps: bail out between them once a
    /// cancel has been requested.
    pub async fn checkpoint(&self) -> Result<(), SkillError> {
        if self.is_cancelled().await {
            return Err(SkillError::Cancelled);
        }
        Ok(())
    }
}

#[async_trait]
pub trait Skill: Send + Sync {
    fn kind(&self) -> TaskKind;

    async fn execute(&self, ctx: &SkillContext) -> Result<SkillOutput, SkillError>;
}
