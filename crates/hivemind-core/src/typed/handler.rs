//! SkillHandler trait and its type-erased adapter.

use std::marker::PhantomData;

use async_trait::async_trait;

use super::input::SkillInput;
use crate::domain::task::TaskKind;
use crate::ports::{Skill, SkillContext, SkillError, SkillOutput};

/// Runs one kind of task on its decoded input.
///
/// `ctx` still carries the raw payload and the cancellation checkpoint.
#[async_trait]
pub trait SkillHandler<I: SkillInput>: Send + Sync {
    async fn run(&self, input: I, ctx: &SkillContext) -> Result<SkillOutput, SkillError>;
}

/// Decodes the context into `I`, then calls the handler.
pub struct TypedSkill<I: SkillInput, H: SkillHandler<I>> {
    handler: H,
    _marker: PhantomData<fn() -> I>,
}

impl<I: SkillInput, H: SkillHandler<I>> TypedSkill<I, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<I: SkillInput, H: SkillHandler<I>> Skill for TypedSkill<I, H> {
    fn kind(&self) -> TaskKind {
        I::KIND
    }

    async fn execute(&self, ctx: &SkillContext) -> Result<SkillOutput, SkillError> {
        let input: I = serde_json::from_value(ctx.payload.clone())
            .map_err(|e| SkillError::InvalidContext(format!("{}: {e}", I::KIND)))?;
        self.handler.run(input, ctx).await
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct CaptionInput {
        pub goal_description: String,
    }

    impl SkillInput for CaptionInput {
        const KIND: TaskKind = TaskKind::GenerateCaption;
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TrendInput {
        pub goal_description: String,
    }

    impl SkillInput for TrendInput {
        const KIND: TaskKind = TaskKind::AnalyzeTrend;
    }

    /// Echoes the goal back with a fixed confidence.
    pub struct EchoCaption {
        pub confidence: f64,
    }

    #[async_trait]
    impl SkillHandler<CaptionInput> for EchoCaption {
        async fn run(
            &self,
            input: CaptionInput,
            _ctx: &SkillContext,
        ) -> Result<SkillOutput, SkillError> {
            Ok(SkillOutput::new(
                json!({"caption": input.goal_description}),
                self.confidence,
                "echoed the goal",
            ))
        }
    }

    pub struct FlatTrend;

    #[async_trait]
    impl SkillHandler<TrendInput> for FlatTrend {
        async fn run(
            &self,
            _input: TrendInput,
            _ctx: &SkillContext,
        ) -> Result<SkillOutput, SkillError> {
            Ok(SkillOutput::new(json!({"trends": []}), 0.9, "nothing trending"))
        }
    }
}
