//! Deterministic demo skills, one per task kind.
//!
//! They fake their work from the goal text so a `run` shows every path:
//! captions and replies approve, images escalate on the first attempt and
//! videos are rejected once before they pass.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use hivemind_core::SwarmBuilder;
use hivemind_core::domain::TaskKind;
use hivemind_core::ports::{SkillContext, SkillError, SkillOutput};
use hivemind_core::typed::{RegistryError, SkillHandler, SkillInput};

macro_rules! goal_input {
    ($name:ident, $kind:expr) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $name {
            pub goal_description: String,
            #[serde(default)]
            pub variant: u64,
        }

        impl SkillInput for $name {
            const KIND: TaskKind = $kind;
        }
    };
}

goal_input!(CaptionGoal, TaskKind::GenerateCaption);
goal_input!(ImageGoal, TaskKind::CreateImage);
goal_input!(VideoGoal, TaskKind::CreateVideo);
goal_input!(ReplyGoal, TaskKind::ReplyComment);
goal_input!(TrendGoal, TaskKind::AnalyzeTrend);

/// First few words of the goal, lowercased.
fn topic(goal: &str) -> String {
    goal.split_whitespace()
        .take(6)
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub struct CaptionSkill;

#[async_trait]
impl SkillHandler<CaptionGoal> for CaptionSkill {
    async fn run(&self, input: CaptionGoal, _ctx: &SkillContext) -> Result<SkillOutput, SkillError> {
        let caption = format!("{} (take {})", topic(&input.goal_description), input.variant + 1);
        Ok(SkillOutput::new(
            json!({"caption": caption, "hashtags": ["#daily"]}),
            0.94,
            "short, matches the goal wording",
        )
        .with_cost(0.02))
    }
}

pub struct ImageSkill;

#[async_trait]
impl SkillHandler<ImageGoal> for ImageSkill {
    async fn run(&self, input: ImageGoal, ctx: &SkillContext) -> Result<SkillOutput, SkillError> {
        let confidence = if ctx.attempt == 0 { 0.82 } else { 0.93 };
        Ok(SkillOutput::new(
            json!({
                "image_url": format!("https://images.invalid/{}/{}.png", ctx.task_id, input.variant),
                "prompt": topic(&input.goal_description),
            }),
            confidence,
            "composition is fine, brand colours uncertain",
        )
        .with_cost(0.10))
    }
}

pub struct VideoSkill;

#[async_trait]
impl SkillHandler<VideoGoal> for VideoSkill {
    async fn run(&self, input: VideoGoal, ctx: &SkillContext) -> Result<SkillOutput, SkillError> {
        let mut scenes = Vec::new();
        for n in 1..=3 {
            ctx.checkpoint().await?;
            scenes.push(format!("scene {n}: {}", topic(&input.goal_description)));
        }
        let confidence = if ctx.attempt == 0 { 0.55 } else { 0.91 };
        Ok(SkillOutput::new(
            json!({"video_url": format!("https://videos.invalid/{}.mp4", ctx.task_id), "scenes": scenes}),
            confidence,
            "storyboard rendered",
        )
        .with_cost(1.50))
    }
}

pub struct ReplySkill;

#[async_trait]
impl SkillHandler<ReplyGoal> for ReplySkill {
    async fn run(&self, input: ReplyGoal, _ctx: &SkillContext) -> Result<SkillOutput, SkillError> {
        Ok(SkillOutput::new(
            json!({"reply": format!("Thanks for reaching out about {}!", topic(&input.goal_description))}),
            0.96,
            "polite, on topic",
        )
        .with_cost(0.01))
    }
}

pub struct TrendSkill;

#[async_trait]
impl SkillHandler<TrendGoal> for TrendSkill {
    async fn run(&self, input: TrendGoal, _ctx: &SkillContext) -> Result<SkillOutput, SkillError> {
        let words: Vec<String> = input
            .goal_description
            .split_whitespace()
            .filter(|w| w.len() > 4)
            .map(|w| format!("#{}", w.to_lowercase()))
            .take(3)
            .collect();
        Ok(SkillOutput::new(
            json!({"trends": words}),
            0.9,
            "ranked by mention count",
        )
        .with_cost(0.05))
    }
}

pub fn register_all(builder: SwarmBuilder) -> Result<SwarmBuilder, RegistryError> {
    builder
        .register::<CaptionGoal, _>(CaptionSkill)?
        .register::<ImageGoal, _>(ImageSkill)?
        .register::<VideoGoal, _>(VideoSkill)?
        .register::<ReplyGoal, _>(ReplySkill)?
        .register::<TrendGoal, _>(TrendSkill)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_demo_skill() {
        let swarm = register_all(SwarmBuilder::new())
            .unwrap()
            .expect_planner_kinds()
            .build()
            .unwrap();
        assert_eq!(swarm.registry().kinds(), TaskKind::ALL.to_vec());
    }

    #[test]
    fn topic_is_trimmed_and_lowercased() {
        assert_eq!(topic("Launch the NEW  espresso blend"), "launch the new espresso blend");
    }
}
