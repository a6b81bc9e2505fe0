//! Rule-based ObjectivePlanner.
//!
//! Reads the objective as a bag of lowercase words:
//! - each keyword family maps to a kind, in order of first mention;
//! - a number before the first content keyword ("Create 3 posts") repeats
//!   every content task that many times;
//! - "urgent" anywhere makes the whole plan high priority;
//! - an objective that names no known work gets one task of the default kind.

use std::collections::BTreeMap;

use serde_json::json;

use crate::config::PlannerConfig;
use crate::domain::errors::SwarmError;
use crate::domain::ids::OwnerId;
use crate::domain::task::{Priority, TaskKind};
use crate::ports::{ObjectivePlanner, PlannedTask};

const KEYWORDS: &[(&str, TaskKind)] = &[
    ("caption", TaskKind::GenerateCaption),
    ("captions", TaskKind::GenerateCaption),
    ("post", TaskKind::GenerateCaption),
    ("posts", TaskKind::GenerateCaption),
    ("tweet", TaskKind::GenerateCaption),
    ("tweets", TaskKind::GenerateCaption),
    ("image", TaskKind::CreateImage),
    ("images", TaskKind::CreateImage),
    ("photo", TaskKind::CreateImage),
    ("photos", TaskKind::CreateImage),
    ("picture", TaskKind::CreateImage),
    ("pictures", TaskKind::CreateImage),
    ("video", TaskKind::CreateVideo),
    ("videos", TaskKind::CreateVideo),
    ("reel", TaskKind::CreateVideo),
    ("reels", TaskKind::CreateVideo),
    ("reply", TaskKind::ReplyComment),
    ("replies", TaskKind::ReplyComment),
    ("respond", TaskKind::ReplyComment),
    ("comment", TaskKind::ReplyComment),
    ("comments", TaskKind::ReplyComment),
    ("trend", TaskKind::AnalyzeTrend),
    ("trends", TaskKind::AnalyzeTrend),
    ("trending", TaskKind::AnalyzeTrend),
];

fn is_content(kind: TaskKind) -> bool {
    matches!(
        kind,
        TaskKind::GenerateCaption | TaskKind::CreateImage | TaskKind::CreateVideo
    )
}

pub struct KeywordPlanner {
    default_kind: TaskKind,
    max_tasks: usize,
    costs: BTreeMap<TaskKind, f64>,
}

impl KeywordPlanner {
    pub fn new(config: &PlannerConfig) -> Self {
        Self {
            default_kind: config.default_kind,
            max_tasks: config.max_tasks.max(1),
            costs: config.costs.clone(),
        }
    }

    fn cost_of(&self, kind: TaskKind) -> f64 {
        self.costs.get(&kind).copied().unwrap_or(0.0)
    }
}

impl Default for KeywordPlanner {
    fn default() -> Self {
        Self::new(&PlannerConfig::default())
    }
}

impl ObjectivePlanner for KeywordPlanner {
    fn plan(&self, objective: &str, owner: &OwnerId) -> Result<Vec<PlannedTask>, SwarmError> {
        let objective = objective.trim();
        if objective.is_empty() {
            return Err(SwarmError::InvalidObjective("objective is empty".to_string()));
        }

        let words: Vec<String> = objective
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        if !words.iter().any(|w| w.chars().any(char::is_alphabetic)) {
            return Err(SwarmError::InvalidObjective(format!(
                "objective has no words: {objective:?}"
            )));
        }

        let mut kinds: Vec<TaskKind> = Vec::new();
        let mut count: Option<usize> = None;
        for word in &words {
            if let Some(&(_, kind)) = KEYWORDS.iter().find(|(k, _)| *k == word.as_str()) {
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            } else if count.is_none()
                && !kinds.iter().any(|k| is_content(*k))
                && let Ok(n) = word.parse::<usize>()
            {
                count = Some(n);
            }
        }
        if kinds.is_empty() {
            kinds.push(self.default_kind);
        }

        let priority = if words.iter().any(|w| w == "urgent") {
            Priority::High
        } else {
            Priority::Medium
        };
        let repeat = count.unwrap_or(1).max(1);

        let mut plan = Vec::new();
        'kinds: for kind in kinds {
            let copies = if is_content(kind) { repeat } else { 1 };
            for n in 0..copies {
                if plan.len() == self.max_tasks {
                    tracing::warn!(
                        owner = %owner,
                        max_tasks = self.max_tasks,
                        "plan truncated at max_tasks"
                    );
                    break 'kinds;
                }
                plan.push(PlannedTask {
                    kind,
                    priority,
                    context: json!({
                        "goal_description": objective,
                        "owner_id": owner.as_str(),
                        "sequence": plan.len(),
                        "variant": n,
                    }),
                    estimated_cost: self.cost_of(kind),
                });
            }
        }
        Ok(plan)
    }

    fn kinds(&self) -> Vec<TaskKind> {
        TaskKind::ALL.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn plan(objective: &str) -> Vec<PlannedTask> {
        KeywordPlanner::default()
            .plan(objective, &OwnerId::new("test_agent_001"))
            .unwrap()
    }

    fn kinds(plan: &[PlannedTask]) -> Vec<TaskKind> {
        plan.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn leading_count_repeats_content_tasks() {
        let tasks = plan("Create 3 posts about Ethiopian coffee culture");
        assert_eq!(kinds(&tasks), vec![TaskKind::GenerateCaption; 3]);
        assert!(tasks.iter().all(|t| t.priority == Priority::Medium));
    }

    #[test]
    fn mentions_map_to_kinds_in_order() {
        let tasks = plan("Create an Instagram post with image and caption about fashion");
        assert_eq!(
            kinds(&tasks),
            vec![TaskKind::GenerateCaption, TaskKind::CreateImage]
        );
    }

    #[test]
    fn urgent_objective_is_high_priority() {
        let tasks = plan("URGENT: Respond to trending topic about sustainable fashion");
        assert_eq!(
            kinds(&tasks),
            vec![TaskKind::ReplyComment, TaskKind::AnalyzeTrend]
        );
        assert!(tasks.iter().all(|t| t.priority == Priority::High));
    }

    #[test]
    fn every_context_carries_goal_description() {
        let tasks = plan("Create post about Ethiopian coffee with Gen-Z tone");
        for t in &tasks {
            assert_eq!(
                t.context["goal_description"],
                "Create post about Ethiopian coffee with Gen-Z tone"
            );
        }
    }

    #[test]
    fn video_has_nonzero_estimate() {
        let tasks = plan("Create a video about Ethiopian fashion");
        assert_eq!(kinds(&tasks), vec![TaskKind::CreateVideo]);
        assert!(tasks[0].estimated_cost > 0.0);
    }

    #[test]
    fn vague_objective_still_yields_a_task() {
        let tasks = plan("Do something");
        assert_eq!(kinds(&tasks), vec![TaskKind::GenerateCaption]);
    }

    #[test]
    fn plan_is_capped_at_max_tasks() {
        let planner = KeywordPlanner::new(&PlannerConfig {
            max_tasks: 10,
            ..PlannerConfig::default()
        });
        let tasks = planner
            .plan("Create 100 high-quality videos", &OwnerId::new("o"))
            .unwrap();
        assert_eq!(tasks.len(), 10);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("!!! ??? ...")]
    #[case("42")]
    fn unusable_objectives_are_invalid(#[case] objective: &str) {
        let err = KeywordPlanner::default()
            .plan(objective, &OwnerId::new("o"))
            .unwrap_err();
        assert!(matches!(err, SwarmError::InvalidObjective(_)));
    }
}
