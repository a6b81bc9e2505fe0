//! SkillRegistry: one skill per task kind.

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{SkillHandler, TypedSkill};
use super::input::SkillInput;
use crate::domain::errors::SwarmError;
use crate::domain::task::TaskKind;
use crate::ports::Skill;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("skill for kind '{0}' is already registered")]
    AlreadyRegistered(TaskKind),
}

impl From<RegistryError> for SwarmError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::AlreadyRegistered(kind) => SwarmError::DuplicateSkill(kind),
        }
    }
}

#[derive(Default, Clone)]
pub struct SkillRegistry {
    skills: HashMap<TaskKind, Arc<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler for `I::KIND`.
    pub fn register<I, H>(&mut self, handler: H) -> Result<(), RegistryError>
    where
        I: SkillInput,
        H: SkillHandler<I> + 'static,
    {
        self.register_dyn(Arc::new(TypedSkill::<I, H>::new(handler)))
    }

    /// Register an already-erased skill under `skill.kind()`.
    pub fn register_dyn(&mut self, skill: Arc<dyn Skill>) -> Result<(), RegistryError> {
        let kind = skill.kind();
        if self.skills.contains_key(&kind) {
            return Err(RegistryError::AlreadyRegistered(kind));
        }
        self.skills.insert(kind, skill);
        Ok(())
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn Skill>> {
        self.skills.get(&kind).cloned()
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<TaskKind> = self.skills.keys().copied().collect();
        kinds.sort();
        kinds
    }
}
