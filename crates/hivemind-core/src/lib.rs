//! hivemind-core
//!
//! Coordination engine for a swarm of skill executors working on behalf of
//! owners: decompose an objective into budget-admitted tasks, execute them
//! with registered skills, judge every result and commit approved work into
//! the owner's versioned state.
//!
//! # Modules
//! - **domain**: ids, tasks, results, budget windows, escalations, events, errors
//! - **ports**: queue/state service, task store, budget ledger, skills,
//!   safety screen, planner, event sink, clock, id generator
//! - **impls**: in-memory ports, keyword planner and safety screen, event sinks
//! - **typed**: typed skill inputs and the skill registry
//! - **app**: decomposer, executors, validator, state committer, escalation
//!   reaper, status, builder
//! - **config**: YAML configuration with environment overrides
//! - **observability**: logging setup

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod typed;

pub use app::{BuildError, StatusReport, Swarm, SwarmBuilder};
pub use config::{ConfigError, SwarmConfig};
pub use domain::{
    Decision, OwnerId, ResultId, ReviewVerdict, SwarmError, Task, TaskKind, TaskResult,
    TaskStatus,
};
pub use typed::{SkillHandler, SkillInput};
