//! Typed skill API.
//!
//! Keeps the payload/kind pairing in the type system:
//! - **Typed surface**: `SkillInput` ties a serde input type to its
//!   `TaskKind`; `SkillHandler<I>` runs on that input.
//! - **Erased core**: `TypedSkill<I, H>` implements the object-safe
//!   `ports::Skill`, so the registry can hold every kind in one map.

pub mod handler;
pub mod input;
pub mod registry;

pub use self::handler::{SkillHandler, TypedSkill};
pub use self::input::SkillInput;
pub use self::registry::{RegistryError, SkillRegistry};
