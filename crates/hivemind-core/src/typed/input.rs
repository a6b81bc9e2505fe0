//! SkillInput trait: binds a context payload type to a task kind.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::task::TaskKind;

/// Decoded form of a task's `context`.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct CaptionInput {
///     goal_description: String,
/// }
///
/// impl SkillInput for CaptionInput {
///     const KIND: TaskKind = TaskKind::GenerateCaption;
/// }
/// ```
pub trait SkillInput: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: TaskKind;
}
