//! SafetyScreen port: flags artifacts that must go to a human.

use crate::domain::task::Payload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyVerdict {
    Clear,
    Sensitive { reason: String },
}

impl SafetyVerdict {
    pub fn is_sensitive(&self) -> bool {
        matches!(self, SafetyVerdict::Sensitive { .. })
    }
}

pub trait SafetyScreen: Send + Sync {
    fn screen(&self, artifact: &Payload) -> SafetyVerdict;
}
