//! Denylist SafetyScreen.
//!
//! Flags an artifact when any string inside it contains a configured term
//! (case-insensitive), or when the skill itself marked it
//! `"sensitive": true`.

use crate::domain::task::Payload;
use crate::ports::{SafetyScreen, SafetyVerdict};

pub struct KeywordSafetyScreen {
    terms: Vec<String>,
}

impl KeywordSafetyScreen {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            terms: terms
                .into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    fn find_term(&self, value: &Payload) -> Option<&str> {
        match value {
            Payload::String(s) => {
                let lower = s.to_lowercase();
                self.terms
                    .iter()
                    .find(|t| lower.contains(t.as_str()))
                    .map(String::as_str)
            }
            Payload::Array(items) => items.iter().find_map(|v| self.find_term(v)),
            Payload::Object(map) => map.values().find_map(|v| self.find_term(v)),
            _ => None,
        }
    }
}

impl SafetyScreen for KeywordSafetyScreen {
    fn screen(&self, artifact: &Payload) -> SafetyVerdict {
        if artifact.get("sensitive").and_then(Payload::as_bool) == Some(true) {
            return SafetyVerdict::Sensitive {
                reason: "artifact self-flagged as sensitive".to_string(),
            };
        }
        match self.find_term(artifact) {
            Some(term) => SafetyVerdict::Sensitive {
                reason: format!("artifact mentions sensitive term {term:?}"),
            },
            None => SafetyVerdict::Clear,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_terms_are_found_case_insensitively() {
        let screen = KeywordSafetyScreen::new(["Election"]);
        let verdict = screen.screen(&json!({"slides": [{"text": "Vote in the ELECTION"}]}));
        assert!(verdict.is_sensitive());
        assert_eq!(
            screen.screen(&json!({"caption": "coffee"})),
            SafetyVerdict::Clear
        );
    }

    #[test]
    fn self_flag_marks_sensitive() {
        let screen = KeywordSafetyScreen::new(Vec::<String>::new());
        assert!(screen.screen(&json!({"caption": "x", "sensitive": true})).is_sensitive());
        assert!(!screen.screen(&json!({"caption": "x", "sensitive": false})).is_sensitive());
    }
}
