//! Safety override checker
//!
//! Scans a message against a small, fixed set of high-specificity emergency
//! patterns (self-harm, acute cardiac/respiratory distress, explicit calls
//! for emergency help). Runs on every request regardless of what the
//! classifier concluded.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::ProfileError;

/// Kind of emergency an emergency rule detects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyCategory {
    SelfHarm,
    CardiacRespiratory,
    ExplicitHelp,
}

impl std::fmt::Display for EmergencyCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SelfHarm => write!(f, "self_harm"),
            Self::CardiacRespiratory => write!(f, "cardiac_respiratory"),
            Self::ExplicitHelp => write!(f, "explicit_help"),
        }
    }
}

#[derive(Debug, Clone)]
struct EmergencyRule {
    category: EmergencyCategory,
    pattern: Regex,
}

/// Stateless emergency detector, compiled once at startup
#[derive(Debug, Clone)]
pub struct SafetyChecker {
    rules: Vec<EmergencyRule>,
}

impl SafetyChecker {
    /// Compile a checker from `(category, pattern)` pairs.
    pub fn new<I, S>(rules: I) -> Result<Self, ProfileError>
    where
        I: IntoIterator<Item = (EmergencyCategory, S)>,
        S: AsRef<str>,
    {
        let rules = rules
            .into_iter()
            .map(|(category, pattern)| {
                Ok(EmergencyRule {
                    category,
                    pattern: compile_pattern(pattern.as_ref())?,
                })
            })
            .collect::<Result<Vec<_>, ProfileError>>()?;

        if rules.is_empty() {
            return Err(ProfileError::NoEmergencyRules);
        }
        Ok(Self { rules })
    }

    /// True when any emergency rule matches the message
    pub fn is_emergency(&self, message: &str) -> bool {
        self.matched_category(message).is_some()
    }

    /// The category of the first matching rule, if any
    pub fn matched_category(&self, message: &str) -> Option<EmergencyCategory> {
        let lower = message.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(&lower))
            .map(|rule| rule.category)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

/// Case-insensitive compile shared by profiles and emergency rules
pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex, ProfileError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ProfileError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::ProfileStore;

    fn checker() -> SafetyChecker {
        ProfileStore::embedded().unwrap().safety().clone()
    }

    #[test]
    fn test_respiratory_distress() {
        let c = checker();
        assert!(c.is_emergency("Emergency! I can't breathe properly!"));
        assert_eq!(
            c.matched_category("I can’t breathe"),
            Some(EmergencyCategory::CardiacRespiratory)
        );
    }

    #[test]
    fn test_self_harm() {
        let c = checker();
        assert_eq!(
            c.matched_category("I want to kill myself"),
            Some(EmergencyCategory::SelfHarm)
        );
        assert!(c.is_emergency("sometimes I feel suicidal"));
    }

    #[test]
    fn test_explicit_help() {
        let c = checker();
        assert_eq!(
            c.matched_category("please call an ambulance"),
            Some(EmergencyCategory::ExplicitHelp)
        );
    }

    #[test]
    fn test_korean_patterns() {
        let c = checker();
        assert!(c.is_emergency("숨을 못 쉬겠어요"));
        assert!(c.is_emergency("죽고 싶어요"));
        assert!(c.is_emergency("응급 상황이에요"));
    }

    #[test]
    fn test_routine_messages_do_not_trigger() {
        let c = checker();
        assert!(!c.is_emergency("I have a severe headache and feel nauseous"));
        assert!(!c.is_emergency("How much water should I drink?"));
        assert!(!c.is_emergency("I feel a bit lonely lately"));
        assert!(!c.is_emergency("머리가 아파요"));
    }

    #[test]
    fn test_emergency_numbers_need_call_context() {
        let c = checker();
        assert_eq!(
            c.matched_category("Please dial 911, my mother fell"),
            Some(EmergencyCategory::ExplicitHelp)
        );
        assert!(c.is_emergency("call 119 right now"));
        assert!(c.is_emergency("119에 전화해 주세요"));
        assert!(c.is_emergency("빨리 119 불러 주세요"));

        assert!(!c.is_emergency("My blood pressure was 119/79 this morning, is that healthy?"));
        assert!(!c.is_emergency("I weigh 119 pounds and want to improve my diet"));
        assert!(!c.is_emergency("I slept 2119 minutes this week"));
        assert!(!c.is_emergency("room 911 has a broken heater"));
    }

    #[test]
    fn test_empty_rule_set_rejected() {
        let rules: Vec<(EmergencyCategory, &str)> = Vec::new();
        assert!(matches!(
            SafetyChecker::new(rules),
            Err(ProfileError::NoEmergencyRules)
        ));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = SafetyChecker::new([(EmergencyCategory::ExplicitHelp, "(unclosed")]).unwrap_err();
        assert!(matches!(err, ProfileError::InvalidPattern { .. }));
    }
}
