//! Lexical classifier scoring a message against every handler profile

use crate::profiles::{HandlerProfile, ProfileStore};
use crate::types::ClassificationResult;

/// Share of the score contributed by keyword hits
pub const KEYWORD_WEIGHT: f64 = 0.5;
/// Share of the score contributed by pattern hits
pub const PATTERN_WEIGHT: f64 = 0.4;

/// Score `message` against every profile.
///
/// Handlers scoring exactly zero are left out. Results come back in
/// profile (priority) order; ranking is the router's job.
pub fn classify(message: &str, profiles: &ProfileStore) -> Vec<ClassificationResult> {
    let lower = message.to_lowercase();
    profiles
        .profiles()
        .iter()
        .filter_map(|profile| score_profile(&lower, profile))
        .collect()
}

/// Score one profile against an already lower-cased message
pub fn score_profile(lower: &str, profile: &HandlerProfile) -> Option<ClassificationResult> {
    let keyword_hits = profile
        .keywords
        .iter()
        .filter(|k| lower.contains(k.as_str()))
        .count();
    let pattern_hits = profile
        .patterns
        .iter()
        .filter(|p| p.is_match(lower))
        .count();

    let keyword_score = ratio(keyword_hits, profile.keywords.len()) * KEYWORD_WEIGHT;
    let pattern_score = ratio(pattern_hits, profile.patterns.len()) * PATTERN_WEIGHT;

    if keyword_score == 0.0 && pattern_score == 0.0 {
        return None;
    }

    let mut reasons = Vec::new();
    if keyword_hits > 0 {
        reasons.push(format!(
            "matched {}/{} keywords",
            keyword_hits,
            profile.keywords.len()
        ));
    }
    if pattern_hits > 0 {
        reasons.push(format!(
            "matched {}/{} patterns",
            pattern_hits,
            profile.patterns.len()
        ));
    }
    if profile.confidence_boost > 0.0 {
        reasons.push(format!("profile boost +{:.2}", profile.confidence_boost));
    }

    let score = (keyword_score + pattern_score + profile.confidence_boost).min(1.0);

    Some(ClassificationResult {
        handler_id: profile.id,
        score,
        reasons,
    })
}

fn ratio(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HandlerId;

    fn store() -> ProfileStore {
        ProfileStore::embedded().unwrap()
    }

    const TWO_PROFILE_DOC: &str = r#"
version = 1

[[profile]]
id = "safety"
confidence_boost = 0.0
keywords = ["alpha", "beta"]
patterns = ['\bgamma\b', 'delta']

[[profile]]
id = "illness_triage"
confidence_boost = 0.9
keywords = ["alpha"]
patterns = ['alpha']

[[profile]]
id = "emotional_support"
confidence_boost = 0.2
keywords = []
patterns = []

[[profile]]
id = "general_wellness"
confidence_boost = 0.1

[[emergency]]
category = "explicit_help"
patterns = ['\bemergency\b']
"#;

    #[test]
    fn test_headache_scores_illness_triage() {
        let results = classify("I have a severe headache and feel nauseous", &store());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].handler_id, HandlerId::IllnessTriage);
        assert!(results[0].score > 0.0 && results[0].score <= 1.0);
        assert!(results[0].reasons.iter().any(|r| r.contains("keywords")));
        assert!(results[0].reasons.iter().any(|r| r.contains("patterns")));
    }

    #[test]
    fn test_no_signal_is_empty() {
        assert!(classify("What time does the pharmacy open tomorrow?", &store()).is_empty());
    }

    #[test]
    fn test_weighted_formula() {
        let store = ProfileStore::from_toml(TWO_PROFILE_DOC).unwrap();
        let results = classify("ALPHA and gamma", &store);
        let safety = results
            .iter()
            .find(|r| r.handler_id == HandlerId::Safety)
            .unwrap();
        // 1/2 keywords * 0.5 + 1/2 patterns * 0.4 + 0.0
        assert!((safety.score - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_score_clamped_to_one() {
        let store = ProfileStore::from_toml(TWO_PROFILE_DOC).unwrap();
        let results = classify("alpha", &store);
        let illness = results
            .iter()
            .find(|r| r.handler_id == HandlerId::IllnessTriage)
            .unwrap();
        // 0.5 + 0.4 + 0.9 would exceed 1
        assert_eq!(illness.score, 1.0);
    }

    #[test]
    fn test_empty_lists_never_score() {
        let store = ProfileStore::from_toml(TWO_PROFILE_DOC).unwrap();
        let results = classify("alpha beta gamma delta", &store);
        assert!(
            results
                .iter()
                .all(|r| r.handler_id != HandlerId::EmotionalSupport)
        );
    }

    #[test]
    fn test_classify_is_deterministic() {
        let store = store();
        let message = "I'm so stressed and can't sleep, also my head hurts";
        assert_eq!(classify(message, &store), classify(message, &store));
    }

    #[test]
    fn test_korean_message() {
        let results = classify("머리가 아파요, 열이 나요", &store());
        assert_eq!(results[0].handler_id, HandlerId::IllnessTriage);
    }
}
