//! Language detection for user-facing fallback text

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    English,
    Korean,
}

/// Script-based detection: any Hangul means Korean, anything else English.
pub fn detect(message: &str) -> Language {
    if message.chars().any(is_hangul) {
        Language::Korean
    } else {
        Language::English
    }
}

fn is_hangul(c: char) -> bool {
    matches!(c,
        '\u{AC00}'..='\u{D7A3}'   // syllables
        | '\u{1100}'..='\u{11FF}' // jamo
        | '\u{3130}'..='\u{318F}' // compatibility jamo
    )
}

/// Fixed reply used when the selected handler could not answer
pub fn fallback_text(language: Language) -> &'static str {
    match language {
        Language::English => {
            "We're having a technical difficulty right now. If this is an emergency, \
             please call your local emergency number or seek help immediately."
        }
        Language::Korean => {
            "현재 기술적인 문제가 발생했습니다. 응급 상황이라면 즉시 119에 연락하거나 \
             가까운 의료기관의 도움을 받으세요."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        assert_eq!(detect("I have a fever"), Language::English);
        assert_eq!(detect("열이 나요"), Language::Korean);
        assert_eq!(detect("fever 있어요"), Language::Korean);
        assert_eq!(detect(""), Language::English);
    }

    #[test]
    fn test_fallback_mentions_emergency() {
        assert!(fallback_text(Language::English).contains("emergency"));
        assert!(fallback_text(Language::Korean).contains("119"));
    }
}
