//! Candidate profile store — per-handler keywords, patterns, and boosts
//!
//! Profiles are data, not code: they are parsed from a versioned TOML
//! document (the built-in one is embedded at compile time), validated and
//! compiled once, and then shared read-only for the life of the process.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use crate::error::ProfileError;
use crate::safety::{EmergencyCategory, SafetyChecker, compile_pattern};
use crate::types::{AgeBracket, HandlerId};

/// Profile document version this build understands
pub const SUPPORTED_VERSION: u32 = 1;

const EMBEDDED_PROFILES: &str = include_str!("../profiles/default.toml");

#[derive(Debug, Deserialize)]
struct ProfileDocument {
    version: u32,
    #[serde(default, rename = "profile")]
    profiles: Vec<RawProfile>,
    #[serde(default, rename = "emergency")]
    emergency: Vec<RawEmergencyRule>,
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    id: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    patterns: Vec<String>,
    confidence_boost: f64,
    #[serde(default)]
    age_affinity: Vec<AgeBracket>,
}

#[derive(Debug, Deserialize)]
struct RawEmergencyRule {
    category: EmergencyCategory,
    patterns: Vec<String>,
}

/// Static definition of one candidate handler
#[derive(Debug, Clone)]
pub struct HandlerProfile {
    pub id: HandlerId,
    /// Lower-cased, in document order
    pub keywords: Vec<String>,
    pub patterns: Vec<Regex>,
    pub confidence_boost: f64,
    pub age_affinity: Vec<AgeBracket>,
}

impl HandlerProfile {
    pub fn favours_age(&self, bracket: AgeBracket) -> bool {
        self.age_affinity.contains(&bracket)
    }
}

/// Every handler profile plus the emergency rule set
#[derive(Debug, Clone)]
pub struct ProfileStore {
    version: u32,
    /// One entry per handler, in tie-break priority order
    profiles: Vec<HandlerProfile>,
    safety: SafetyChecker,
}

impl ProfileStore {
    /// The profile set compiled into the binary
    pub fn embedded() -> Result<Self, ProfileError> {
        Self::from_toml(EMBEDDED_PROFILES)
    }

    /// Load a profile document from disk
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let content = std::fs::read_to_string(path)?;
        let store = Self::from_toml(&content)?;
        info!(
            "Loaded profile set v{} from {}",
            store.version,
            path.display()
        );
        Ok(store)
    }

    /// Parse and validate a profile document.
    ///
    /// Every handler must have exactly one profile, every boost must lie in
    /// [0, 1], and every pattern must compile.
    pub fn from_toml(content: &str) -> Result<Self, ProfileError> {
        let doc: ProfileDocument = toml::from_str(content)?;
        if doc.version != SUPPORTED_VERSION {
            return Err(ProfileError::UnsupportedVersion(doc.version));
        }

        let mut seen = HashSet::new();
        let mut profiles = Vec::with_capacity(doc.profiles.len());
        for raw in doc.profiles {
            let id: HandlerId = raw.id.parse()?;
            if !seen.insert(id) {
                return Err(ProfileError::DuplicateProfile(id));
            }
            if !(0.0..=1.0).contains(&raw.confidence_boost) {
                return Err(ProfileError::BoostOutOfRange {
                    handler: id,
                    boost: raw.confidence_boost,
                });
            }
            let patterns = raw
                .patterns
                .iter()
                .map(|p| compile_pattern(p))
                .collect::<Result<Vec<_>, _>>()?;

            profiles.push(HandlerProfile {
                id,
                keywords: raw.keywords.iter().map(|k| k.to_lowercase()).collect(),
                patterns,
                confidence_boost: raw.confidence_boost,
                age_affinity: raw.age_affinity,
            });
        }

        if let Some(missing) = HandlerId::ALL.iter().find(|id| !seen.contains(id)) {
            return Err(ProfileError::MissingProfile(*missing));
        }
        profiles.sort_by_key(|p| p.id.priority());

        let safety = SafetyChecker::new(doc.emergency.into_iter().flat_map(|rule| {
            let category = rule.category;
            rule.patterns.into_iter().map(move |p| (category, p))
        }))?;

        debug!(
            "Profile set v{}: {} profiles, {} emergency rules",
            doc.version,
            profiles.len(),
            safety.rule_count()
        );

        Ok(Self {
            version: doc.version,
            profiles,
            safety,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// All profiles in tie-break priority order
    pub fn profiles(&self) -> &[HandlerProfile] {
        &self.profiles
    }

    pub fn get(&self, id: HandlerId) -> Option<&HandlerProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn safety(&self) -> &SafetyChecker {
        &self.safety
    }
}
