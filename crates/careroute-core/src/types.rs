//! Shared types for careroute-core

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::UnknownHandler;

/// Identifier of a downstream handler.
///
/// The variant order is the tie-break priority used by the router:
/// earlier variants win when two candidates score identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerId {
    Safety,
    IllnessTriage,
    EmotionalSupport,
    GeneralWellness,
}

impl HandlerId {
    /// Every handler, in tie-break priority order
    pub const ALL: [HandlerId; 4] = [
        HandlerId::Safety,
        HandlerId::IllnessTriage,
        HandlerId::EmotionalSupport,
        HandlerId::GeneralWellness,
    ];

    /// Handler selected when nothing in the message matched
    pub const DEFAULT: HandlerId = HandlerId::GeneralWellness;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safety => "safety",
            Self::IllnessTriage => "illness_triage",
            Self::EmotionalSupport => "emotional_support",
            Self::GeneralWellness => "general_wellness",
        }
    }

    /// Tie-break rank (lower wins)
    pub fn priority(&self) -> usize {
        match self {
            Self::Safety => 0,
            Self::IllnessTriage => 1,
            Self::EmotionalSupport => 2,
            Self::GeneralWellness => 3,
        }
    }
}

impl FromStr for HandlerId {
    type Err = UnknownHandler;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "safety" => Ok(Self::Safety),
            "illness_triage" => Ok(Self::IllnessTriage),
            "emotional_support" => Ok(Self::EmotionalSupport),
            "general_wellness" => Ok(Self::GeneralWellness),
            _ => Err(UnknownHandler(s.to_string())),
        }
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse age bracket supplied by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeBracket {
    Child,
    #[serde(alias = "teen")]
    Youth,
    Adult,
    #[serde(alias = "senior")]
    Elderly,
}

impl FromStr for AgeBracket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "child" => Ok(Self::Child),
            "youth" | "teen" => Ok(Self::Youth),
            "adult" => Ok(Self::Adult),
            "elderly" | "senior" => Ok(Self::Elderly),
            other => Err(format!("unknown age bracket '{}'", other)),
        }
    }
}

/// Per-request hints used by the context booster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_bracket: Option<AgeBracket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previously_preferred_handler: Option<HandlerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub most_recently_used_handler: Option<HandlerId>,
}

/// Score of one handler for one message
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub handler_id: HandlerId,
    /// Always within [0, 1]
    pub score: f64,
    pub reasons: Vec<String>,
}

/// The router's single choice for a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub selected_handler_id: HandlerId,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub emergency_override_applied: bool,
}

/// How urgent a routed conversation turn is. Drives record retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Critical,
    High,
    Sensitive,
    Routine,
}

impl Urgency {
    pub fn from_decision(decision: &RoutingDecision) -> Self {
        if decision.emergency_override_applied {
            return Self::Critical;
        }
        match decision.selected_handler_id {
            HandlerId::Safety => Self::Critical,
            HandlerId::IllnessTriage => Self::High,
            HandlerId::EmotionalSupport => Self::Sensitive,
            HandlerId::GeneralWellness => Self::Routine,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Sensitive => "sensitive",
            Self::Routine => "routine",
        }
    }
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Urgency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "sensitive" => Ok(Self::Sensitive),
            "routine" => Ok(Self::Routine),
            other => Err(format!("unknown urgency: {}", other)),
        }
    }
}
