//! Routing: turns a message and caller context into one decision
//!
//! Decision order:
//! 1. An explicit handler from the caller wins with confidence 1.0.
//! 2. Otherwise classify, apply context boosts, re-clamp, and rank by score
//!    with the fixed handler priority as tie-break.
//! 3. Nothing matched: fall back to the default handler at 0.5.
//! 4. The safety checker runs last, on the raw message, and overrides
//!    whatever was chosen above.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::booster;
use crate::classifier;
use crate::profiles::ProfileStore;
use crate::types::{CallerContext, ClassificationResult, HandlerId, RoutingDecision};

/// Confidence used when the safety checker forces the safety handler
pub const EMERGENCY_CONFIDENCE: f64 = 0.95;
/// Confidence used when nothing matched
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

pub const REASON_MANUAL: &str = "manually selected";
pub const REASON_DEFAULT: &str = "no signal matched — default fallback";
pub const REASON_EMERGENCY: &str = "emergency override";

/// Tunable router thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Winning scores below this are flagged as low confidence
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// A safety candidate at or above this score is selected even when
    /// another handler outscored it
    #[serde(default = "default_emergency_threshold")]
    pub emergency_threshold: f64,
}

fn default_confidence_threshold() -> f64 {
    0.6
}

fn default_emergency_threshold() -> f64 {
    0.4
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            emergency_threshold: default_emergency_threshold(),
        }
    }
}

/// Stateless router. Cheap to clone and share across requests.
#[derive(Debug, Clone)]
pub struct Router {
    profiles: Arc<ProfileStore>,
    config: RouterConfig,
}

impl Router {
    pub fn new(profiles: Arc<ProfileStore>, config: RouterConfig) -> Self {
        Self { profiles, config }
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Pick exactly one handler for `message`.
    ///
    /// Never fails; empty messages must be rejected before calling this.
    pub fn route(
        &self,
        message: &str,
        ctx: &CallerContext,
        explicit: Option<HandlerId>,
    ) -> RoutingDecision {
        let mut decision = match explicit {
            Some(handler) => RoutingDecision {
                selected_handler_id: handler,
                confidence: 1.0,
                reasons: vec![REASON_MANUAL.to_string()],
                emergency_override_applied: false,
            },
            None => self.route_by_score(message, ctx),
        };

        if let Some(category) = self.profiles.safety().matched_category(message) {
            if decision.selected_handler_id != HandlerId::Safety {
                warn!(
                    "Emergency override ({}): {} → safety",
                    category, decision.selected_handler_id
                );
                decision = RoutingDecision {
                    selected_handler_id: HandlerId::Safety,
                    confidence: EMERGENCY_CONFIDENCE,
                    reasons: vec![REASON_EMERGENCY.to_string()],
                    emergency_override_applied: true,
                };
            } else {
                decision.confidence = decision.confidence.max(EMERGENCY_CONFIDENCE);
                decision.reasons.push(REASON_EMERGENCY.to_string());
                decision.emergency_override_applied = true;
            }
            decision
                .reasons
                .push(format!("emergency category: {}", category));
        }

        decision.confidence = decision.confidence.clamp(0.0, 1.0);
        debug!(
            "Routed to {} (confidence {:.2}, override={})",
            decision.selected_handler_id, decision.confidence, decision.emergency_override_applied
        );
        decision
    }

    /// Classified and boosted candidates, best first
    pub fn rank(&self, message: &str, ctx: &CallerContext) -> Vec<ClassificationResult> {
        let mut candidates = classifier::classify(message, &self.profiles);
        for candidate in &mut candidates {
            if let Some(profile) = self.profiles.get(candidate.handler_id) {
                let boost = booster::boost(profile, ctx);
                candidate.score = (candidate.score + boost.delta).clamp(0.0, 1.0);
                candidate.reasons.extend(boost.reasons);
            }
        }
        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.handler_id.priority().cmp(&b.handler_id.priority()))
        });
        candidates
    }

    fn route_by_score(&self, message: &str, ctx: &CallerContext) -> RoutingDecision {
        let candidates = self.rank(message, ctx);

        let safety_candidate = candidates
            .iter()
            .find(|c| c.handler_id == HandlerId::Safety && c.score >= self.config.emergency_threshold);

        let (winner, mut reasons) = match (safety_candidate, candidates.first()) {
            (_, None) => {
                return RoutingDecision {
                    selected_handler_id: HandlerId::DEFAULT,
                    confidence: DEFAULT_CONFIDENCE,
                    reasons: vec![REASON_DEFAULT.to_string()],
                    emergency_override_applied: false,
                };
            }
            (Some(safety), Some(top)) if top.handler_id != HandlerId::Safety => {
                let mut reasons = safety.reasons.clone();
                reasons.push(format!(
                    "safety signal {:.2} above emergency threshold {:.2}",
                    safety.score, self.config.emergency_threshold
                ));
                (safety, reasons)
            }
            (_, Some(top)) => (top, top.reasons.clone()),
        };

        if winner.score < self.config.confidence_threshold {
            reasons.push(format!(
                "low confidence ({:.2} < {:.2})",
                winner.score, self.config.confidence_threshold
            ));
        }

        RoutingDecision {
            selected_handler_id: winner.handler_id,
            confidence: winner.score,
            reasons,
            emergency_override_applied: false,
        }
    }
}
