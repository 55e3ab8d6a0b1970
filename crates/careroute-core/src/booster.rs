//! Small additive score nudges from caller hints

use crate::profiles::HandlerProfile;
use crate::types::CallerContext;

pub const AGE_AFFINITY_BOOST: f64 = 0.10;
pub const PREFERRED_HANDLER_BOOST: f64 = 0.05;
pub const RECENT_HANDLER_BOOST: f64 = 0.05;

/// Additive adjustment for one handler, with the reasons that produced it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextBoost {
    pub delta: f64,
    pub reasons: Vec<String>,
}

/// Compute the context delta for `profile`. The caller re-clamps the final
/// score; deltas here are never clamped.
pub fn boost(profile: &HandlerProfile, ctx: &CallerContext) -> ContextBoost {
    let mut out = ContextBoost::default();

    if let Some(bracket) = ctx.age_bracket {
        if profile.favours_age(bracket) {
            out.delta += AGE_AFFINITY_BOOST;
            out.reasons
                .push(format!("age bracket boost +{:.2}", AGE_AFFINITY_BOOST));
        }
    }
    if ctx.previously_preferred_handler == Some(profile.id) {
        out.delta += PREFERRED_HANDLER_BOOST;
        out.reasons
            .push(format!("preferred handler boost +{:.2}", PREFERRED_HANDLER_BOOST));
    }
    if ctx.most_recently_used_handler == Some(profile.id) {
        out.delta += RECENT_HANDLER_BOOST;
        out.reasons
            .push(format!("recent handler boost +{:.2}", RECENT_HANDLER_BOOST));
    }

    out
}
