//! careroute-core - Triage and dispatch engine
//!
//! This crate provides:
//! - Keyword/pattern classifier driven by versioned handler profiles
//! - Context booster and router with a non-bypassable safety override
//! - Dispatcher that forwards turns to handler services with timeouts
//! - Best-effort conversation recorder with urgency-based retention
//! - `TriageService`, the request pipeline tying all of the above together

pub mod booster;
pub mod classifier;
pub mod dispatcher;
pub mod error;
pub mod language;
pub mod profiles;
pub mod recorder;
pub mod router;
pub mod safety;
pub mod service;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use classifier::classify;
pub use dispatcher::{
    DispatchOutcome, DispatchRequest, Dispatcher, HandlerEndpoints, HandlerRequest, HandlerTransport,
};
pub use error::{DispatchError, ProfileError, TriageError, UnknownHandler};
pub use profiles::{HandlerProfile, ProfileStore};
pub use recorder::{ConversationRecord, ConversationRecorder, ConversationStore, RetentionPolicy};
pub use router::{Router, RouterConfig};
pub use safety::{EmergencyCategory, SafetyChecker};
pub use service::{TriageRequest, TriageResponse, TriageService, ValidatedRequest};
pub use transport::HttpTransport;
pub use types::{AgeBracket, CallerContext, ClassificationResult, HandlerId, RoutingDecision, Urgency};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let _ = std::mem::size_of::<Router>();
        let _ = std::mem::size_of::<Dispatcher>();
        let _ = std::mem::size_of::<ConversationRecorder>();
        let _ = std::mem::size_of::<TriageService>();
        let _ = std::mem::size_of::<RoutingDecision>();
    }
}
