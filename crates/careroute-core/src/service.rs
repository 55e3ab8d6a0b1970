//! Request pipeline: validate → route → dispatch → record → respond
//!
//! This is the layer that turns a failed dispatch into a degraded but
//! successful reply, so the user always gets some guidance.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatcher::{DispatchOutcome, DispatchRequest, Dispatcher};
use crate::error::TriageError;
use crate::language;
use crate::recorder::{ANONYMOUS_CALLER, ConversationRecorder};
use crate::router::Router;
use crate::types::{CallerContext, HandlerId, RoutingDecision, Urgency};

/// Entry request as received from a caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub caller_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub explicit_handler: Option<String>,
    #[serde(default)]
    pub caller_context: CallerContext,
}

impl TriageRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// A request that passed validation, with defaults filled in
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub message: String,
    pub caller_id: String,
    pub conversation_id: String,
    pub explicit_handler: Option<HandlerId>,
    pub caller_context: CallerContext,
}

/// Entry response returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageResponse {
    pub response_text: String,
    pub selected_handler_id: HandlerId,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub emergency_override_applied: bool,
    pub conversation_id: String,
    /// True when the handler failed and the fixed safe text was returned
    pub degraded: bool,
}

/// Check a raw request and fill in defaults
pub fn validate(request: TriageRequest) -> Result<ValidatedRequest, TriageError> {
    if request.message.trim().is_empty() {
        return Err(TriageError::Validation("message must not be empty".to_string()));
    }

    let explicit_handler = match request.explicit_handler.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<HandlerId>()
                .map_err(|e| TriageError::Validation(e.to_string()))?,
        ),
    };

    let caller_id = request
        .caller_id
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| ANONYMOUS_CALLER.to_string());

    let conversation_id = request
        .conversation_id
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Ok(ValidatedRequest {
        message: request.message,
        caller_id,
        conversation_id,
        explicit_handler,
        caller_context: request.caller_context,
    })
}

/// The assembled engine. Built once at startup and shared behind an `Arc`.
pub struct TriageService {
    router: Router,
    dispatcher: Dispatcher,
    recorder: ConversationRecorder,
}

impl TriageService {
    pub fn new(router: Router, dispatcher: Dispatcher, recorder: ConversationRecorder) -> Self {
        Self {
            router,
            dispatcher,
            recorder,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn recorder(&self) -> &ConversationRecorder {
        &self.recorder
    }

    /// Routing only: no dispatch, no record
    pub fn route(&self, request: &ValidatedRequest) -> RoutingDecision {
        self.router.route(
            &request.message,
            &request.caller_context,
            request.explicit_handler,
        )
    }

    /// Run the full pipeline for one request.
    ///
    /// Only validation errors are returned; a failed dispatch still yields
    /// `Ok` with `degraded` set.
    pub async fn handle(
        &self,
        request: TriageRequest,
        cancel: &CancellationToken,
    ) -> Result<TriageResponse, TriageError> {
        let request = validate(request)?;
        let decision = self.route(&request);

        let outcome = self
            .dispatcher
            .dispatch(
                &decision,
                DispatchRequest {
                    message: &request.message,
                    conversation_id: &request.conversation_id,
                    caller_id: &request.caller_id,
                    caller_context: &request.caller_context,
                },
                cancel,
            )
            .await;

        let (response_text, degraded) = match outcome {
            DispatchOutcome::Delivered { response_text } => (response_text, false),
            DispatchOutcome::Failed { error } => {
                warn!(
                    "Serving fallback for conversation {} ({}): {}",
                    request.conversation_id, decision.selected_handler_id, error
                );
                let lang = language::detect(&request.message);
                (language::fallback_text(lang).to_string(), true)
            }
        };

        let urgency = Urgency::from_decision(&decision);
        let record = self.recorder.build_record(
            &request.conversation_id,
            &request.caller_id,
            &request.message,
            &response_text,
            decision.selected_handler_id,
            urgency,
        );
        // Detached: the audit write outlives a disconnected caller.
        drop(self.recorder.record_detached(record));

        info!(
            "Conversation {} handled by {} (confidence {:.2}, urgency {}, degraded={})",
            request.conversation_id, decision.selected_handler_id, decision.confidence, urgency, degraded
        );

        Ok(TriageResponse {
            response_text,
            selected_handler_id: decision.selected_handler_id,
            confidence: decision.confidence,
            reasons: decision.reasons,
            emergency_override_applied: decision.emergency_override_applied,
            conversation_id: request.conversation_id,
            degraded,
        })
    }
}
