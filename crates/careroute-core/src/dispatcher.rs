//! Dispatcher — one bounded, cancellable call to the selected handler
//!
//! Exactly one attempt per request, no retries. Every failure mode comes
//! back as a [`DispatchOutcome::Failed`] value; substituting a safe reply is
//! the caller's job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::types::{CallerContext, HandlerId, RoutingDecision};

/// Body sent to a downstream handler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HandlerRequest {
    pub message: String,
    pub conversation_id: String,
    pub caller_id: String,
    pub caller_context: CallerContext,
    pub routing_info: RoutingDecision,
}

/// The only two reply shapes a handler may send back
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HandlerReply {
    Failure {
        #[serde(rename = "errorCode")]
        error_code: Value,
        #[serde(rename = "errorMessage")]
        error_message: String,
    },
    Success {
        #[serde(rename = "responseText")]
        response_text: String,
    },
}

/// Interpret a raw handler reply. Anything that is neither shape is a
/// malformed response.
pub fn parse_reply(body: Value) -> Result<String, DispatchError> {
    match serde_json::from_value::<HandlerReply>(body.clone()) {
        Ok(HandlerReply::Success { response_text }) => Ok(response_text),
        Ok(HandlerReply::Failure {
            error_code,
            error_message,
        }) => Err(DispatchError::HandlerError {
            code: match error_code {
                Value::String(s) => s,
                other => other.to_string(),
            },
            message: error_message,
        }),
        Err(_) => Err(DispatchError::MalformedResponse(truncate(&body.to_string(), 200))),
    }
}

/// Moves a request to a named handler and returns its raw JSON reply
#[async_trait]
pub trait HandlerTransport: Send + Sync {
    async fn send(&self, endpoint: &str, request: &HandlerRequest) -> Result<Value, DispatchError>;
}

/// Network name of every handler. One field per [`HandlerId`], so a missing
/// binding cannot exist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HandlerEndpoints {
    pub safety: String,
    pub illness_triage: String,
    pub emotional_support: String,
    pub general_wellness: String,
}

impl HandlerEndpoints {
    pub fn endpoint(&self, id: HandlerId) -> &str {
        match id {
            HandlerId::Safety => &self.safety,
            HandlerId::IllnessTriage => &self.illness_triage,
            HandlerId::EmotionalSupport => &self.emotional_support,
            HandlerId::GeneralWellness => &self.general_wellness,
        }
    }
}

impl Default for HandlerEndpoints {
    fn default() -> Self {
        Self {
            safety: "safety-agent".to_string(),
            illness_triage: "illness-triage-agent".to_string(),
            emotional_support: "emotional-support-agent".to_string(),
            general_wellness: "general-wellness-agent".to_string(),
        }
    }
}

/// Result of one dispatch attempt
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Delivered { response_text: String },
    Failed { error: DispatchError },
}

impl DispatchOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    pub fn response_text(&self) -> Option<&str> {
        match self {
            Self::Delivered { response_text } => Some(response_text),
            Self::Failed { .. } => None,
        }
    }

    pub fn error_detail(&self) -> Option<String> {
        match self {
            Self::Delivered { .. } => None,
            Self::Failed { error } => Some(error.to_string()),
        }
    }
}

/// Everything the dispatcher needs to know about the request besides the decision
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest<'a> {
    pub message: &'a str,
    pub conversation_id: &'a str,
    pub caller_id: &'a str,
    pub caller_context: &'a CallerContext,
}

pub struct Dispatcher {
    transport: Arc<dyn HandlerTransport>,
    endpoints: HandlerEndpoints,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn HandlerTransport>, endpoints: HandlerEndpoints, timeout: Duration) -> Self {
        Self {
            transport,
            endpoints,
            timeout,
        }
    }

    pub fn endpoints(&self) -> &HandlerEndpoints {
        &self.endpoints
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Invoke the handler named by `decision`, bounded by the configured
    /// timeout and by `cancel`.
    pub async fn dispatch(
        &self,
        decision: &RoutingDecision,
        request: DispatchRequest<'_>,
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        let endpoint = self.endpoints.endpoint(decision.selected_handler_id);
        let body = HandlerRequest {
            message: request.message.to_string(),
            conversation_id: request.conversation_id.to_string(),
            caller_id: request.caller_id.to_string(),
            caller_context: request.caller_context.clone(),
            routing_info: decision.clone(),
        };

        debug!(
            "Dispatching conversation {} to {} ({})",
            request.conversation_id, decision.selected_handler_id, endpoint
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DispatchError::Cancelled),
            res = tokio::time::timeout(self.timeout, self.transport.send(endpoint, &body)) => {
                match res {
                    Ok(inner) => inner.and_then(parse_reply),
                    Err(_) => Err(DispatchError::Timeout(self.timeout)),
                }
            }
        };

        match result {
            Ok(response_text) => DispatchOutcome::Delivered { response_text },
            Err(error) => {
                warn!(
                    "Dispatch to {} failed for conversation {}: {}",
                    endpoint, request.conversation_id, error
                );
                DispatchOutcome::Failed { error }
            }
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replies with a canned value and remembers what it was asked
    struct CannedTransport {
        reply: Result<Value, DispatchError>,
        delay: Duration,
        seen: Mutex<Vec<(String, HandlerRequest)>>,
    }

    impl CannedTransport {
        fn new(reply: Result<Value, DispatchError>) -> Self {
            Self {
                reply,
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl HandlerTransport for CannedTransport {
        async fn send(&self, endpoint: &str, request: &HandlerRequest) -> Result<Value, DispatchError> {
            self.seen
                .lock()
                .unwrap()
                .push((endpoint.to_string(), request.clone()));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply.clone()
        }
    }

    fn decision(handler: HandlerId) -> RoutingDecision {
        RoutingDecision {
            selected_handler_id: handler,
            confidence: 0.8,
            reasons: vec!["matched 2/10 keywords".to_string()],
            emergency_override_applied: false,
        }
    }

    fn request<'a>(ctx: &'a CallerContext) -> DispatchRequest<'a> {
        DispatchRequest {
            message: "I have a fever",
            conversation_id: "conv-1",
            caller_id: "user-7",
            caller_context: ctx,
        }
    }

    #[test]
    fn test_parse_reply_shapes() {
        assert_eq!(parse_reply(json!({"responseText": "rest"})).unwrap(), "rest");
        assert_eq!(
            parse_reply(json!({"errorCode": 503, "errorMessage": "model busy"})).unwrap_err(),
            DispatchError::HandlerError {
                code: "503".to_string(),
                message: "model busy".to_string()
            }
        );
        assert!(matches!(
            parse_reply(json!({"text": "wrong field"})),
            Err(DispatchError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_reply(json!("just a string")),
            Err(DispatchError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_endpoint_lookup_is_total() {
        let endpoints = HandlerEndpoints::default();
        for id in HandlerId::ALL {
            assert!(!endpoints.endpoint(id).is_empty());
        }
        assert_eq!(endpoints.endpoint(HandlerId::Safety), "safety-agent");
    }

    #[tokio::test]
    async fn test_dispatch_success_sends_full_contract() {
        let transport = Arc::new(CannedTransport::new(Ok(json!({"responseText": "Drink fluids."}))));
        let dispatcher = Dispatcher::new(transport.clone(), HandlerEndpoints::default(), Duration::from_secs(1));
        let ctx = CallerContext::default();

        let outcome = dispatcher
            .dispatch(&decision(HandlerId::IllnessTriage), request(&ctx), &CancellationToken::new())
            .await;

        assert!(outcome.success());
        assert_eq!(outcome.response_text(), Some("Drink fluids."));
        assert!(outcome.error_detail().is_none());

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "illness-triage-agent");
        assert_eq!(seen[0].1.caller_id, "user-7");
        assert_eq!(seen[0].1.routing_info.selected_handler_id, HandlerId::IllnessTriage);
    }

    #[tokio::test]
    async fn test_dispatch_handler_error() {
        let transport = Arc::new(CannedTransport::new(Ok(
            json!({"errorCode": "E_MODEL", "errorMessage": "generation failed"}),
        )));
        let dispatcher = Dispatcher::new(transport, HandlerEndpoints::default(), Duration::from_secs(1));
        let ctx = CallerContext::default();

        let outcome = dispatcher
            .dispatch(&decision(HandlerId::GeneralWellness), request(&ctx), &CancellationToken::new())
            .await;

        assert!(!outcome.success());
        assert!(outcome.error_detail().unwrap().contains("E_MODEL"));
    }

    #[tokio::test]
    async fn test_dispatch_unreachable_not_retried() {
        let transport = Arc::new(CannedTransport::new(Err(DispatchError::Unreachable(
            "connection refused".to_string(),
        ))));
        let dispatcher = Dispatcher::new(transport.clone(), HandlerEndpoints::default(), Duration::from_secs(1));
        let ctx = CallerContext::default();

        let outcome = dispatcher
            .dispatch(&decision(HandlerId::Safety), request(&ctx), &CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            DispatchOutcome::Failed {
                error: DispatchError::Unreachable("connection refused".to_string())
            }
        );
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_times_out() {
        let transport = Arc::new(
            CannedTransport::new(Ok(json!({"responseText": "too late"}))).slow(Duration::from_secs(10)),
        );
        let timeout = Duration::from_millis(50);
        let dispatcher = Dispatcher::new(transport, HandlerEndpoints::default(), timeout);
        let ctx = CallerContext::default();

        let outcome = dispatcher
            .dispatch(&decision(HandlerId::EmotionalSupport), request(&ctx), &CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            DispatchOutcome::Failed {
                error: DispatchError::Timeout(timeout)
            }
        );
    }

    #[tokio::test]
    async fn test_dispatch_cancelled() {
        let transport = Arc::new(
            CannedTransport::new(Ok(json!({"responseText": "never"}))).slow(Duration::from_secs(30)),
        );
        let dispatcher = Dispatcher::new(transport, HandlerEndpoints::default(), Duration::from_secs(60));
        let ctx = CallerContext::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = dispatcher
            .dispatch(&decision(HandlerId::IllnessTriage), request(&ctx), &cancel)
            .await;

        assert_eq!(
            outcome,
            DispatchOutcome::Failed {
                error: DispatchError::Cancelled
            }
        );
    }

    #[test]
    fn test_handler_request_wire_names() {
        let ctx = CallerContext::default();
        let body = HandlerRequest {
            message: "hi".to_string(),
            conversation_id: "c".to_string(),
            caller_id: "anonymous".to_string(),
            caller_context: ctx,
            routing_info: decision(HandlerId::Safety),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("conversationId").is_some());
        assert!(value.get("callerContext").is_some());
        assert_eq!(value["routingInfo"]["selectedHandlerId"], "safety");
    }
}
