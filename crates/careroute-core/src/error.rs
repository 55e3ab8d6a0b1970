//! Error types for careroute-core

use std::time::Duration;
use thiserror::Error;

use crate::types::HandlerId;

/// A handler id that is not part of the fixed enumeration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown handler id '{0}'")]
pub struct UnknownHandler(pub String);

/// Problems found while loading a profile document
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to read profile document: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse profile document: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unsupported profile document version {0}")]
    UnsupportedVersion(u32),

    #[error(transparent)]
    UnknownHandler(#[from] UnknownHandler),

    #[error("profile for '{0}' is defined more than once")]
    DuplicateProfile(HandlerId),

    #[error("no profile defined for '{0}'")]
    MissingProfile(HandlerId),

    #[error("confidence boost {boost} for '{handler}' is outside [0, 1]")]
    BoostOutOfRange { handler: HandlerId, boost: f64 },

    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("profile document defines no emergency rules")]
    NoEmergencyRules,
}

/// Why a downstream handler invocation did not produce a response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("handler did not answer within {0:?}")]
    Timeout(Duration),

    #[error("handler unreachable: {0}")]
    Unreachable(String),

    #[error("handler reported error {code}: {message}")]
    HandlerError { code: String, message: String },

    #[error("malformed handler response: {0}")]
    MalformedResponse(String),

    #[error("dispatch cancelled")]
    Cancelled,
}

/// Request-level errors surfaced to the caller as client errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriageError {
    #[error("invalid request: {0}")]
    Validation(String),
}
