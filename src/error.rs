use thiserror::Error;

use std::path::PathBuf;

/// Failure of a single component control operation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("component {component} not found")]
    ComponentNotFound { component: String },

    #[error("privileged backend unavailable: {reason}")]
    BackendUnavailable { reason: String },

    #[error("failed to switch {component}: {reason}")]
    OperationFailed { component: String, reason: String },

    #[error("failed to (de)serialize IFW rules of {package}: {reason}")]
    SerializationFailed { package: String, reason: String },
}

/// Rule bundle decoding and validation errors
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("malformed rule at component #{index}: field '{field}' {reason}")]
    MalformedRule {
        index: usize,
        field: &'static str,
        reason: String,
    },

    #[error("malformed rule bundle: field '{field}' {reason}")]
    MalformedBundle { field: &'static str, reason: String },

    #[error("failed to decode rule bundle: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum BlockerError {
    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid component '{entry}': {reason}")]
    InvalidComponent { entry: String, reason: String },
}
