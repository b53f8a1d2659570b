//! Error types
//!
//! Administrative errors surface synchronously to whoever manages bridges
//! and adapters. Per-message errors (`TransformError`, `PublishError`) never
//! leave the forwarding or publish pipelines; they are counted and logged.

use serde::Serialize;
use thiserror::Error;

use crate::topic::TopicError;

/// A single field-level validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors returned by bridge and adapter management operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdminError {
    /// Configuration does not match the expected shape
    #[error("validation failed: {}", format_fields(.0))]
    Validation(Vec<FieldError>),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} id must be unique: {id}")]
    DuplicateId { kind: &'static str, id: String },
    #[error("unknown adapter type: {0}")]
    UnknownType(String),
    #[error("adapter type already registered: {0}")]
    TypeAlreadyRegistered(String),
    /// The adapter factory rejected an otherwise schema-valid config
    #[error("adapter error: {0}")]
    Adapter(String),
}

fn format_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Serialize)]
struct ErrorList<'a> {
    errors: &'a [FieldError],
}

#[derive(Serialize)]
struct ErrorMessage {
    message: String,
}

impl AdminError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        AdminError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn duplicate(kind: &'static str, id: impl Into<String>) -> Self {
        AdminError::DuplicateId {
            kind,
            id: id.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AdminError::Validation(vec![FieldError::new(field, message)])
    }

    /// Structured payload for the administrative layer
    ///
    /// Validation failures become `{"errors": [{"field", "message"}]}`,
    /// everything else a single `{"message"}`.
    pub fn to_payload(&self) -> serde_json::Value {
        let payload = match self {
            AdminError::Validation(fields) => serde_json::to_value(ErrorList { errors: fields }),
            other => serde_json::to_value(ErrorMessage {
                message: other.to_string(),
            }),
        };
        payload.unwrap_or(serde_json::Value::Null)
    }
}

/// A topic, QoS or property rewrite that cannot be applied
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("invalid destination topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: TopicError },
    #[error("invalid topic pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("invalid QoS ceiling {0}")]
    InvalidQos(u8),
}

/// Sending a message to its destination failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("publish rejected: {0}")]
    Rejected(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("interceptor failed: {0}")]
    Interceptor(String),
    #[error("payload conversion failed: {0}")]
    Conversion(String),
    #[error("publish task aborted")]
    Aborted,
}
