//! Error types for the dispatch engine.
//!
//! Only infrastructure failures (store, transport, configuration) travel as
//! `Err`. Per-request outcomes are recorded on the request itself as a status
//! plus error text and never abort a batch.

use thiserror::Error;

use crate::messaging::MessagingError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Messaging error: {0}")]
    MessagingError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Orchestration error: {0}")]
    OrchestrationError(String),
    #[error("Request not found: {request_id}")]
    NotFound { request_id: String },
}

impl DispatchError {
    pub fn not_found(request_id: impl Into<String>) -> Self {
        Self::NotFound {
            request_id: request_id.into(),
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(error: serde_json::Error) -> Self {
        DispatchError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for DispatchError {
    fn from(err: sqlx::Error) -> Self {
        DispatchError::DatabaseError(err.to_string())
    }
}

impl From<MessagingError> for DispatchError {
    fn from(error: MessagingError) -> Self {
        DispatchError::MessagingError(error.to_string())
    }
}

impl From<config::ConfigError> for DispatchError {
    fn from(error: config::ConfigError) -> Self {
        DispatchError::ConfigurationError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
