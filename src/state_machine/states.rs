use serde::{Deserialize, Serialize};
use std::fmt;

/// Request lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    /// Registered (or advanced to a new workflow step) and waiting for a dispatch pass
    ToDispatch,
    /// Sent to a live worker's inbound exchange
    Dispatched,
    /// No live worker matched the current step; retried on a later pass
    NoWorkerAvailable,
    /// The worker acknowledged the request and is processing it
    Running,
    /// Terminal success (deleted once processed)
    Success,
    /// The worker rejected the request body
    InvalidContent,
    /// The worker, the transport or the workflow reported a failure
    Error,
    /// Marked for purge by an operator
    ToDelete,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 8] = [
        Self::ToDispatch,
        Self::Dispatched,
        Self::NoWorkerAvailable,
        Self::Running,
        Self::Success,
        Self::InvalidContent,
        Self::Error,
        Self::ToDelete,
    ];

    /// States an operator retry or delete may rewrite.
    pub const OPERATOR_ACTIONABLE: [RequestStatus; 3] =
        [Self::Error, Self::InvalidContent, Self::NoWorkerAvailable];

    /// Terminal outcomes reported by a worker
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::InvalidContent)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error | Self::InvalidContent)
    }

    /// A worker currently owns the request
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Dispatched | Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToDispatch => "TO_DISPATCH",
            Self::Dispatched => "DISPATCHED",
            Self::NoWorkerAvailable => "NO_WORKER_AVAILABLE",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::InvalidContent => "INVALID_CONTENT",
            Self::Error => "ERROR",
            Self::ToDelete => "TO_DELETE",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Invalid request status: {s}"))
    }
}

/// Status reported by a worker in a response event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerResponseStatus {
    Running,
    Success,
    InvalidContent,
    Error,
}

impl fmt::Display for WorkerResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::InvalidContent => "INVALID_CONTENT",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Outcome reported to the originator of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Granted,
    Delayed,
    InvalidContent,
    Success,
    Error,
    Skipped,
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Granted => "GRANTED",
            Self::Delayed => "DELAYED",
            Self::InvalidContent => "INVALID_CONTENT",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}
