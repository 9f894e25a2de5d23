//! # Request
//!
//! The unit of work tracked end-to-end by the engine, from registration by the
//! validator until it is deleted on success (or on error when the routing
//! policy does not keep errors).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::state_machine::RequestStatus;

/// A request tracked by the dispatch engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Storage-assigned surrogate key, `None` until first persisted
    pub id: Option<i64>,

    /// Caller-supplied identifier, unique among live requests
    pub request_id: String,

    /// Selects the worker or workflow processing this request
    pub content_type: String,

    /// Logical owner of the request
    pub source: String,

    /// Session grouping key used for progress reporting
    pub session: String,

    pub status: RequestStatus,

    /// Current workflow step. `None` means the request has not started its
    /// workflow yet, which keeps a configured step numbered `0` unambiguous.
    pub step_number: Option<i32>,

    /// Worker type of the current step, `None` until the step initializer ran
    pub step_worker_type: Option<String>,

    /// Worker type the request was last sent to
    pub dispatched_worker_type: Option<String>,

    /// Opaque payload, replaced by each workflow step's output
    pub content: Vec<u8>,

    /// Last error reported for this request
    pub error: Option<String>,

    /// Opaque metadata threaded through every hop
    pub additional_headers: BTreeMap<String, String>,

    pub creation_date: DateTime<Utc>,
}

impl Request {
    /// Create a request ready for its first dispatch pass
    pub fn new(
        request_id: impl Into<String>,
        content_type: impl Into<String>,
        source: impl Into<String>,
        session: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        Self {
            id: None,
            request_id: request_id.into(),
            content_type: content_type.into(),
            source: source.into(),
            session: session.into(),
            status: RequestStatus::ToDispatch,
            step_number: None,
            step_worker_type: None,
            dispatched_worker_type: None,
            content,
            error: None,
            additional_headers: BTreeMap::new(),
            creation_date: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: RequestStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_step(mut self, step_number: Option<i32>, worker_type: Option<String>) -> Self {
        self.step_number = step_number;
        self.step_worker_type = worker_type;
        self
    }

    pub fn with_dispatched_worker_type(mut self, worker_type: impl Into<String>) -> Self {
        self.dispatched_worker_type = Some(worker_type.into());
        self
    }

    pub fn with_additional_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.additional_headers = headers;
        self
    }

    pub fn with_creation_date(mut self, creation_date: DateTime<Utc>) -> Self {
        self.creation_date = creation_date;
        self
    }

    /// Light copy used for session reporting, without payload
    pub fn snapshot(&self) -> RequestSnapshot {
        RequestSnapshot {
            request_id: self.request_id.clone(),
            content_type: self.content_type.clone(),
            source: self.source.clone(),
            session: self.session.clone(),
            status: self.status,
            step_number: self.step_number,
            step_worker_type: self.step_worker_type.clone(),
            dispatched_worker_type: self.dispatched_worker_type.clone(),
            error: self.error.clone(),
        }
    }

    /// Record the error carried by an event, or clear it when the event has none
    pub fn set_error_from_messages(&mut self, messages: &[String]) {
        self.error = if messages.is_empty() {
            None
        } else {
            Some(messages.join(","))
        };
    }
}

/// Payload-free view of a request at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub request_id: String,
    pub content_type: String,
    pub source: String,
    pub session: String,
    pub status: RequestStatus,
    pub step_number: Option<i32>,
    pub step_worker_type: Option<String>,
    pub dispatched_worker_type: Option<String>,
    pub error: Option<String>,
}
