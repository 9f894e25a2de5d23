//! # Wire Messages
//!
//! `RawMessage` is what travels on the transport: a header map plus an opaque
//! body. The typed events below are the engine's view of the messages it
//! consumes and produces, each with a conversion to and from the raw form.
//!
//! Request content always travels as the message body. Additional headers
//! travel as ordinary headers prefixed with `x-additional-`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::errors::MessagingError;
use crate::constants::{headers, REQUEST_TYPE};
use crate::state_machine::{ResponseStatus, WorkerResponseStatus};

const STATUS_HEADER: &str = "status";
const MESSAGES_HEADER: &str = "messages";
const WORKER_TYPE_HEADER: &str = "worker-type";
const REQUEST_TYPE_HEADER: &str = "request-type";
const MESSAGE_HEADER: &str = "message";

/// Header value as found on the wire. Some brokers hand string headers over
/// as raw bytes, so both forms are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderValue {
    Text(String),
    Bytes(Vec<u8>),
}

impl HeaderValue {
    /// Text view of the header, decoding bytes lossily as UTF-8
    pub fn as_text(&self) -> String {
        match self {
            HeaderValue::Text(text) => text.clone(),
            HeaderValue::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Text(value)
    }
}

/// A transport message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub headers: HashMap<String, HeaderValue>,
    pub body: Vec<u8>,
}

impl RawMessage {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            headers: HashMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    fn with_optional_header(self, name: &str, value: Option<&String>) -> Self {
        match value {
            Some(value) => self.with_header(name, value.clone()),
            None => self,
        }
    }

    fn with_additional_headers(mut self, additional: &BTreeMap<String, String>) -> Self {
        for (key, value) in additional {
            self.headers.insert(
                format!("{}{key}", headers::ADDITIONAL_PREFIX),
                HeaderValue::Text(value.clone()),
            );
        }
        self
    }

    /// Header as text, treating blank values as absent
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .map(HeaderValue::as_text)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn required_header(&self, name: &str) -> Result<String, MessagingError> {
        self.header(name)
            .ok_or_else(|| MessagingError::missing_header(name))
    }

    /// Headers carrying the `x-additional-` prefix, with the prefix removed
    pub fn additional_headers(&self) -> BTreeMap<String, String> {
        self.headers
            .iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(headers::ADDITIONAL_PREFIX)
                    .map(|key| (key.to_string(), value.as_text()))
            })
            .collect()
    }
}

/// Raw submission from an originator. Headers are optional here; the
/// validator decides what is missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestEvent {
    pub tenant: Option<String>,
    pub owner: Option<String>,
    pub content_type: Option<String>,
    pub session: Option<String>,
    pub request_id: Option<String>,
    pub additional_headers: BTreeMap<String, String>,
    pub content: Vec<u8>,
}

impl RequestEvent {
    pub fn new(content: Vec<u8>) -> Self {
        Self {
            content,
            ..Default::default()
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_additional_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_headers.insert(key.into(), value.into());
        self
    }

    pub fn from_message(message: &RawMessage) -> Self {
        Self {
            tenant: message.header(headers::TENANT),
            owner: message.header(headers::OWNER),
            content_type: message.header(headers::CONTENT_TYPE),
            session: message.header(headers::SESSION),
            request_id: message.header(headers::REQUEST_ID),
            additional_headers: message.additional_headers(),
            content: message.body.clone(),
        }
    }

    pub fn to_message(&self) -> RawMessage {
        RawMessage::new(self.content.clone())
            .with_optional_header(headers::TENANT, self.tenant.as_ref())
            .with_optional_header(headers::OWNER, self.owner.as_ref())
            .with_optional_header(headers::CONTENT_TYPE, self.content_type.as_ref())
            .with_optional_header(headers::SESSION, self.session.as_ref())
            .with_optional_header(headers::REQUEST_ID, self.request_id.as_ref())
            .with_additional_headers(&self.additional_headers)
    }
}

/// Request published on a worker's inbound exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRequestEvent {
    pub request_id: String,
    pub content_type: String,
    pub source: String,
    pub session: String,
    pub additional_headers: BTreeMap<String, String>,
    pub content: Vec<u8>,
}

impl WorkerRequestEvent {
    pub fn to_message(&self) -> RawMessage {
        RawMessage::new(self.content.clone())
            .with_header(headers::REQUEST_ID, self.request_id.clone())
            .with_header(headers::CONTENT_TYPE, self.content_type.clone())
            .with_header(headers::OWNER, self.source.clone())
            .with_header(headers::SESSION, self.session.clone())
            .with_additional_headers(&self.additional_headers)
    }

    pub fn from_message(message: &RawMessage) -> Result<Self, MessagingError> {
        Ok(Self {
            request_id: message.required_header(headers::REQUEST_ID)?,
            content_type: message.required_header(headers::CONTENT_TYPE)?,
            source: message.required_header(headers::OWNER)?,
            session: message.required_header(headers::SESSION)?,
            additional_headers: message.additional_headers(),
            content: message.body.clone(),
        })
    }
}

/// Outcome reported by a worker for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerResponseEvent {
    pub request_id: String,
    pub status: WorkerResponseStatus,
    pub messages: Vec<String>,
    pub content: Option<Vec<u8>>,
    pub additional_headers: BTreeMap<String, String>,
}

impl WorkerResponseEvent {
    pub fn new(request_id: impl Into<String>, status: WorkerResponseStatus) -> Self {
        Self {
            request_id: request_id.into(),
            status,
            messages: Vec::new(),
            content: None,
            additional_headers: BTreeMap::new(),
        }
    }

    pub fn with_messages<I, S>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.messages = messages.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_content(mut self, content: Vec<u8>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_additional_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_headers.insert(key.into(), value.into());
        self
    }

    pub fn to_message(&self) -> Result<RawMessage, MessagingError> {
        let messages = serde_json::to_string(&self.messages)?;
        Ok(RawMessage::new(self.content.clone().unwrap_or_default())
            .with_header(headers::REQUEST_ID, self.request_id.clone())
            .with_header(STATUS_HEADER, self.status.to_string())
            .with_header(MESSAGES_HEADER, messages)
            .with_additional_headers(&self.additional_headers))
    }

    pub fn from_message(message: &RawMessage) -> Result<Self, MessagingError> {
        let request_id = message.required_header(headers::REQUEST_ID)?;
        let status_text = message.required_header(STATUS_HEADER)?;
        let status: WorkerResponseStatus =
            serde_json::from_value(serde_json::Value::String(status_text.clone()))
                .map_err(|e| MessagingError::invalid_header(STATUS_HEADER, e.to_string()))?;
        let messages = match message.header(MESSAGES_HEADER) {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };
        let content = if message.body.is_empty() {
            None
        } else {
            Some(message.body.clone())
        };

        Ok(Self {
            request_id,
            status,
            messages,
            content,
            additional_headers: message.additional_headers(),
        })
    }
}

/// A worker request the transport gave up delivering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRequestDlqEvent {
    pub request_id: String,
    /// Error payload taken from the dead-letter envelope
    pub error: Option<String>,
}

impl WorkerRequestDlqEvent {
    pub fn from_message(message: &RawMessage) -> Result<Self, MessagingError> {
        Ok(Self {
            request_id: message.required_header(headers::REQUEST_ID)?,
            error: message.header(headers::DLQ_ERROR_STACKTRACE),
        })
    }

    pub fn to_message(&self) -> RawMessage {
        RawMessage::new(Vec::new())
            .with_header(headers::REQUEST_ID, self.request_id.clone())
            .with_optional_header(headers::DLQ_ERROR_STACKTRACE, self.error.as_ref())
    }
}

/// Outcome event sent back to the originator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEvent {
    /// Absent when a submission was skipped before an id could be read
    pub request_id: Option<String>,
    pub source: Option<String>,
    pub session: Option<String>,
    pub status: ResponseStatus,
    pub worker_type: Option<String>,
    pub request_type: String,
    pub message: String,
    pub content: Option<Vec<u8>>,
}

impl ResponseEvent {
    pub fn new(status: ResponseStatus, message: impl Into<String>) -> Self {
        Self {
            request_id: None,
            source: None,
            session: None,
            status,
            worker_type: None,
            request_type: REQUEST_TYPE.to_string(),
            message: message.into(),
            content: None,
        }
    }

    pub fn to_message(&self) -> RawMessage {
        RawMessage::new(self.content.clone().unwrap_or_default())
            .with_optional_header(headers::REQUEST_ID, self.request_id.as_ref())
            .with_optional_header(headers::OWNER, self.source.as_ref())
            .with_optional_header(headers::SESSION, self.session.as_ref())
            .with_optional_header(WORKER_TYPE_HEADER, self.worker_type.as_ref())
            .with_header(STATUS_HEADER, self.status.to_string())
            .with_header(REQUEST_TYPE_HEADER, self.request_type.clone())
            .with_header(MESSAGE_HEADER, self.message.clone())
    }

    pub fn from_message(message: &RawMessage) -> Result<Self, MessagingError> {
        let status_text = message.required_header(STATUS_HEADER)?;
        let status: ResponseStatus =
            serde_json::from_value(serde_json::Value::String(status_text))
                .map_err(|e| MessagingError::invalid_header(STATUS_HEADER, e.to_string()))?;
        Ok(Self {
            request_id: message.header(headers::REQUEST_ID),
            source: message.header(headers::OWNER),
            session: message.header(headers::SESSION),
            status,
            worker_type: message.header(WORKER_TYPE_HEADER),
            request_type: message
                .header(REQUEST_TYPE_HEADER)
                .unwrap_or_else(|| REQUEST_TYPE.to_string()),
            message: message.header(MESSAGE_HEADER).unwrap_or_default(),
            content: if message.body.is_empty() {
                None
            } else {
                Some(message.body.clone())
            },
        })
    }
}

/// Liveness signal emitted periodically by every worker instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHeartBeatEvent {
    pub worker_id: String,
    pub worker_type: String,
    pub heartbeat_date: DateTime<Utc>,
}

impl WorkerHeartBeatEvent {
    pub fn new(worker_id: impl Into<String>, worker_type: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            worker_type: worker_type.into(),
            heartbeat_date: Utc::now(),
        }
    }

    pub fn to_message(&self) -> Result<RawMessage, MessagingError> {
        Ok(RawMessage::new(serde_json::to_vec(self)?)
            .with_header(headers::WORKER_ID, self.worker_id.clone()))
    }

    pub fn from_message(message: &RawMessage) -> Result<Self, MessagingError> {
        Ok(serde_json::from_slice(&message.body)?)
    }
}
