//! Request search filters and pagination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::Request;
use crate::state_machine::RequestStatus;

/// Inclusive creation date bounds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, date: &DateTime<Utc>) -> bool {
        self.after.map_or(true, |after| *date >= after)
            && self.before.map_or(true, |before| *date <= before)
    }
}

/// Filters for request searches. Empty filters match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestSearchParameters {
    #[serde(default)]
    pub statuses: Vec<RequestStatus>,
    #[serde(default)]
    pub content_types: Vec<String>,
    pub source: Option<String>,
    pub session: Option<String>,
    pub dispatched_worker_type: Option<String>,
    #[serde(default)]
    pub creation_date: DateRange,
    #[serde(default)]
    pub ids: Vec<i64>,
}

impl RequestSearchParameters {
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = RequestStatus>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_content_types<I, S>(mut self, content_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.content_types = content_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn with_creation_date(mut self, creation_date: DateRange) -> Self {
        self.creation_date = creation_date;
        self
    }

    pub fn with_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.ids = ids.into_iter().collect();
        self
    }

    /// Restrict the status filter to `allowed`; an empty filter becomes `allowed`.
    pub fn restricted_to(mut self, allowed: &[RequestStatus]) -> Self {
        self.statuses = if self.statuses.is_empty() {
            allowed.to_vec()
        } else {
            self.statuses
                .into_iter()
                .filter(|status| allowed.contains(status))
                .collect()
        };
        self
    }

    /// In-memory evaluation, used by the in-memory store
    pub fn matches(&self, request: &Request) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&request.status))
            && (self.content_types.is_empty()
                || self.content_types.contains(&request.content_type))
            && self.source.as_ref().map_or(true, |s| *s == request.source)
            && self.session.as_ref().map_or(true, |s| *s == request.session)
            && self
                .dispatched_worker_type
                .as_ref()
                .map_or(true, |w| request.dispatched_worker_type.as_ref() == Some(w))
            && self.creation_date.contains(&request.creation_date)
            && (self.ids.is_empty() || request.id.map_or(false, |id| self.ids.contains(&id)))
    }
}

/// Zero-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
}

impl PageRequest {
    pub fn new(page: usize, size: usize) -> Self {
        Self { page, size }
    }

    pub fn first(size: usize) -> Self {
        Self::new(0, size)
    }

    pub fn offset(&self) -> usize {
        self.page * self.size
    }
}

/// One page of results plus the total number of matches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: PageRequest,
    pub total_elements: u64,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        ((self.page.offset() + self.content.len()) as u64) < self.total_elements
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}
