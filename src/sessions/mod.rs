//! # Session Reporting
//!
//! The engine reports request lifecycle changes to a session aggregator
//! through [`SessionNotifier`]. It owns no logic about how sessions are
//! summarized; it only emits what happened.
//!
//! [`SessionEventPublisher`] is the in-process sink: a broadcast channel any
//! number of aggregators can subscribe to. Events published while nobody is
//! listening are dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::broadcast;
use tracing::trace;

use crate::models::{Request, RequestSnapshot};

/// A submission rejected by validation, never stored as a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRequest {
    pub request_id: Option<String>,
    pub source: Option<String>,
    pub session: Option<String>,
    pub content_type: Option<String>,
    pub messages: Vec<String>,
}

/// Requests registered and submissions skipped by one validation batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionsRequestsInfo {
    pub requests: Vec<RequestSnapshot>,
    pub skipped: Vec<SkippedRequest>,
}

/// One session's share of a [`SessionsRequestsInfo`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRequests {
    pub requests: Vec<RequestSnapshot>,
    pub skipped: Vec<SkippedRequest>,
}

impl SessionsRequestsInfo {
    pub fn new(requests: Vec<RequestSnapshot>, skipped: Vec<SkippedRequest>) -> Self {
        Self { requests, skipped }
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.skipped.is_empty()
    }

    /// Group by `(source, session)`. Skipped submissions missing either
    /// header are grouped under an empty string.
    pub fn by_session(&self) -> BTreeMap<(String, String), SessionRequests> {
        let mut grouped: BTreeMap<(String, String), SessionRequests> = BTreeMap::new();
        for request in &self.requests {
            grouped
                .entry((request.source.clone(), request.session.clone()))
                .or_default()
                .requests
                .push(request.clone());
        }
        for skipped in &self.skipped {
            grouped
                .entry((
                    skipped.source.clone().unwrap_or_default(),
                    skipped.session.clone().unwrap_or_default(),
                ))
                .or_default()
                .skipped
                .push(skipped.clone());
        }
        grouped
    }
}

/// `before` snapshots of the requests in `written`, in the order of
/// `written`. Requests a batch meant to change but could not write drop out,
/// so the result pairs one to one with `written`.
pub fn written_before(before: Vec<RequestSnapshot>, written: &[Request]) -> Vec<RequestSnapshot> {
    let mut by_id: HashMap<String, RequestSnapshot> = before
        .into_iter()
        .map(|snapshot| (snapshot.request_id.clone(), snapshot))
        .collect();
    written
        .iter()
        .filter_map(|request| by_id.remove(&request.request_id))
        .collect()
}

/// Lifecycle event delivered to session aggregators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    NewRequests(SessionsRequestsInfo),
    /// Same requests before and after one batch of transitions, in matching order
    StatusChanged {
        before: Vec<RequestSnapshot>,
        after: Vec<RequestSnapshot>,
    },
    Deleted(Vec<RequestSnapshot>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedSessionEvent {
    pub event: SessionEvent,
    pub published_at: DateTime<Utc>,
}

/// Sink for session lifecycle notifications
#[async_trait]
pub trait SessionNotifier: Send + Sync {
    async fn notify_new_requests(&self, info: SessionsRequestsInfo);

    async fn notify_sessions(&self, before: Vec<RequestSnapshot>, after: Vec<RequestSnapshot>);

    async fn notify_delete(&self, deleted: Vec<RequestSnapshot>);
}

#[derive(Debug, Clone)]
pub struct SessionEventPublisher {
    sender: broadcast::Sender<PublishedSessionEvent>,
}

impl SessionEventPublisher {
    /// Create a new publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedSessionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn publish(&self, event: SessionEvent) {
        let published = PublishedSessionEvent {
            event,
            published_at: Utc::now(),
        };
        // No subscribers is fine.
        if self.sender.send(published).is_err() {
            trace!("No session event subscribers");
        }
    }
}

impl Default for SessionEventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl SessionNotifier for SessionEventPublisher {
    async fn notify_new_requests(&self, info: SessionsRequestsInfo) {
        if !info.is_empty() {
            self.publish(SessionEvent::NewRequests(info));
        }
    }

    async fn notify_sessions(&self, before: Vec<RequestSnapshot>, after: Vec<RequestSnapshot>) {
        if !after.is_empty() {
            self.publish(SessionEvent::StatusChanged { before, after });
        }
    }

    async fn notify_delete(&self, deleted: Vec<RequestSnapshot>) {
        if !deleted.is_empty() {
            self.publish(SessionEvent::Deleted(deleted));
        }
    }
}
