//! # Originator Notifier
//!
//! Turns request statuses into originator-facing [`ResponseEvent`]s and
//! publishes them on the response queue. Notification is best effort: a
//! publish failure is logged and never fails the transition that caused it.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::constants::{messages, EMPTY_CONTENT};
use crate::messaging::{MessageClient, ResponseEvent};
use crate::models::Request;
use crate::sessions::SkippedRequest;
use crate::state_machine::{RequestStatus, ResponseStatus};

/// Separator used when several validation failures are reported at once
const SKIP_REASON_SEPARATOR: &str = "; ";

#[derive(Clone)]
pub struct Notifier {
    messaging: Arc<dyn MessageClient>,
    response_queue: String,
}

impl Notifier {
    pub fn new(messaging: Arc<dyn MessageClient>, response_queue: impl Into<String>) -> Self {
        Self {
            messaging,
            response_queue: response_queue.into(),
        }
    }

    /// Originator event for the request's current status, if that status is
    /// reported at all
    pub fn response_for(request: &Request) -> Option<ResponseEvent> {
        let worker_type = request.dispatched_worker_type.as_deref().unwrap_or_default();
        let (status, message) = match request.status {
            RequestStatus::Dispatched => (ResponseStatus::Granted, messages::GRANTED.to_string()),
            RequestStatus::NoWorkerAvailable => (
                ResponseStatus::Delayed,
                messages::format(messages::DELAYED, &[request.content_type.as_str()]),
            ),
            RequestStatus::InvalidContent => (
                ResponseStatus::InvalidContent,
                messages::format(messages::INVALID, &[worker_type]),
            ),
            RequestStatus::Success => (
                ResponseStatus::Success,
                messages::format(messages::SUCCESS, &[worker_type]),
            ),
            RequestStatus::Error => (
                ResponseStatus::Error,
                messages::format(
                    messages::ERROR,
                    &[worker_type, request.error.as_deref().unwrap_or_default()],
                ),
            ),
            // Running is not reported to avoid flooding the originator.
            RequestStatus::Running => return None,
            RequestStatus::ToDispatch | RequestStatus::ToDelete => {
                debug!(
                    request_id = %request.request_id,
                    status = %request.status,
                    "No originator notification for transient status"
                );
                return None;
            }
        };

        let mut event = ResponseEvent::new(status, message);
        event.request_id = Some(request.request_id.clone());
        event.source = Some(request.source.clone());
        event.session = Some(request.session.clone());
        event.worker_type = request.dispatched_worker_type.clone();
        if request.status == RequestStatus::Success {
            event.content = Some(if request.content.is_empty() {
                EMPTY_CONTENT.to_vec()
            } else {
                request.content.clone()
            });
        }
        Some(event)
    }

    /// Originator event for a submission rejected by validation
    pub fn skipped_response(skipped: &SkippedRequest) -> ResponseEvent {
        let mut event = ResponseEvent::new(
            ResponseStatus::Skipped,
            skipped.messages.join(SKIP_REASON_SEPARATOR),
        );
        event.request_id = skipped.request_id.clone();
        event.source = skipped.source.clone();
        event.session = skipped.session.clone();
        event
    }

    /// Notify the originators of every request in a reportable status.
    /// Returns the number of events published.
    pub async fn notify_status(&self, requests: &[Request]) -> usize {
        let events: Vec<ResponseEvent> = requests.iter().filter_map(Self::response_for).collect();
        self.publish(events).await
    }

    pub async fn notify_skipped(&self, skipped: &[SkippedRequest]) -> usize {
        let events: Vec<ResponseEvent> = skipped.iter().map(Self::skipped_response).collect();
        self.publish(events).await
    }

    async fn publish(&self, events: Vec<ResponseEvent>) -> usize {
        if events.is_empty() {
            return 0;
        }
        let count = events.len();
        let messages = events.iter().map(ResponseEvent::to_message).collect();
        match self.messaging.send_batch(&self.response_queue, messages).await {
            Ok(()) => {
                debug!(queue = %self.response_queue, count = count, "Published originator responses");
                count
            }
            Err(e) => {
                warn!(
                    queue = %self.response_queue,
                    count = count,
                    error = %e,
                    "Failed to publish originator responses"
                );
                0
            }
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("response_queue", &self.response_queue)
            .finish_non_exhaustive()
    }
}
