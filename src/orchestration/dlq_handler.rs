//! # Dead Letter Handler
//!
//! Worker requests the transport failed to deliver come back on the request
//! dead-letter queue. Requests a worker could still own are failed with the
//! error found in the dead-letter envelope; requests that already moved on
//! are left alone.

use std::collections::HashMap;
use tracing::{error, info, instrument, warn};

use super::context::DispatchContext;
use super::notifier::Notifier;
use crate::constants::messages;
use crate::error::Result;
use crate::logging::log_request_transition;
use crate::messaging::WorkerRequestDlqEvent;
use crate::models::{Request, RequestSnapshot};
use crate::sessions::written_before;
use crate::state_machine::guards::accepts_dead_letter_error;
use crate::state_machine::RequestStatus;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DlqReport {
    pub updated: usize,
    /// Events for requests that already left the worker
    pub stale: usize,
    pub unknown: usize,
}

#[derive(Debug, Clone)]
pub struct DlqHandler {
    context: DispatchContext,
    notifier: Notifier,
}

impl DlqHandler {
    pub fn new(context: DispatchContext, notifier: Notifier) -> Self {
        Self { context, notifier }
    }

    #[instrument(skip(self, events), fields(count = events.len()))]
    pub async fn handle_dead_letters(&self, events: Vec<WorkerRequestDlqEvent>) -> Result<DlqReport> {
        let mut report = DlqReport::default();
        if events.is_empty() {
            return Ok(report);
        }

        let request_ids: Vec<String> = events.iter().map(|e| e.request_id.clone()).collect();
        let mut working: HashMap<String, Request> = self
            .context
            .repository
            .find_by_request_ids(&request_ids)
            .await?
            .into_iter()
            .map(|request| (request.request_id.clone(), request))
            .collect();

        let mut touched: Vec<String> = Vec::new();
        let mut before: Vec<RequestSnapshot> = Vec::new();

        for event in &events {
            let message = event
                .error
                .clone()
                .unwrap_or_else(|| messages::UNKNOWN_WORKER_ERROR.to_string());
            let Some(request) = working.get_mut(&event.request_id) else {
                warn!(request_id = %event.request_id, "Dead letter for an unknown request");
                report.unknown += 1;
                continue;
            };
            if !accepts_dead_letter_error(request.status) {
                error!(
                    request_id = %request.request_id,
                    status = %request.status,
                    error = %message,
                    "Dead letter detected for a request that moved on, error is skipped"
                );
                report.stale += 1;
                continue;
            }

            if !touched.contains(&request.request_id) {
                before.push(request.snapshot());
                touched.push(request.request_id.clone());
            }
            log_request_transition(
                &request.request_id,
                request.status,
                RequestStatus::Error,
                request.dispatched_worker_type.as_deref(),
                Some(message.as_str()),
            );
            request.status = RequestStatus::Error;
            request.error = Some(message);
        }

        if touched.is_empty() {
            return Ok(report);
        }

        let updated: Vec<Request> = touched
            .iter()
            .filter_map(|request_id| working.remove(request_id))
            .collect();
        let saved = self.context.repository.save_all(updated).await?;
        report.updated = saved.len();

        self.notifier.notify_status(&saved).await;
        let before = written_before(before, &saved);
        let after = saved.iter().map(Request::snapshot).collect();
        self.context.sessions.notify_sessions(before, after).await;

        info!(
            updated = report.updated,
            stale = report.stale,
            unknown = report.unknown,
            "Dead letters handled"
        );
        Ok(report)
    }
}
