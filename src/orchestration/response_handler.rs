//! # Worker Response Handler
//!
//! Applies worker outcomes to their requests. Plain worker successes are
//! terminal; workflow successes move the request to its next step and feed it
//! straight back to the dispatcher, or finish the workflow after the last
//! step.
//!
//! One batch of responses becomes one store commit: advanced requests,
//! updated requests and purged requests are written together. Transport and
//! session notifications follow the commit.

use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::context::DispatchContext;
use super::deletion_policy::should_delete;
use super::dispatcher::{DispatchOrigin, Dispatcher};
use super::notifier::Notifier;
use crate::constants::{messages, EMPTY_CONTENT};
use crate::error::Result;
use crate::logging::{log_batch_operation, log_request_transition};
use crate::messaging::WorkerResponseEvent;
use crate::models::{Request, RequestSnapshot};
use crate::routing::ContentRoute;
use crate::state_machine::guards::accepts_worker_response;
use crate::state_machine::{RequestStatus, WorkerResponseStatus};
use crate::store::RequestChangeset;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseReport {
    /// Requests persisted with their new status
    pub updated: usize,
    pub deleted: usize,
    /// Workflow requests sent on to their next step
    pub redispatched: usize,
    /// Events for request ids not in the store
    pub unknown: usize,
    /// Events for requests that no longer expect a worker response
    pub ignored: usize,
}

/// Apply one worker outcome to `request`
pub fn apply_worker_response(
    request: &mut Request,
    event: &WorkerResponseEvent,
    route: Option<&ContentRoute>,
) {
    request
        .additional_headers
        .extend(event.additional_headers.clone());
    request.set_error_from_messages(&event.messages);

    match event.status {
        WorkerResponseStatus::Running => request.status = RequestStatus::Running,
        WorkerResponseStatus::InvalidContent => request.status = RequestStatus::InvalidContent,
        WorkerResponseStatus::Error => request.status = RequestStatus::Error,
        WorkerResponseStatus::Success => {
            let next_step = route
                .filter(|route| route.is_workflow())
                .and_then(|route| route.resolve_next_worker(request.step_number));
            match (next_step, &event.content) {
                (Some(next), Some(content)) => {
                    request.status = RequestStatus::ToDispatch;
                    request.dispatched_worker_type = None;
                    request.step_number = Some(next.step_number);
                    request.step_worker_type = Some(next.worker_type);
                    request.content = content.clone();
                }
                (Some(next), None) => {
                    let workflow = route.map(ContentRoute::name).unwrap_or_default();
                    let worker = request
                        .dispatched_worker_type
                        .clone()
                        .or_else(|| request.step_worker_type.clone())
                        .unwrap_or_default();
                    let step = next.step_number.to_string();
                    request.status = RequestStatus::Error;
                    request.error = Some(messages::format(
                        messages::WORKFLOW_MISSING_CONTENT,
                        &[workflow, step.as_str(), worker.as_str()],
                    ));
                }
                (None, content) => {
                    request.status = RequestStatus::Success;
                    request.content = content
                        .clone()
                        .filter(|content| !content.is_empty())
                        .unwrap_or_else(|| EMPTY_CONTENT.to_vec());
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponseHandler {
    context: DispatchContext,
    dispatcher: Dispatcher,
    notifier: Notifier,
}

impl ResponseHandler {
    pub fn new(context: DispatchContext, dispatcher: Dispatcher, notifier: Notifier) -> Self {
        Self {
            context,
            dispatcher,
            notifier,
        }
    }

    #[instrument(skip(self, events), fields(count = events.len()))]
    pub async fn handle_responses(&self, events: Vec<WorkerResponseEvent>) -> Result<ResponseReport> {
        let started = Instant::now();
        let mut report = ResponseReport::default();
        if events.is_empty() {
            return Ok(report);
        }

        let mut request_ids: Vec<String> = events.iter().map(|e| e.request_id.clone()).collect();
        request_ids.sort();
        request_ids.dedup();
        let stored = self.context.repository.find_by_request_ids(&request_ids).await?;

        let mut working: HashMap<String, Request> = stored
            .into_iter()
            .map(|request| (request.request_id.clone(), request))
            .collect();
        // First-touch order keeps the batch's arrival order.
        let mut touched: Vec<String> = Vec::new();
        let mut before: HashMap<String, RequestSnapshot> = HashMap::new();
        let mut routes: HashMap<String, Option<ContentRoute>> = HashMap::new();

        for event in &events {
            let Some(request) = working.get_mut(&event.request_id) else {
                warn!(
                    request_id = %event.request_id,
                    status = %event.status,
                    "Worker response for an unknown request"
                );
                report.unknown += 1;
                continue;
            };
            if !accepts_worker_response(request.status) {
                debug!(
                    request_id = %event.request_id,
                    current_status = %request.status,
                    response_status = %event.status,
                    "Ignoring worker response for a request that moved on"
                );
                report.ignored += 1;
                continue;
            }

            if !before.contains_key(&event.request_id) {
                before.insert(event.request_id.clone(), request.snapshot());
                touched.push(event.request_id.clone());
            }
            let route = routes
                .entry(request.content_type.clone())
                .or_insert_with(|| self.context.routes.resolve(&request.content_type));

            let previous = request.status;
            apply_worker_response(request, event, route.as_ref());
            log_request_transition(
                &request.request_id,
                previous,
                request.status,
                request.dispatched_worker_type.as_deref(),
                request.error.as_deref(),
            );
        }

        if touched.is_empty() {
            return Ok(report);
        }

        let mut advancing = Vec::new();
        let mut kept = Vec::new();
        let mut deleted = Vec::new();
        for request_id in &touched {
            let Some(request) = working.remove(request_id) else {
                continue;
            };
            if request.status == RequestStatus::ToDispatch {
                advancing.push(request);
                continue;
            }
            let route = routes.get(&request.content_type).and_then(Option::as_ref);
            if should_delete(&request, route) {
                deleted.push(request);
            } else {
                kept.push(request);
            }
        }

        let mut plan = self.dispatcher.plan(advancing);
        let advancing_ids: HashSet<String> =
            plan.requests.iter().map(|r| r.request_id.clone()).collect();
        let mut upserts = std::mem::take(&mut plan.requests);
        upserts.extend(kept);

        // Rows purged by a parallel batch come back absent and drop out here.
        let saved = self
            .context
            .repository
            .commit(RequestChangeset {
                upserts,
                deletes: deleted.iter().map(|r| r.request_id.clone()).collect(),
            })
            .await?;
        let (advanced, kept): (Vec<Request>, Vec<Request>) = saved
            .into_iter()
            .partition(|request| advancing_ids.contains(&request.request_id));
        let advanced = self
            .dispatcher
            .complete(plan, advanced, DispatchOrigin::WorkflowAdvance)
            .await;

        report.redispatched = advanced.requests.len();
        report.updated = kept.len();
        report.deleted = deleted.len();

        let mut settled = kept.clone();
        settled.extend(deleted.iter().cloned());
        self.notifier.notify_status(&settled).await;

        let mut after: HashMap<String, RequestSnapshot> = advanced
            .requests
            .iter()
            .chain(settled.iter())
            .map(|request| (request.request_id.clone(), request.snapshot()))
            .collect();
        let (before, after): (Vec<_>, Vec<_>) = touched
            .iter()
            .filter_map(|id| Some((before.remove(id)?, after.remove(id)?)))
            .unzip();
        self.context.sessions.notify_sessions(before, after).await;
        self.context
            .sessions
            .notify_delete(deleted.iter().map(Request::snapshot).collect())
            .await;

        info!(
            updated = report.updated,
            deleted = report.deleted,
            redispatched = report.redispatched,
            unknown = report.unknown,
            ignored = report.ignored,
            "Worker responses handled"
        );
        log_batch_operation(
            "worker_responses",
            &self.context.config.queues.worker_response_queue,
            events.len(),
            "ok",
            Some(started.elapsed().as_millis() as u64),
        );
        Ok(report)
    }
}
