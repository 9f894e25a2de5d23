//! # Request Service
//!
//! Entry point of the dispatch engine. Consumers hand it decoded batches:
//! originator submissions, worker responses and dead letters. Operators and
//! read-side callers use its search and bulk actions.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::context::DispatchContext;
use super::dispatcher::{DispatchOrigin, Dispatcher};
use super::dlq_handler::{DlqHandler, DlqReport};
use super::notifier::Notifier;
use super::request_scanner::RequestScanner;
use super::request_validator::RequestValidator;
use super::response_handler::{ResponseHandler, ResponseReport};
use crate::constants::messages;
use crate::error::{DispatchError, Result};
use crate::messaging::{RequestEvent, WorkerRequestDlqEvent, WorkerResponseEvent};
use crate::models::{Page, PageRequest, Request, RequestSearchParameters, RequestSnapshot};
use crate::sessions::{SessionsRequestsInfo, SkippedRequest};
use crate::state_machine::RequestStatus;

#[derive(Debug, Clone)]
pub struct RequestService {
    context: DispatchContext,
    validator: RequestValidator,
    notifier: Notifier,
    dispatcher: Dispatcher,
    responses: ResponseHandler,
    dead_letters: DlqHandler,
    scanner: RequestScanner,
}

impl RequestService {
    pub fn new(context: DispatchContext) -> Self {
        let notifier = Notifier::new(
            Arc::clone(&context.messaging),
            context.config.queues.response_queue.clone(),
        );
        let dispatcher = Dispatcher::new(context.clone(), notifier.clone());
        Self {
            validator: RequestValidator::from_config(&context.config),
            responses: ResponseHandler::new(context.clone(), dispatcher.clone(), notifier.clone()),
            dead_letters: DlqHandler::new(context.clone(), notifier.clone()),
            scanner: RequestScanner::new(context.clone(), dispatcher.clone()),
            notifier,
            dispatcher,
            context,
        }
    }

    pub fn context(&self) -> &DispatchContext {
        &self.context
    }

    pub fn scanner(&self) -> &RequestScanner {
        &self.scanner
    }

    /// Validate, store and dispatch a batch of submissions. Skipped
    /// submissions are reported to their originator and never stored.
    #[instrument(skip(self, events), fields(count = events.len()))]
    pub async fn register_requests(&self, events: Vec<RequestEvent>) -> Result<SessionsRequestsInfo> {
        if events.is_empty() {
            return Ok(SessionsRequestsInfo::default());
        }

        let candidate_ids = RequestValidator::candidate_ids(&events);
        let existing = self
            .context
            .repository
            .existing_request_ids(&candidate_ids)
            .await?;
        let mut outcome = self.validator.validate(&events, &existing);
        self.notifier.notify_skipped(&outcome.skipped).await;

        let accepted: Vec<RequestSnapshot> = outcome.accepted.iter().map(Request::snapshot).collect();
        let registered = if accepted.is_empty() {
            Vec::new()
        } else {
            self.dispatcher
                .dispatch(outcome.accepted, DispatchOrigin::Registration)
                .await?
                .requests
        };

        // A parallel batch may store the same request id after the check above.
        let stored: HashSet<&str> = registered.iter().map(|r| r.request_id.as_str()).collect();
        let late_duplicates: Vec<SkippedRequest> = accepted
            .iter()
            .filter(|request| !stored.contains(request.request_id.as_str()))
            .map(already_exists)
            .collect();
        if !late_duplicates.is_empty() {
            warn!(
                count = late_duplicates.len(),
                "Request ids stored by another batch during registration"
            );
            self.notifier.notify_skipped(&late_duplicates).await;
            outcome.skipped.extend(late_duplicates);
        }

        info!(
            registered = registered.len(),
            skipped = outcome.skipped.len(),
            "Requests registered"
        );
        let info = SessionsRequestsInfo::new(
            registered.iter().map(Request::snapshot).collect(),
            outcome.skipped,
        );
        self.context.sessions.notify_new_requests(info.clone()).await;
        Ok(info)
    }

    pub async fn handle_worker_responses(
        &self,
        events: Vec<WorkerResponseEvent>,
    ) -> Result<ResponseReport> {
        self.responses.handle_responses(events).await
    }

    pub async fn handle_request_errors(&self, events: Vec<WorkerRequestDlqEvent>) -> Result<DlqReport> {
        self.dead_letters.handle_dead_letters(events).await
    }

    pub async fn get(&self, request_id: &str) -> Result<Option<Request>> {
        self.context.repository.find_one_by_request_id(request_id).await
    }

    /// Like [`RequestService::get`], failing with `NotFound` when absent
    pub async fn retrieve(&self, request_id: &str) -> Result<Request> {
        self.get(request_id)
            .await?
            .ok_or_else(|| DispatchError::not_found(request_id))
    }

    pub async fn search(
        &self,
        params: &RequestSearchParameters,
        page: PageRequest,
    ) -> Result<Page<Request>> {
        self.context.repository.search(params, page).await
    }

    /// Search without payloads
    pub async fn search_light(
        &self,
        params: &RequestSearchParameters,
        page: PageRequest,
    ) -> Result<Page<RequestSnapshot>> {
        let found = self.search(params, page).await?;
        Ok(Page {
            content: found.content.iter().map(Request::snapshot).collect(),
            page: found.page,
            total_elements: found.total_elements,
        })
    }

    pub async fn search_by_ids(&self, ids: &[i64]) -> Result<Vec<Request>> {
        self.context.repository.find_by_ids(ids).await
    }

    /// Requests parked for lack of a worker that `worker_type` could take
    pub async fn count_waiting_for_worker(&self, worker_type: &str) -> Result<u64> {
        let content_types = self.context.routes.content_types_for_worker(worker_type);
        if content_types.is_empty() {
            return Ok(0);
        }
        self.context
            .repository
            .count(
                &RequestSearchParameters::default()
                    .with_statuses([RequestStatus::NoWorkerAvailable])
                    .with_content_types(content_types),
            )
            .await
    }

    /// Whether any request of these content types waits for a worker
    pub async fn has_requests_waiting_for(&self, content_types: &[String]) -> Result<bool> {
        if content_types.is_empty() {
            return Ok(false);
        }
        let params = RequestSearchParameters::default()
            .with_statuses([RequestStatus::NoWorkerAvailable])
            .with_content_types(content_types.iter().cloned());
        Ok(self.context.repository.count(&params).await? > 0)
    }

    pub async fn retry_requests(&self, filters: RequestSearchParameters) -> Result<usize> {
        self.scanner.retry(filters).await
    }

    pub async fn delete_requests(&self, filters: RequestSearchParameters) -> Result<usize> {
        self.scanner.delete(filters).await
    }

    pub async fn scan_no_worker_available(&self) -> Result<usize> {
        self.scanner.scan_no_worker_available().await
    }

    pub async fn dispatch_waiting_for(&self, worker_types: &[String]) -> Result<usize> {
        self.scanner.dispatch_waiting_for(worker_types).await
    }

    /// Inbound exchange of a worker type
    pub fn exchange_name(&self, worker_type: &str) -> String {
        self.context.config.queues.exchange_name(worker_type)
    }

    pub fn response_queue_name(&self) -> &str {
        &self.context.config.queues.response_queue
    }

    pub fn worker_response_queue_name(&self) -> &str {
        &self.context.config.queues.worker_response_queue
    }

    pub fn worker_request_dlq_name(&self) -> &str {
        &self.context.config.queues.worker_request_dlq
    }
}

fn already_exists(request: &RequestSnapshot) -> SkippedRequest {
    SkippedRequest {
        request_id: Some(request.request_id.clone()),
        source: Some(request.source.clone()),
        session: Some(request.session.clone()),
        content_type: Some(request.content_type.clone()),
        messages: vec![messages::format(
            messages::REQUEST_ID_ALREADY_EXISTS,
            &[request.request_id.as_str()],
        )],
    }
}
