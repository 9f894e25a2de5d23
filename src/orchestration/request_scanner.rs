//! # Request Scanner
//!
//! Passes over stored requests, page by page:
//!
//! - the periodic and heartbeat-triggered rescans of `NO_WORKER_AVAILABLE`
//!   requests,
//! - operator retry, which resets failed or parked requests for another
//!   dispatch,
//! - operator delete, which marks requests `TO_DELETE` and purges them.
//!
//! Operator actions only touch requests in `ERROR`, `INVALID_CONTENT` or
//! `NO_WORKER_AVAILABLE`; requests a worker owns are never rewritten.

use tracing::{debug, info, instrument};

use super::context::DispatchContext;
use super::dispatcher::{DispatchOrigin, Dispatcher};
use crate::error::Result;
use crate::models::{PageRequest, Request, RequestSearchParameters};
use crate::sessions::written_before;
use crate::state_machine::RequestStatus;

#[derive(Debug, Clone)]
pub struct RequestScanner {
    context: DispatchContext,
    dispatcher: Dispatcher,
}

impl RequestScanner {
    pub fn new(context: DispatchContext, dispatcher: Dispatcher) -> Self {
        Self {
            context,
            dispatcher,
        }
    }

    fn page_size(&self) -> usize {
        self.context.config.processing.page_size
    }

    /// Dispatch every request parked for lack of a worker. Returns the number
    /// of requests dispatched.
    #[instrument(skip(self))]
    pub async fn scan_no_worker_available(&self) -> Result<usize> {
        let params =
            RequestSearchParameters::default().with_statuses([RequestStatus::NoWorkerAvailable]);
        self.rescan(&params).await
    }

    /// Dispatch the parked requests a newly available worker type can take.
    /// Does nothing when none are waiting.
    #[instrument(skip(self))]
    pub async fn dispatch_waiting_for(&self, worker_types: &[String]) -> Result<usize> {
        let mut content_types: Vec<String> = worker_types
            .iter()
            .flat_map(|worker_type| self.context.routes.content_types_for_worker(worker_type))
            .collect();
        content_types.sort();
        content_types.dedup();
        if content_types.is_empty() {
            return Ok(0);
        }

        let params = RequestSearchParameters::default()
            .with_statuses([RequestStatus::NoWorkerAvailable])
            .with_content_types(content_types);
        if self.context.repository.count(&params).await? == 0 {
            debug!(worker_types = ?worker_types, "No request waiting for the revived workers");
            return Ok(0);
        }
        self.rescan(&params).await
    }

    async fn rescan(&self, params: &RequestSearchParameters) -> Result<usize> {
        let mut dispatched = 0;
        for chunk in self.matching_ids(params).await?.chunks(self.page_size()) {
            let requests = self.context.repository.find_by_ids(chunk).await?;
            let report = self
                .dispatcher
                .dispatch(requests, DispatchOrigin::Rescan)
                .await?;
            dispatched += report.dispatched;
        }
        if dispatched > 0 {
            info!(dispatched = dispatched, "Parked requests dispatched");
        }
        Ok(dispatched)
    }

    /// Reset matching failed or parked requests and dispatch them again.
    /// Returns the number of requests retried.
    #[instrument(skip(self))]
    pub async fn retry(&self, filters: RequestSearchParameters) -> Result<usize> {
        let Some(params) = actionable(filters) else {
            return Ok(0);
        };

        let mut retried = 0;
        for chunk in self.matching_ids(&params).await?.chunks(self.page_size()) {
            let requests = self.still_actionable(chunk).await?;
            if requests.is_empty() {
                continue;
            }
            let before: Vec<_> = requests.iter().map(Request::snapshot).collect();
            let reset: Vec<Request> = requests
                .into_iter()
                .map(|mut request| {
                    request.status = RequestStatus::ToDispatch;
                    request.step_worker_type = None;
                    request.dispatched_worker_type = None;
                    request
                })
                .collect();

            let report = self.dispatcher.dispatch(reset, DispatchOrigin::Retry).await?;
            retried += report.requests.len();
            let before = written_before(before, &report.requests);
            let after = report.requests.iter().map(Request::snapshot).collect();
            self.context.sessions.notify_sessions(before, after).await;
        }

        info!(retried = retried, "Operator retry completed");
        Ok(retried)
    }

    /// Mark matching failed or parked requests for deletion and purge them.
    /// Returns the number of requests deleted.
    #[instrument(skip(self))]
    pub async fn delete(&self, filters: RequestSearchParameters) -> Result<usize> {
        let Some(params) = actionable(filters) else {
            return Ok(0);
        };

        let mut deleted = 0;
        for chunk in self.matching_ids(&params).await?.chunks(self.page_size()) {
            let requests = self.still_actionable(chunk).await?;
            if requests.is_empty() {
                continue;
            }
            let before: Vec<_> = requests.iter().map(Request::snapshot).collect();
            let marked: Vec<Request> = requests
                .into_iter()
                .map(|request| request.with_status(RequestStatus::ToDelete))
                .collect();
            let marked = self.context.repository.save_all(marked).await?;
            let before = written_before(before, &marked);
            let after: Vec<_> = marked.iter().map(Request::snapshot).collect();
            self.context
                .sessions
                .notify_sessions(before, after.clone())
                .await;

            let request_ids: Vec<String> = marked.iter().map(|r| r.request_id.clone()).collect();
            deleted += self
                .context
                .repository
                .delete_by_request_ids(&request_ids)
                .await? as usize;
            self.context.sessions.notify_delete(after).await;
        }

        info!(deleted = deleted, "Operator delete completed");
        Ok(deleted)
    }

    /// Ids of every match, read up front so rewriting statuses cannot shift
    /// the pages still to read
    async fn matching_ids(&self, params: &RequestSearchParameters) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        let mut page = PageRequest::first(self.page_size());
        loop {
            let found = self.context.repository.search(params, page).await?;
            ids.extend(found.content.iter().filter_map(|request| request.id));
            if !found.has_next() || found.is_empty() {
                break;
            }
            page = PageRequest::new(page.page + 1, page.size);
        }
        Ok(ids)
    }

    /// Reload a chunk, dropping requests another consumer moved meanwhile
    async fn still_actionable(&self, ids: &[i64]) -> Result<Vec<Request>> {
        Ok(self
            .context
            .repository
            .find_by_ids(ids)
            .await?
            .into_iter()
            .filter(|request| RequestStatus::OPERATOR_ACTIONABLE.contains(&request.status))
            .collect())
    }
}

/// Narrow operator filters to the statuses operators may rewrite. `None`
/// when the filters only name other statuses.
fn actionable(filters: RequestSearchParameters) -> Option<RequestSearchParameters> {
    let params = filters.restricted_to(&RequestStatus::OPERATOR_ACTIONABLE);
    (!params.statuses.is_empty()).then_some(params)
}
