//! # Dispatcher
//!
//! Sends requests waiting for a worker to the worker owning their current
//! step, or parks them in `NO_WORKER_AVAILABLE` until a later pass.
//!
//! A pass persists every status change in one batch write before publishing
//! anything, then publishes one bulk message per worker type in parallel.
//! A publish failure is logged and counted; it never unwinds the pass.

use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::context::DispatchContext;
use super::notifier::Notifier;
use super::step_initializer::{initialize_step, StepInitialization};
use crate::constants::messages;
use crate::error::Result;
use crate::logging::{log_batch_operation, log_request_transition};
use crate::messaging::{RawMessage, WorkerRequestEvent};
use crate::models::{Request, RequestSnapshot};
use crate::sessions::written_before;
use crate::state_machine::guards::can_dispatch;
use crate::state_machine::RequestStatus;

/// Who asked for a dispatch pass. Only rescans report their own session
/// transitions; the other callers report them as part of a wider batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOrigin {
    /// Freshly validated submissions
    Registration,
    /// Periodic, heartbeat-triggered or operator-triggered pass over stored requests
    Rescan,
    /// Requests a worker response moved to their next workflow step
    WorkflowAdvance,
    /// Requests an operator reset for another attempt
    Retry,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub dispatched: usize,
    pub delayed: usize,
    /// Requests not in a dispatchable status, left untouched
    pub skipped: usize,
    /// Workflow requests whose step no longer exists
    pub stalled: usize,
    /// Worker types whose bulk publish failed
    pub publish_failures: usize,
    /// Planned requests another batch stored or purged first, never written
    pub superseded: usize,
    /// Persisted requests of this pass
    pub requests: Vec<Request>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Routed {
    Dispatched,
    Delayed,
    Stalled,
}

/// Routing decisions of one pass, not yet persisted
#[derive(Debug, Clone, Default)]
pub struct DispatchPlan {
    before: Vec<RequestSnapshot>,
    stalled: HashSet<String>,
    /// Requests to persist, in input order
    pub requests: Vec<Request>,
    report: DispatchReport,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    context: DispatchContext,
    notifier: Notifier,
}

impl Dispatcher {
    pub fn new(context: DispatchContext, notifier: Notifier) -> Self {
        Self { context, notifier }
    }

    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn dispatch(
        &self,
        requests: Vec<Request>,
        origin: DispatchOrigin,
    ) -> Result<DispatchReport> {
        let started = Instant::now();
        let mut plan = self.plan(requests);
        if plan.requests.is_empty() {
            return Ok(plan.report);
        }

        let pending = std::mem::take(&mut plan.requests);
        let saved = self.context.repository.save_all(pending).await?;
        let report = self.complete(plan, saved, origin).await;

        log_batch_operation(
            "dispatch",
            &self.context.config.queues.worker_request_template,
            report.requests.len(),
            if report.publish_failures == 0 { "ok" } else { "partial" },
            Some(started.elapsed().as_millis() as u64),
        );
        Ok(report)
    }

    /// Decide the outcome of every dispatchable request without touching the
    /// store or the transport. Callers persist `plan.requests` and then hand
    /// the stored rows to [`Dispatcher::complete`].
    pub fn plan(&self, requests: Vec<Request>) -> DispatchPlan {
        let mut plan = DispatchPlan {
            before: Vec::new(),
            stalled: HashSet::new(),
            requests: Vec::with_capacity(requests.len()),
            report: DispatchReport::default(),
        };

        for mut request in requests {
            if !can_dispatch(request.status) {
                debug!(
                    request_id = %request.request_id,
                    status = %request.status,
                    "Request is not waiting for dispatch"
                );
                plan.report.skipped += 1;
                continue;
            }
            plan.before.push(request.snapshot());
            let previous = request.status;
            if self.route(&mut request) == Routed::Stalled {
                plan.stalled.insert(request.request_id.clone());
            }
            log_request_transition(
                &request.request_id,
                previous,
                request.status,
                request.dispatched_worker_type.as_deref(),
                request.error.as_deref(),
            );
            plan.requests.push(request);
        }
        plan
    }

    /// Publish and notify the persisted rows of a plan. Only `saved` rows
    /// count: planned requests the store did not write are reported as
    /// superseded and nothing is sent for them.
    pub async fn complete(
        &self,
        plan: DispatchPlan,
        saved: Vec<Request>,
        origin: DispatchOrigin,
    ) -> DispatchReport {
        let mut report = plan.report;
        report.superseded = plan.before.len().saturating_sub(saved.len());
        for request in &saved {
            if plan.stalled.contains(&request.request_id) {
                report.stalled += 1;
            } else if request.status == RequestStatus::Dispatched {
                report.dispatched += 1;
            } else {
                report.delayed += 1;
            }
        }
        report.publish_failures = self.publish(&saved).await;

        self.notifier.notify_status(&saved).await;
        if origin == DispatchOrigin::Rescan {
            let before = written_before(plan.before, &saved);
            let after = saved.iter().map(Request::snapshot).collect();
            self.context.sessions.notify_sessions(before, after).await;
        }

        info!(
            origin = ?origin,
            dispatched = report.dispatched,
            delayed = report.delayed,
            stalled = report.stalled,
            skipped = report.skipped,
            superseded = report.superseded,
            publish_failures = report.publish_failures,
            "Dispatch pass completed"
        );
        report.requests = saved;
        report
    }

    /// Resolve the worker of the request's current step and check it is alive
    fn route(&self, request: &mut Request) -> Routed {
        let route = self.context.routes.resolve(&request.content_type);
        let worker_type = match initialize_step(request, route.as_ref()) {
            StepInitialization::StepNotFound { step_number } => {
                self.stall(request, step_number, route.as_ref().map(|r| r.name()));
                return Routed::Stalled;
            }
            StepInitialization::NoRoute => None,
            StepInitialization::Initialized | StepInitialization::AlreadyInitialized => {
                match (&route, request.step_number) {
                    // The step must still exist and the worker to use is the
                    // one currently configured for it.
                    (Some(route), step_number) if route.is_workflow() => {
                        match route.worker_type_at(step_number) {
                            Some(worker_type) => Some(worker_type),
                            None => {
                                let step_number = step_number.unwrap_or_default();
                                self.stall(request, step_number, Some(route.name()));
                                return Routed::Stalled;
                            }
                        }
                    }
                    _ => request.step_worker_type.clone(),
                }
            }
        };

        match worker_type {
            Some(worker_type) if self.context.workers.is_alive(&worker_type) => {
                request.status = RequestStatus::Dispatched;
                request.step_worker_type = Some(worker_type.clone());
                request.dispatched_worker_type = Some(worker_type);
                Routed::Dispatched
            }
            _ => {
                request.status = RequestStatus::NoWorkerAvailable;
                request.dispatched_worker_type = None;
                Routed::Delayed
            }
        }
    }

    fn stall(&self, request: &mut Request, step_number: i32, workflow: Option<&str>) {
        let step = step_number.to_string();
        request.status = RequestStatus::NoWorkerAvailable;
        request.dispatched_worker_type = None;
        request.error = Some(messages::format(
            messages::WORKFLOW_STEP_NOT_FOUND,
            &[workflow.unwrap_or(request.content_type.as_str()), step.as_str()],
        ));
        warn!(
            request_id = %request.request_id,
            step_number = step_number,
            "Workflow request stalled on a step that no longer exists"
        );
    }

    /// Publish dispatched requests grouped by worker type. Returns the number
    /// of worker types whose publish failed.
    async fn publish(&self, requests: &[Request]) -> usize {
        let mut by_worker: BTreeMap<&str, Vec<RawMessage>> = BTreeMap::new();
        for request in requests {
            if request.status != RequestStatus::Dispatched {
                continue;
            }
            if let Some(worker_type) = request.dispatched_worker_type.as_deref() {
                by_worker
                    .entry(worker_type)
                    .or_default()
                    .push(worker_request(request).to_message());
            }
        }

        let sends = by_worker.into_iter().map(|(worker_type, messages)| {
            let exchange = self.context.config.queues.exchange_name(worker_type);
            let count = messages.len();
            async move {
                let result = self.context.messaging.send_batch(&exchange, messages).await;
                (worker_type, exchange, count, result)
            }
        });

        let mut failures = 0;
        for (worker_type, exchange, count, result) in join_all(sends).await {
            match result {
                Ok(()) => debug!(
                    worker_type = %worker_type,
                    exchange = %exchange,
                    count = count,
                    "Published worker requests"
                ),
                Err(e) => {
                    failures += 1;
                    warn!(
                        worker_type = %worker_type,
                        exchange = %exchange,
                        count = count,
                        error = %e,
                        "Failed to publish worker requests"
                    );
                }
            }
        }
        failures
    }
}

fn worker_request(request: &Request) -> WorkerRequestEvent {
    WorkerRequestEvent {
        request_id: request.request_id.clone(),
        content_type: request.content_type.clone(),
        source: request.source.clone(),
        session: request.session.clone(),
        additional_headers: request.additional_headers.clone(),
        content: request.content.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::WorkerCache;
    use crate::config::DispatchConfig;
    use crate::messaging::{InMemoryMessageClient, WorkerHeartBeatEvent};
    use crate::models::{WorkerConfig, WorkflowConfig};
    use crate::routing::{RoutingCache, RoutingSnapshot};
    use crate::sessions::{SessionEvent, SessionEventPublisher};
    use crate::store::{InMemoryRequestRepository, RequestRepository};
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        dispatcher: Dispatcher,
        repository: Arc<InMemoryRequestRepository>,
        messaging: Arc<InMemoryMessageClient>,
        workers: Arc<WorkerCache>,
        sessions: Arc<SessionEventPublisher>,
        config: Arc<DispatchConfig>,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(DispatchConfig::default());
        let repository = Arc::new(InMemoryRequestRepository::new());
        let messaging = Arc::new(InMemoryMessageClient::new());
        let workers = Arc::new(WorkerCache::new(Duration::from_secs(60)));
        let sessions = Arc::new(SessionEventPublisher::new(16));
        let routes = Arc::new(RoutingCache::new(RoutingSnapshot::new(
            vec![WorkerConfig::new("Worker1", ["ct1"])],
            vec![WorkflowConfig::from_worker_types("wf", ["Worker1", "worker2"])],
        )));
        let context = DispatchContext::new(
            config.clone(),
            repository.clone(),
            messaging.clone(),
            workers.clone(),
            routes,
            sessions.clone(),
        );
        let notifier = Notifier::new(messaging.clone(), config.queues.response_queue.clone());
        Fixture {
            dispatcher: Dispatcher::new(context, notifier),
            repository,
            messaging,
            workers,
            sessions,
            config,
        }
    }

    #[tokio::test]
    async fn test_dispatch_to_alive_worker() {
        let f = fixture();
        f.workers.register_heartbeat(&WorkerHeartBeatEvent::new("i1", "Worker1"));

        let request = Request::new("r1", "ct1", "src", "sess", b"body".to_vec())
            .with_additional_headers([("k".to_string(), "v".to_string())].into_iter().collect());
        let report = f
            .dispatcher
            .dispatch(vec![request], DispatchOrigin::Registration)
            .await
            .unwrap();

        assert_eq!(report.dispatched, 1);
        let stored = f.repository.find_one_by_request_id("r1").await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Dispatched);
        assert_eq!(stored.dispatched_worker_type.as_deref(), Some("Worker1"));

        let exchange = f.config.queues.exchange_name("Worker1");
        let sent = f.messaging.drain(&exchange).await;
        assert_eq!(sent.len(), 1);
        let event = WorkerRequestEvent::from_message(&sent[0]).unwrap();
        assert_eq!(event.request_id, "r1");
        assert_eq!(event.content, b"body".to_vec());
        assert_eq!(event.additional_headers.get("k").map(String::as_str), Some("v"));
        assert_eq!(f.messaging.queue_depth(&f.config.queues.response_queue).await, 1);
    }

    #[tokio::test]
    async fn test_no_worker_available() {
        let f = fixture();
        let report = f
            .dispatcher
            .dispatch(
                vec![
                    Request::new("r1", "ct1", "src", "sess", vec![]),
                    Request::new("r2", "unknown", "src", "sess", vec![]),
                ],
                DispatchOrigin::Registration,
            )
            .await
            .unwrap();

        assert_eq!(report.delayed, 2);
        for stored in f.repository.all().await {
            assert_eq!(stored.status, RequestStatus::NoWorkerAvailable);
            assert!(stored.dispatched_worker_type.is_none());
        }
        assert!(f.messaging.queue_names().await.iter().all(|q| !q.contains("worker1")));
    }

    #[tokio::test]
    async fn test_in_flight_requests_are_not_resent() {
        let f = fixture();
        f.workers.register_heartbeat(&WorkerHeartBeatEvent::new("i1", "Worker1"));
        let request = Request::new("r1", "ct1", "src", "sess", vec![])
            .with_status(RequestStatus::Dispatched)
            .with_dispatched_worker_type("Worker1");

        let report = f
            .dispatcher
            .dispatch(vec![request], DispatchOrigin::Rescan)
            .await
            .unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(f.messaging.queue_depth(&f.config.queues.exchange_name("Worker1")).await, 0);
    }

    #[tokio::test]
    async fn test_stalled_workflow_step() {
        let f = fixture();
        f.workers.register_heartbeat(&WorkerHeartBeatEvent::new("i1", "Worker1"));
        let request = Request::new("r1", "wf", "src", "sess", vec![]).with_step(Some(7), None);

        let report = f
            .dispatcher
            .dispatch(vec![request], DispatchOrigin::Registration)
            .await
            .unwrap();
        assert_eq!(report.stalled, 1);
        let stored = f.repository.find_one_by_request_id("r1").await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::NoWorkerAvailable);
        assert!(stored.error.unwrap().contains("<7>"));
    }

    #[tokio::test]
    async fn test_rescan_reports_sessions() {
        let f = fixture();
        let mut events = f.sessions.subscribe();
        let saved = f
            .repository
            .save_all(vec![Request::new("r1", "ct1", "src", "sess", vec![])
                .with_status(RequestStatus::NoWorkerAvailable)])
            .await
            .unwrap();
        f.workers.register_heartbeat(&WorkerHeartBeatEvent::new("i1", "Worker1"));

        f.dispatcher
            .dispatch(saved, DispatchOrigin::Rescan)
            .await
            .unwrap();

        let published = events.recv().await.unwrap();
        match published.event {
            SessionEvent::StatusChanged { before, after } => {
                assert_eq!(before[0].status, RequestStatus::NoWorkerAvailable);
                assert_eq!(after[0].status, RequestStatus::Dispatched);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_pass_going() {
        let f = fixture();
        f.workers.register_heartbeat(&WorkerHeartBeatEvent::new("i1", "Worker1"));
        f.messaging
            .fail_queue(&f.config.queues.exchange_name("Worker1"))
            .await;

        let report = f
            .dispatcher
            .dispatch(
                vec![Request::new("r1", "ct1", "src", "sess", vec![])],
                DispatchOrigin::Registration,
            )
            .await
            .unwrap();
        assert_eq!(report.publish_failures, 1);
        assert_eq!(report.requests.len(), 1);
    }
}
