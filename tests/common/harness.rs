#![allow(dead_code)]
//! # Dispatch Test Harness
//!
//! In-memory wiring of the dispatch engine for integration tests: request
//! store, transport, worker cache, routing and session events, plus helpers
//! to play the part of originators and workers.
//!
//! ## Default routing
//!
//! - `ct1` -> worker `worker1` (keeps errors)
//! - `ct2` -> worker `worker2` (purges errors)
//! - `workflow1` -> workflow `workflow1` of `[worker1, worker2]`

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::cache::WorkerCache;
use dispatch_core::config::DispatchConfig;
use dispatch_core::messaging::{
    InMemoryMessageClient, MessageClient, RequestEvent, ResponseEvent, WorkerHeartBeatEvent,
    WorkerRequestEvent, WorkerResponseEvent,
};
use dispatch_core::models::{Request, WorkerConfig, WorkflowConfig};
use dispatch_core::orchestration::{DispatchContext, RequestService};
use dispatch_core::routing::{RoutingCache, RoutingSnapshot};
use dispatch_core::sessions::{PublishedSessionEvent, SessionEventPublisher};
use dispatch_core::store::InMemoryRequestRepository;
use dispatch_core::state_machine::WorkerResponseStatus;
use tokio::sync::broadcast;

pub const OWNER: &str = "originator";
pub const SESSION: &str = "session-1";

pub fn default_routing() -> RoutingSnapshot {
    RoutingSnapshot::new(
        vec![
            WorkerConfig::new("worker1", ["ct1"]),
            WorkerConfig::new("worker2", ["ct2"]).with_keep_errors(false),
        ],
        vec![WorkflowConfig::from_worker_types("workflow1", ["worker1", "worker2"])],
    )
}

pub struct DispatchHarness {
    pub config: Arc<DispatchConfig>,
    pub repository: Arc<InMemoryRequestRepository>,
    pub messaging: Arc<InMemoryMessageClient>,
    pub workers: Arc<WorkerCache>,
    pub routes: Arc<RoutingCache>,
    pub sessions: Arc<SessionEventPublisher>,
    pub service: RequestService,
}

impl DispatchHarness {
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default(), default_routing())
    }

    pub fn with_config(config: DispatchConfig, routing: RoutingSnapshot) -> Self {
        let config = Arc::new(config);
        let repository = Arc::new(InMemoryRequestRepository::new());
        let messaging = Arc::new(InMemoryMessageClient::new());
        let workers = Arc::new(WorkerCache::new(Duration::from_secs(60)));
        let routes = Arc::new(RoutingCache::new(routing));
        let sessions = Arc::new(SessionEventPublisher::new(64));

        let context = DispatchContext::new(
            config.clone(),
            repository.clone(),
            messaging.clone(),
            workers.clone(),
            routes.clone(),
            sessions.clone(),
        );

        Self {
            config,
            repository,
            messaging,
            workers,
            routes,
            sessions,
            service: RequestService::new(context),
        }
    }

    pub fn subscribe_sessions(&self) -> broadcast::Receiver<PublishedSessionEvent> {
        self.sessions.subscribe()
    }

    /// Mark one instance of `worker_type` as alive
    pub fn heartbeat(&self, worker_type: &str) {
        self.workers.register_heartbeat(&WorkerHeartBeatEvent::new(
            format!("{worker_type}-instance-1"),
            worker_type,
        ));
    }

    pub async fn register(&self, events: Vec<RequestEvent>) {
        self.service
            .register_requests(events)
            .await
            .expect("registration should succeed");
    }

    pub async fn respond(&self, events: Vec<WorkerResponseEvent>) {
        self.service
            .handle_worker_responses(events)
            .await
            .expect("response handling should succeed");
    }

    /// Take every request published to a worker type's inbound exchange
    pub async fn take_worker_requests(&self, worker_type: &str) -> Vec<WorkerRequestEvent> {
        self.messaging
            .drain(&self.config.queues.exchange_name(worker_type))
            .await
            .iter()
            .map(|message| WorkerRequestEvent::from_message(message).expect("worker request"))
            .collect()
    }

    /// Take every response sent back to originators
    pub async fn take_responses(&self) -> Vec<ResponseEvent> {
        self.messaging
            .drain(&self.config.queues.response_queue)
            .await
            .iter()
            .map(|message| ResponseEvent::from_message(message).expect("originator response"))
            .collect()
    }

    pub async fn stored(&self, request_id: &str) -> Option<Request> {
        self.service.get(request_id).await.expect("lookup")
    }

    pub async fn publish(&self, queue_name: &str, events: Vec<RequestEvent>) {
        self.messaging
            .send_batch(queue_name, events.iter().map(RequestEvent::to_message).collect())
            .await
            .expect("publish");
    }
}

impl Default for DispatchHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Well-formed submission from the default originator and session
pub fn submission(request_id: &str, content_type: &str, content: &[u8]) -> RequestEvent {
    RequestEvent::new(content.to_vec())
        .with_owner(OWNER)
        .with_session(SESSION)
        .with_content_type(content_type)
        .with_request_id(request_id)
}

pub fn success(request_id: &str, content: &[u8]) -> WorkerResponseEvent {
    WorkerResponseEvent::new(request_id, WorkerResponseStatus::Success).with_content(content.to_vec())
}

pub fn failure(request_id: &str, message: &str) -> WorkerResponseEvent {
    WorkerResponseEvent::new(request_id, WorkerResponseStatus::Error).with_messages([message])
}
