//! # Queue Listeners
//!
//! One polling loop per inbound queue. Each poll reads a batch, hands it to
//! the queue's [`BatchHandler`] and polls again straight away; an empty read
//! or a failed batch waits for the polling interval first.
//!
//! Messages that cannot be decoded are logged and dropped so one malformed
//! message never blocks its queue.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::request_service::RequestService;
use crate::cache::WorkerCache;
use crate::error::Result;
use crate::logging::log_batch_operation;
use crate::messaging::{
    MessageClient, RawMessage, RequestEvent, WorkerHeartBeatEvent, WorkerRequestDlqEvent,
    WorkerResponseEvent,
};

/// Handles one batch read from a queue. Returns the number of messages
/// handled.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle_batch(&self, messages: Vec<RawMessage>) -> Result<usize>;
}

pub struct QueueListener {
    queue_name: String,
    messaging: Arc<dyn MessageClient>,
    handler: Arc<dyn BatchHandler>,
    batch_size: usize,
    polling_interval: Duration,
}

impl QueueListener {
    pub fn new(
        queue_name: impl Into<String>,
        messaging: Arc<dyn MessageClient>,
        handler: Arc<dyn BatchHandler>,
        batch_size: usize,
        polling_interval: Duration,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            messaging,
            handler,
            batch_size,
            polling_interval,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Read and handle one batch. Returns the number of messages read.
    pub async fn poll_once(&self) -> Result<usize> {
        let messages = self
            .messaging
            .receive_batch(&self.queue_name, self.batch_size)
            .await?;
        if messages.is_empty() {
            return Ok(0);
        }

        let count = messages.len();
        let started = Instant::now();
        let handled = self.handler.handle_batch(messages).await?;
        log_batch_operation(
            self.handler.name(),
            &self.queue_name,
            handled,
            if handled == count { "ok" } else { "partial" },
            Some(started.elapsed().as_millis() as u64),
        );
        Ok(count)
    }

    /// Poll until `shutdown` turns true
    #[instrument(skip(self, shutdown), fields(queue = %self.queue_name, handler = self.handler.name()))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            queue = %self.queue_name,
            batch_size = self.batch_size,
            "Starting queue listener"
        );

        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }
            let wait = match self.poll_once().await {
                // Keep draining while there is work.
                Ok(count) if count > 0 => false,
                Ok(_) => true,
                Err(e) => {
                    error!(queue = %self.queue_name, error = %e, "Error in queue listener batch");
                    true
                }
            };

            if wait {
                tokio::select! {
                    _ = tokio::time::sleep(self.polling_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!(queue = %self.queue_name, "Queue listener stopped");
    }
}

/// Originator submissions
pub struct RequestBatchHandler {
    service: Arc<RequestService>,
}

impl RequestBatchHandler {
    pub fn new(service: Arc<RequestService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl BatchHandler for RequestBatchHandler {
    fn name(&self) -> &'static str {
        "register_requests"
    }

    async fn handle_batch(&self, messages: Vec<RawMessage>) -> Result<usize> {
        let events: Vec<RequestEvent> = messages.iter().map(RequestEvent::from_message).collect();
        let count = events.len();
        self.service.register_requests(events).await?;
        Ok(count)
    }
}

/// Worker outcomes
pub struct WorkerResponseBatchHandler {
    service: Arc<RequestService>,
}

impl WorkerResponseBatchHandler {
    pub fn new(service: Arc<RequestService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl BatchHandler for WorkerResponseBatchHandler {
    fn name(&self) -> &'static str {
        "worker_responses"
    }

    async fn handle_batch(&self, messages: Vec<RawMessage>) -> Result<usize> {
        let events = decode_all(&messages, "worker response", WorkerResponseEvent::from_message);
        let count = events.len();
        self.service.handle_worker_responses(events).await?;
        Ok(count)
    }
}

/// Worker requests the transport failed to deliver
pub struct DlqBatchHandler {
    service: Arc<RequestService>,
}

impl DlqBatchHandler {
    pub fn new(service: Arc<RequestService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl BatchHandler for DlqBatchHandler {
    fn name(&self) -> &'static str {
        "worker_request_errors"
    }

    async fn handle_batch(&self, messages: Vec<RawMessage>) -> Result<usize> {
        let events = decode_all(&messages, "dead letter", WorkerRequestDlqEvent::from_message);
        let count = events.len();
        self.service.handle_request_errors(events).await?;
        Ok(count)
    }
}

/// Worker heartbeats. A worker type coming back to life triggers a dispatch
/// pass over the requests waiting for it.
pub struct HeartbeatBatchHandler {
    cache: Arc<WorkerCache>,
    service: Arc<RequestService>,
}

impl HeartbeatBatchHandler {
    pub fn new(cache: Arc<WorkerCache>, service: Arc<RequestService>) -> Self {
        Self { cache, service }
    }
}

#[async_trait]
impl BatchHandler for HeartbeatBatchHandler {
    fn name(&self) -> &'static str {
        "heartbeats"
    }

    async fn handle_batch(&self, messages: Vec<RawMessage>) -> Result<usize> {
        let events = decode_all(&messages, "heartbeat", WorkerHeartBeatEvent::from_message);
        let revived = self.cache.register_heartbeats(&events);
        if !revived.is_empty() {
            debug!(worker_types = ?revived, "Worker types became available");
            self.service.dispatch_waiting_for(&revived).await?;
        }
        Ok(events.len())
    }
}

fn decode_all<T, E, F>(messages: &[RawMessage], kind: &str, decode: F) -> Vec<T>
where
    E: std::fmt::Display,
    F: Fn(&RawMessage) -> std::result::Result<T, E>,
{
    messages
        .iter()
        .filter_map(|message| match decode(message) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(kind = kind, error = %e, "Dropping undecodable message");
                None
            }
        })
        .collect()
}
