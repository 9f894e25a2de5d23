//! # Dispatch Engine Bootstrap
//!
//! Builds the engine from configuration and runs its consumers:
//!
//! - request, worker response, dead-letter and heartbeat listeners,
//! - the periodic rescan of requests parked for lack of a worker.
//!
//! The transport is injected; the request store is Postgres when
//! `database.url` is configured and in-memory otherwise.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::context::DispatchContext;
use super::listeners::{
    DlqBatchHandler, HeartbeatBatchHandler, QueueListener, RequestBatchHandler,
    WorkerResponseBatchHandler,
};
use super::request_service::RequestService;
use crate::cache::{WorkerAvailability, WorkerCache};
use crate::config::{ConfigManager, DispatchConfig};
use crate::error::{DispatchError, Result};
use crate::messaging::MessageClient;
use crate::routing::RoutingCache;
use crate::sessions::SessionEventPublisher;
use crate::store::{InMemoryRequestRepository, RequestRepository};

/// Bootstrap options
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Whether to start consumers immediately
    pub auto_start: bool,
    /// Custom configuration directory (None = `config/`)
    pub config_directory: Option<PathBuf>,
    /// Environment override (None = auto-detect)
    pub environment_override: Option<String>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            auto_start: true,
            config_directory: None,
            environment_override: None,
        }
    }
}

impl BootstrapConfig {
    /// Manual control and the `test` environment
    pub fn for_testing() -> Self {
        Self {
            auto_start: false,
            config_directory: None,
            environment_override: Some("test".to_string()),
        }
    }
}

/// Engine status information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub running: bool,
    pub environment: String,
    pub tenant: String,
    pub listeners: usize,
    pub alive_worker_types: Vec<String>,
}

pub struct DispatchBootstrap;

impl DispatchBootstrap {
    /// Load configuration, build the engine and start it unless told not to
    pub async fn bootstrap(
        options: BootstrapConfig,
        messaging: Arc<dyn MessageClient>,
    ) -> Result<DispatchEngine> {
        let config_manager = match &options.environment_override {
            Some(environment) => ConfigManager::load_from_directory_with_env(
                options.config_directory.clone(),
                environment,
            )?,
            None => ConfigManager::load_from_directory(options.config_directory.clone())?,
        };
        info!(
            environment = %config_manager.environment(),
            "Bootstrapping dispatch engine"
        );

        let repository = Self::repository(config_manager.config()).await?;
        let mut engine = DispatchEngine::new(config_manager, repository, messaging);
        if options.auto_start {
            engine.start().await?;
        }
        Ok(engine)
    }

    async fn repository(config: &DispatchConfig) -> Result<Arc<dyn RequestRepository>> {
        if config.database.url.is_none() {
            warn!("No database configured, requests are kept in memory");
            return Ok(Arc::new(InMemoryRequestRepository::new()));
        }

        #[cfg(feature = "postgres")]
        {
            let repository = crate::store::PgRequestRepository::connect(&config.database).await?;
            Ok(Arc::new(repository))
        }

        #[cfg(not(feature = "postgres"))]
        {
            Err(DispatchError::ConfigurationError(
                "database.url is set but the postgres feature is disabled".to_string(),
            ))
        }
    }
}

/// A wired dispatch engine and the handles of its running consumers
pub struct DispatchEngine {
    config_manager: Arc<ConfigManager>,
    service: Arc<RequestService>,
    messaging: Arc<dyn MessageClient>,
    worker_cache: Arc<WorkerCache>,
    routing: Arc<RoutingCache>,
    session_events: Arc<SessionEventPublisher>,
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl DispatchEngine {
    /// Wire every component. Routing starts from the configured `routing`
    /// section and can be replaced later through [`DispatchEngine::routing`].
    pub fn new(
        config_manager: Arc<ConfigManager>,
        repository: Arc<dyn RequestRepository>,
        messaging: Arc<dyn MessageClient>,
    ) -> Self {
        let config = Arc::new(config_manager.config().clone());
        let worker_cache = Arc::new(WorkerCache::new(config.workers.heartbeat_ttl()));
        let routing = Arc::new(RoutingCache::new(config.routing.to_snapshot()));
        let session_events = Arc::new(SessionEventPublisher::new(
            config.session_events.channel_capacity,
        ));

        let context = DispatchContext::new(
            config,
            repository,
            Arc::clone(&messaging),
            worker_cache.clone(),
            routing.clone(),
            session_events.clone(),
        );

        Self {
            config_manager,
            service: Arc::new(RequestService::new(context)),
            messaging,
            worker_cache,
            routing,
            session_events,
            shutdown: None,
            tasks: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Declare queues and spawn the consumers
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            warn!("Dispatch engine already running");
            return Ok(());
        }

        let config = self.config_manager.config();
        let queues = &config.queues;
        for queue in [
            &queues.request_queue,
            &queues.response_queue,
            &queues.worker_response_queue,
            &queues.worker_request_dlq,
            &queues.heartbeat_queue,
        ] {
            self.messaging.ensure_queue(queue).await?;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let batch_size = config.processing.batch_size;
        let polling_interval = config.processing.polling_interval();

        let listeners = vec![
            QueueListener::new(
                queues.request_queue.clone(),
                Arc::clone(&self.messaging),
                Arc::new(RequestBatchHandler::new(self.service.clone())),
                batch_size,
                polling_interval,
            ),
            QueueListener::new(
                queues.worker_response_queue.clone(),
                Arc::clone(&self.messaging),
                Arc::new(WorkerResponseBatchHandler::new(self.service.clone())),
                batch_size,
                polling_interval,
            ),
            QueueListener::new(
                queues.worker_request_dlq.clone(),
                Arc::clone(&self.messaging),
                Arc::new(DlqBatchHandler::new(self.service.clone())),
                batch_size,
                polling_interval,
            ),
            QueueListener::new(
                queues.heartbeat_queue.clone(),
                Arc::clone(&self.messaging),
                Arc::new(HeartbeatBatchHandler::new(
                    self.worker_cache.clone(),
                    self.service.clone(),
                )),
                batch_size,
                polling_interval,
            ),
        ];

        for listener in listeners {
            let shutdown = shutdown_rx.clone();
            self.tasks
                .push(tokio::spawn(async move { listener.run(shutdown).await }));
        }
        self.tasks.push(tokio::spawn(Self::scan_loop(
            self.service.clone(),
            self.worker_cache.clone(),
            config.processing.scan_interval(),
            shutdown_rx,
        )));

        self.shutdown = Some(shutdown_tx);
        info!(
            tenant = %config.tenant.name,
            listeners = self.tasks.len(),
            "Dispatch engine started"
        );
        Ok(())
    }

    /// Periodic eviction of dead workers and rescan of parked requests
    async fn scan_loop(
        service: Arc<RequestService>,
        worker_cache: Arc<WorkerCache>,
        interval: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    worker_cache.evict_expired();
                    if let Err(e) = service.scan_no_worker_available().await {
                        error!(error = %e, "No-worker rescan failed");
                    }
                }
                changed = shutdown.changed() => {
                    let stopping = changed.is_err() || *shutdown.borrow();
                    if stopping {
                        break;
                    }
                }
            }
        }
        info!("No-worker rescan stopped");
    }

    /// Signal every consumer and wait for them to finish
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(sender) = self.shutdown.take() else {
            warn!("Dispatch engine already stopped");
            return Ok(());
        };
        sender.send(true).map_err(|_| {
            DispatchError::OrchestrationError("Failed to send shutdown signal".to_string())
        })?;

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!(error = %e, "Consumer task ended abnormally");
            }
        }
        info!("Dispatch engine stopped");
        Ok(())
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            running: self.is_running(),
            environment: self.config_manager.environment().to_string(),
            tenant: self.config_manager.config().tenant.name.clone(),
            listeners: self.tasks.len(),
            alive_worker_types: self.worker_cache.alive_worker_types(),
        }
    }

    pub fn service(&self) -> &Arc<RequestService> {
        &self.service
    }

    pub fn worker_cache(&self) -> &Arc<WorkerCache> {
        &self.worker_cache
    }

    pub fn routing(&self) -> &Arc<RoutingCache> {
        &self.routing
    }

    pub fn session_events(&self) -> &Arc<SessionEventPublisher> {
        &self.session_events
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }
}
