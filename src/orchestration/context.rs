//! # Dispatch Context
//!
//! The collaborators every orchestration component needs, bundled so they can
//! be injected once and shared by the request, response, dead-letter and
//! heartbeat consumers.

use std::sync::Arc;

use crate::cache::WorkerAvailability;
use crate::config::DispatchConfig;
use crate::messaging::MessageClient;
use crate::routing::RouteResolver;
use crate::sessions::SessionNotifier;
use crate::store::RequestRepository;

#[derive(Clone)]
pub struct DispatchContext {
    pub config: Arc<DispatchConfig>,
    pub repository: Arc<dyn RequestRepository>,
    pub messaging: Arc<dyn MessageClient>,
    pub workers: Arc<dyn WorkerAvailability>,
    pub routes: Arc<dyn RouteResolver>,
    pub sessions: Arc<dyn SessionNotifier>,
}

impl DispatchContext {
    pub fn new(
        config: Arc<DispatchConfig>,
        repository: Arc<dyn RequestRepository>,
        messaging: Arc<dyn MessageClient>,
        workers: Arc<dyn WorkerAvailability>,
        routes: Arc<dyn RouteResolver>,
        sessions: Arc<dyn SessionNotifier>,
    ) -> Self {
        Self {
            config,
            repository,
            messaging,
            workers,
            routes,
            sessions,
        }
    }
}

impl std::fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchContext")
            .field("tenant", &self.config.tenant.name)
            .finish_non_exhaustive()
    }
}
