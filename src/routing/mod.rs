//! # Routing
//!
//! Resolves a request's content type to what processes it: either a single
//! worker or a multi-step workflow. Callers treat both uniformly through
//! [`ContentRoute`].
//!
//! The [`RoutingCache`] holds an immutable snapshot swapped in whole by
//! [`RoutingCache::refresh`]; readers never wait on a refresh in progress.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use crate::models::{WorkerConfig, WorkflowConfig, WorkflowStep};

/// How one content type is processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentRoute {
    Worker(WorkerConfig),
    Workflow(WorkflowConfig),
}

impl ContentRoute {
    pub fn is_workflow(&self) -> bool {
        matches!(self, ContentRoute::Workflow(_))
    }

    pub fn keep_errors(&self) -> bool {
        match self {
            ContentRoute::Worker(config) => config.keep_errors,
            ContentRoute::Workflow(workflow) => workflow.keep_errors,
        }
    }

    /// Name used in logs and originator messages
    pub fn name(&self) -> &str {
        match self {
            ContentRoute::Worker(config) => &config.worker_type,
            ContentRoute::Workflow(workflow) => &workflow.workflow_type,
        }
    }

    /// Step a new request starts at. Plain workers have no step number.
    pub fn initial_step(&self) -> Option<(Option<i32>, String)> {
        match self {
            ContentRoute::Worker(config) => Some((None, config.worker_type.clone())),
            ContentRoute::Workflow(workflow) => workflow
                .first_step()
                .map(|step| (Some(step.step_number), step.worker_type.clone())),
        }
    }

    /// Worker type handling `step_number`. A request without a step number is
    /// at the first step.
    pub fn worker_type_at(&self, step_number: Option<i32>) -> Option<String> {
        match (self, step_number) {
            (ContentRoute::Worker(config), _) => Some(config.worker_type.clone()),
            (ContentRoute::Workflow(workflow), None) => {
                workflow.first_step().map(|step| step.worker_type.clone())
            }
            (ContentRoute::Workflow(workflow), Some(number)) => {
                workflow.step(number).map(|step| step.worker_type.clone())
            }
        }
    }

    /// Step after `current_step`, or `None` when the request is at its last step
    pub fn resolve_next_worker(&self, current_step: Option<i32>) -> Option<WorkflowStep> {
        let ContentRoute::Workflow(workflow) = self else {
            return None;
        };
        let current = match current_step {
            Some(number) => number,
            None => workflow.first_step()?.step_number,
        };
        workflow.next_step_after(current).cloned()
    }
}

/// Lookup of the route for a content type
pub trait RouteResolver: Send + Sync {
    fn resolve(&self, content_type: &str) -> Option<ContentRoute>;

    /// Content types a worker type handles, directly or as a workflow step
    fn content_types_for_worker(&self, worker_type: &str) -> Vec<String>;
}

/// Worker and workflow definitions taken at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingSnapshot {
    pub workers: Vec<WorkerConfig>,
    pub workflows: Vec<WorkflowConfig>,
}

impl RoutingSnapshot {
    pub fn new(workers: Vec<WorkerConfig>, workflows: Vec<WorkflowConfig>) -> Self {
        Self { workers, workflows }
    }
}

#[derive(Debug, Default)]
pub struct RoutingCache {
    snapshot: RwLock<Arc<RoutingSnapshot>>,
}

impl RoutingCache {
    pub fn new(snapshot: RoutingSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Replace the whole snapshot
    pub fn refresh(&self, snapshot: RoutingSnapshot) {
        info!(
            workers = snapshot.workers.len(),
            workflows = snapshot.workflows.len(),
            "Refreshing routing configuration"
        );
        *self.snapshot.write() = Arc::new(snapshot);
    }

    pub fn snapshot(&self) -> Arc<RoutingSnapshot> {
        self.snapshot.read().clone()
    }
}

impl RouteResolver for RoutingCache {
    fn resolve(&self, content_type: &str) -> Option<ContentRoute> {
        let snapshot = self.snapshot();
        if let Some(workflow) = snapshot
            .workflows
            .iter()
            .find(|workflow| workflow.workflow_type == content_type)
        {
            return Some(ContentRoute::Workflow(workflow.clone()));
        }
        snapshot
            .workers
            .iter()
            .find(|worker| worker.accepts(content_type))
            .cloned()
            .map(ContentRoute::Worker)
    }

    fn content_types_for_worker(&self, worker_type: &str) -> Vec<String> {
        let snapshot = self.snapshot();
        let mut content_types: Vec<String> = snapshot
            .workers
            .iter()
            .filter(|worker| worker.worker_type == worker_type)
            .flat_map(|worker| worker.content_types.iter().cloned())
            .chain(
                snapshot
                    .workflows
                    .iter()
                    .filter(|workflow| workflow.uses_worker_type(worker_type))
                    .map(|workflow| workflow.workflow_type.clone()),
            )
            .collect();
        content_types.sort();
        content_types.dedup();
        content_types
    }
}
