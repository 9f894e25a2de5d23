//! # Step Initializer
//!
//! Assigns the current step to a request that has no step worker type yet:
//! a new request starts at its workflow's first step, a request that already
//! carries a step number resumes at that step. Plain worker routes have a
//! single implicit step.

use tracing::warn;

use crate::models::Request;
use crate::routing::ContentRoute;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepInitialization {
    /// The step worker type was assigned
    Initialized,
    /// The request already had a step worker type
    AlreadyInitialized,
    /// The content type has no worker nor workflow
    NoRoute,
    /// The request's step number is not part of its workflow any more
    StepNotFound { step_number: i32 },
}

pub fn initialize_step(request: &mut Request, route: Option<&ContentRoute>) -> StepInitialization {
    if request.step_worker_type.is_some() {
        return StepInitialization::AlreadyInitialized;
    }

    let Some(route) = route else {
        return StepInitialization::NoRoute;
    };

    match request.step_number {
        None => match route.initial_step() {
            Some((step_number, worker_type)) => {
                request.step_number = step_number;
                request.step_worker_type = Some(worker_type);
                StepInitialization::Initialized
            }
            // A workflow without steps
            None => StepInitialization::NoRoute,
        },
        Some(step_number) => match route.worker_type_at(Some(step_number)) {
            Some(worker_type) => {
                request.step_worker_type = Some(worker_type);
                StepInitialization::Initialized
            }
            None => {
                warn!(
                    request_id = %request.request_id,
                    workflow = %route.name(),
                    step_number = step_number,
                    "Request step is missing from its workflow, request is stalled"
                );
                StepInitialization::StepNotFound { step_number }
            }
        },
    }
}
