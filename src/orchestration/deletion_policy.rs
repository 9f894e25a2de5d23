//! Retention of requests that reached a stable state.

use crate::models::Request;
use crate::routing::ContentRoute;
use crate::state_machine::RequestStatus;

/// Successes are always purged. Errors are purged only when the route that
/// handled them does not keep errors; a request whose route is gone is kept
/// for an operator to look at.
pub fn should_delete(request: &Request, route: Option<&ContentRoute>) -> bool {
    match request.status {
        RequestStatus::Success => true,
        RequestStatus::Error | RequestStatus::InvalidContent => {
            route.is_some_and(|route| !route.keep_errors())
        }
        _ => false,
    }
}
