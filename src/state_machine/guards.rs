//! Transition guards.
//!
//! Status is the single point of coordination between the dispatcher, the
//! response handler and the dead-letter handler, so every component asks
//! these guards before mutating a request.

use super::states::RequestStatus;

/// A dispatch pass may only send requests that are waiting for one.
pub fn can_dispatch(status: RequestStatus) -> bool {
    matches!(
        status,
        RequestStatus::ToDispatch | RequestStatus::NoWorkerAvailable
    )
}

/// Dead-letter errors only apply to requests a worker could still own.
///
/// `TO_DISPATCH` means the request already moved on (workflow advance or
/// retry) and `TO_DELETE` means it is being purged.
pub fn accepts_dead_letter_error(status: RequestStatus) -> bool {
    matches!(
        status,
        RequestStatus::Dispatched
            | RequestStatus::NoWorkerAvailable
            | RequestStatus::Running
            | RequestStatus::InvalidContent
            | RequestStatus::Error
    )
}

/// Worker responses are ignored for requests the engine no longer routes to
/// a worker.
pub fn accepts_worker_response(status: RequestStatus) -> bool {
    !matches!(status, RequestStatus::ToDispatch | RequestStatus::ToDelete)
}
