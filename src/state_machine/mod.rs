//! Request status machine: states and the guards deciding which component
//! may move a request out of its current state.

pub mod guards;
pub mod states;

pub use states::{RequestStatus, ResponseStatus, WorkerResponseStatus};
