//! # Models
//!
//! Request records, routing configuration and search types.

pub mod request;
pub mod search;
pub mod worker_config;

pub use request::{Request, RequestSnapshot};
pub use search::{DateRange, Page, PageRequest, RequestSearchParameters};
pub use worker_config::{WorkerConfig, WorkflowConfig, WorkflowStep};
