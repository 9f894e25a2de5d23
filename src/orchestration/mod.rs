//! # Orchestration Engine
//!
//! Moves requests through their lifecycle:
//!
//! ```text
//! RequestValidator -> StepInitializer -> Dispatcher -> (worker) -> ResponseHandler
//!                                           ^                           |
//!                                           +---- next workflow step ---+
//! ```
//!
//! The dead-letter handler is a parallel entry that fails requests a worker
//! never received. Every component reports originator-facing outcomes through
//! the [`Notifier`] and session transitions through
//! [`crate::sessions::SessionNotifier`].
//!
//! ## Core Components
//!
//! - **RequestService**: facade used by the queue consumers and operators
//! - **RequestValidator**: header, auto-skip and duplicate id checks
//! - **Dispatcher**: worker resolution, batch persistence and bulk publish
//! - **ResponseHandler**: worker outcomes, workflow advance and retention
//! - **DlqHandler**: transport dead letters
//! - **RequestScanner**: no-worker rescans, operator retry and delete
//! - **DispatchEngine**: configuration-driven wiring and consumer lifecycle

pub mod bootstrap;
pub mod context;
pub mod deletion_policy;
pub mod dispatcher;
pub mod dlq_handler;
pub mod listeners;
pub mod notifier;
pub mod request_scanner;
pub mod request_service;
pub mod request_validator;
pub mod response_handler;
pub mod step_initializer;

pub use bootstrap::{BootstrapConfig, DispatchBootstrap, DispatchEngine, EngineStatus};
pub use context::DispatchContext;
pub use deletion_policy::should_delete;
pub use dispatcher::{DispatchOrigin, DispatchPlan, DispatchReport, Dispatcher};
pub use dlq_handler::{DlqHandler, DlqReport};
pub use listeners::{
    BatchHandler, DlqBatchHandler, HeartbeatBatchHandler, QueueListener, RequestBatchHandler,
    WorkerResponseBatchHandler,
};
pub use notifier::Notifier;
pub use request_scanner::RequestScanner;
pub use request_service::RequestService;
pub use request_validator::{RequestValidator, ValidationOutcome};
pub use response_handler::{apply_worker_response, ResponseHandler, ResponseReport};
pub use step_initializer::{initialize_step, StepInitialization};
