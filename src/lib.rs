#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Dispatch Core
//!
//! Request dispatch and multi-step workflow orchestration for message-driven
//! worker pools.
//!
//! ## Overview
//!
//! Producers submit content-typed requests. The engine resolves each content
//! type to a single worker or to an ordered workflow of workers, sends the
//! request to a live worker's inbound queue, tracks worker responses, and
//! reports outcomes back to the originator and to session aggregators.
//!
//! ## Module Organization
//!
//! - [`models`] - Request records, routing definitions and search types
//! - [`state_machine`] - Request statuses and transition guards
//! - [`cache`] - Heartbeat-driven worker availability
//! - [`routing`] - Content type to worker or workflow resolution
//! - [`store`] - Durable request storage (Postgres or in-memory)
//! - [`messaging`] - Transport seam and wire events
//! - [`sessions`] - Session lifecycle notifications
//! - [`orchestration`] - Validation, dispatch, response and dead-letter handling
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dispatch_core::messaging::InMemoryMessageClient;
//! use dispatch_core::orchestration::{BootstrapConfig, DispatchBootstrap};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! dispatch_core::logging::init_structured_logging();
//!
//! let transport = Arc::new(InMemoryMessageClient::new());
//! let mut engine = DispatchBootstrap::bootstrap(BootstrapConfig::default(), transport).await?;
//! println!("engine status: {:?}", engine.status());
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod routing;
pub mod sessions;
pub mod state_machine;
pub mod store;

pub use cache::{WorkerAvailability, WorkerCache};
pub use config::{ConfigManager, DispatchConfig};
pub use error::{DispatchError, Result};
pub use messaging::{MessageClient, MessagingError, RawMessage};
pub use models::{Request, RequestSearchParameters, RequestSnapshot, WorkerConfig, WorkflowConfig};
pub use orchestration::{DispatchContext, DispatchEngine, RequestService};
pub use routing::{ContentRoute, RouteResolver, RoutingCache};
pub use sessions::{SessionEventPublisher, SessionNotifier, SessionsRequestsInfo};
pub use state_machine::RequestStatus;
pub use store::RequestRepository;
