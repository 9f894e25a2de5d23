//! # Messaging Module
//!
//! Transport abstraction for the dispatch engine: the `MessageClient` trait,
//! an in-memory implementation, and the typed events exchanged with
//! originators and workers.

pub mod client;
pub mod errors;
pub mod in_memory_client;
pub mod message;

pub use client::MessageClient;
pub use errors::MessagingError;
pub use in_memory_client::InMemoryMessageClient;
pub use message::{
    HeaderValue, RawMessage, RequestEvent, ResponseEvent, WorkerHeartBeatEvent,
    WorkerRequestDlqEvent, WorkerRequestEvent, WorkerResponseEvent,
};
