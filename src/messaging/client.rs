//! # Message Client Trait
//!
//! Transport seam used by every engine component. Implementations provide
//! at-least-once delivery; the engine tolerates duplicates.

use async_trait::async_trait;

use super::errors::MessagingError;
use super::message::RawMessage;

#[async_trait]
pub trait MessageClient: Send + Sync {
    /// Declare a queue or exchange if the transport needs it
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError>;

    /// Publish a batch of messages onto one queue
    async fn send_batch(
        &self,
        queue_name: &str,
        messages: Vec<RawMessage>,
    ) -> Result<(), MessagingError>;

    /// Take up to `limit` messages off a queue
    async fn receive_batch(
        &self,
        queue_name: &str,
        limit: usize,
    ) -> Result<Vec<RawMessage>, MessagingError>;

    async fn send(&self, queue_name: &str, message: RawMessage) -> Result<(), MessagingError> {
        self.send_batch(queue_name, vec![message]).await
    }
}
