//! # In-Memory Message Client
//!
//! `MessageClient` backed by per-queue `VecDeque`s. Used by the test harness
//! and for running the engine without a broker.
//!
//! Queues are created on first use. A queue can be marked as failing to
//! simulate publish errors.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};

use super::client::MessageClient;
use super::errors::MessagingError;
use super::message::RawMessage;

#[derive(Debug, Default)]
struct InMemoryQueues {
    queues: HashMap<String, VecDeque<RawMessage>>,
    failing: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryMessageClient {
    state: tokio::sync::Mutex<InMemoryQueues>,
}

impl InMemoryMessageClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send to `queue_name` fail until cleared
    pub async fn fail_queue(&self, queue_name: &str) {
        self.state.lock().await.failing.insert(queue_name.to_string());
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failing.clear();
    }

    pub async fn queue_depth(&self, queue_name: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(queue_name)
            .map_or(0, VecDeque::len)
    }

    /// Remove and return every pending message
    pub async fn drain(&self, queue_name: &str) -> Vec<RawMessage> {
        self.state
            .lock()
            .await
            .queues
            .get_mut(queue_name)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    pub async fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().await.queues.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl MessageClient for InMemoryMessageClient {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        self.state
            .lock()
            .await
            .queues
            .entry(queue_name.to_string())
            .or_default();
        Ok(())
    }

    async fn send_batch(
        &self,
        queue_name: &str,
        messages: Vec<RawMessage>,
    ) -> Result<(), MessagingError> {
        let mut state = self.state.lock().await;
        if state.failing.contains(queue_name) {
            return Err(MessagingError::queue_operation(
                queue_name,
                "send",
                "queue is marked as failing",
            ));
        }
        state
            .queues
            .entry(queue_name.to_string())
            .or_default()
            .extend(messages);
        Ok(())
    }

    async fn receive_batch(
        &self,
        queue_name: &str,
        limit: usize,
    ) -> Result<Vec<RawMessage>, MessagingError> {
        let mut state = self.state.lock().await;
        let queue = state.queues.entry(queue_name.to_string()).or_default();
        let take = limit.min(queue.len());
        Ok(queue.drain(..take).collect())
    }
}
