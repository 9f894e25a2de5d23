//! # Request Store
//!
//! Durable storage of requests behind the [`RequestRepository`] trait. Every
//! batch mutation is applied atomically: all of a batch's upserts and deletes
//! commit together or not at all.
//!
//! Writes never fail on a row another batch got to first. A new request whose
//! `request_id` is already stored is not inserted, and an update of a request
//! purged meanwhile is not applied. Both are left out of the returned rows so
//! callers only report what was written.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::error::Result;
use crate::models::{Page, PageRequest, Request, RequestSearchParameters};

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::InMemoryRequestRepository;
#[cfg(feature = "postgres")]
pub use postgres::PgRequestRepository;

/// Mutations of one batch, applied in a single unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestChangeset {
    pub upserts: Vec<Request>,
    /// Request ids to purge
    pub deletes: Vec<String>,
}

impl RequestChangeset {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

#[async_trait]
pub trait RequestRepository: Send + Sync {
    /// Subset of `request_ids` already present
    async fn existing_request_ids(&self, request_ids: &[String]) -> Result<HashSet<String>>;

    async fn find_by_request_ids(&self, request_ids: &[String]) -> Result<Vec<Request>>;

    async fn find_one_by_request_id(&self, request_id: &str) -> Result<Option<Request>>;

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<Request>>;

    /// Insert requests without an id and update those with one. Returns the
    /// written rows in input order.
    async fn save_all(&self, requests: Vec<Request>) -> Result<Vec<Request>> {
        self.commit(RequestChangeset {
            upserts: requests,
            deletes: Vec::new(),
        })
        .await
    }

    /// Apply upserts and deletes atomically. Returns the written upserts in
    /// input order, leaving out inserts whose `request_id` is taken and
    /// updates of rows that no longer exist.
    async fn commit(&self, changes: RequestChangeset) -> Result<Vec<Request>>;

    /// Requests matching `params`, ordered by id
    async fn search(
        &self,
        params: &RequestSearchParameters,
        page: PageRequest,
    ) -> Result<Page<Request>>;

    async fn count(&self, params: &RequestSearchParameters) -> Result<u64>;

    async fn delete_by_request_ids(&self, request_ids: &[String]) -> Result<u64> {
        if request_ids.is_empty() {
            return Ok(0);
        }
        let count = request_ids.len() as u64;
        self.commit(RequestChangeset {
            upserts: Vec::new(),
            deletes: request_ids.to_vec(),
        })
        .await?;
        Ok(count)
    }
}
