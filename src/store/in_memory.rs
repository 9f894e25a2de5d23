//! In-memory request store. Enforces the same `request_id` uniqueness as the
//! database table and applies each changeset under one lock.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use super::{RequestChangeset, RequestRepository};
use crate::error::Result;
use crate::models::{Page, PageRequest, Request, RequestSearchParameters};

#[derive(Debug, Default)]
struct Rows {
    by_id: BTreeMap<i64, Request>,
    next_id: i64,
}

impl Rows {
    fn id_of(&self, request_id: &str) -> Option<i64> {
        self.by_id
            .values()
            .find(|request| request.request_id == request_id)
            .and_then(|request| request.id)
    }
}

/// Request store backed by process memory
///
/// ```rust
/// use dispatch_core::models::Request;
/// use dispatch_core::store::{InMemoryRequestRepository, RequestRepository};
///
/// # tokio_test::block_on(async {
/// let repository = InMemoryRequestRepository::new();
/// let saved = repository
///     .save_all(vec![Request::new("r1", "ct1", "owner", "session", b"{}".to_vec())])
///     .await
///     .unwrap();
/// assert_eq!(saved[0].id, Some(1));
/// assert!(repository.find_one_by_request_id("r1").await.unwrap().is_some());
/// # });
/// ```
#[derive(Debug, Default)]
pub struct InMemoryRequestRepository {
    rows: tokio::sync::Mutex<Rows>,
}

impl InMemoryRequestRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored request, ordered by id
    pub async fn all(&self) -> Vec<Request> {
        self.rows.lock().await.by_id.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RequestRepository for InMemoryRequestRepository {
    async fn existing_request_ids(&self, request_ids: &[String]) -> Result<HashSet<String>> {
        let rows = self.rows.lock().await;
        Ok(request_ids
            .iter()
            .filter(|request_id| rows.id_of(request_id).is_some())
            .cloned()
            .collect())
    }

    async fn find_by_request_ids(&self, request_ids: &[String]) -> Result<Vec<Request>> {
        let wanted: HashSet<&String> = request_ids.iter().collect();
        let rows = self.rows.lock().await;
        Ok(rows
            .by_id
            .values()
            .filter(|request| wanted.contains(&request.request_id))
            .cloned()
            .collect())
    }

    async fn find_one_by_request_id(&self, request_id: &str) -> Result<Option<Request>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .by_id
            .values()
            .find(|request| request.request_id == request_id)
            .cloned())
    }

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<Request>> {
        let rows = self.rows.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| rows.by_id.get(id).cloned())
            .collect())
    }

    async fn commit(&self, changes: RequestChangeset) -> Result<Vec<Request>> {
        let mut rows = self.rows.lock().await;

        let mut saved = Vec::with_capacity(changes.upserts.len());
        for mut request in changes.upserts {
            match request.id {
                Some(id) => {
                    // Same columns as the database update; identity stays.
                    let Some(stored) = rows.by_id.get_mut(&id) else {
                        debug!(request_id = %request.request_id, "Update of a purged request skipped");
                        continue;
                    };
                    stored.status = request.status;
                    stored.step_number = request.step_number;
                    stored.step_worker_type = request.step_worker_type;
                    stored.dispatched_worker_type = request.dispatched_worker_type;
                    stored.content = request.content;
                    stored.error = request.error;
                    stored.additional_headers = request.additional_headers;
                    saved.push(stored.clone());
                }
                None => {
                    if rows.id_of(&request.request_id).is_some() {
                        debug!(request_id = %request.request_id, "Insert of a stored request_id skipped");
                        continue;
                    }
                    rows.next_id += 1;
                    let id = rows.next_id;
                    request.id = Some(id);
                    rows.by_id.insert(id, request.clone());
                    saved.push(request);
                }
            }
        }
        for request_id in &changes.deletes {
            if let Some(id) = rows.id_of(request_id) {
                rows.by_id.remove(&id);
            }
        }

        Ok(saved)
    }

    async fn search(
        &self,
        params: &RequestSearchParameters,
        page: PageRequest,
    ) -> Result<Page<Request>> {
        let rows = self.rows.lock().await;
        let matching: Vec<&Request> = rows
            .by_id
            .values()
            .filter(|request| params.matches(request))
            .collect();
        let total_elements = matching.len() as u64;
        let content = matching
            .into_iter()
            .skip(page.offset())
            .take(page.size)
            .cloned()
            .collect();
        Ok(Page {
            content,
            page,
            total_elements,
        })
    }

    async fn count(&self, params: &RequestSearchParameters) -> Result<u64> {
        let rows = self.rows.lock().await;
        Ok(rows
            .by_id
            .values()
            .filter(|request| params.matches(request))
            .count() as u64)
    }
}
