//! Postgres request store. Runs only when `DATABASE_URL` points at a
//! reachable database; otherwise every test returns early.

#![cfg(feature = "postgres")]

use dispatch_core::config::DatabaseConfig;
use dispatch_core::models::{PageRequest, Request, RequestSearchParameters};
use dispatch_core::store::{PgRequestRepository, RequestChangeset, RequestRepository};
use dispatch_core::RequestStatus;
use std::collections::BTreeMap;
use uuid::Uuid;

async fn repository() -> Option<PgRequestRepository> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let config = DatabaseConfig {
        url: Some(url),
        max_connections: 2,
    };
    Some(
        PgRequestRepository::connect(&config)
            .await
            .expect("connect to DATABASE_URL"),
    )
}

/// Request ids unique to one test run, so runs never collide
fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

fn request(request_id: &str, content_type: &str) -> Request {
    let mut headers = BTreeMap::new();
    headers.insert("trace".to_string(), "abc".to_string());
    Request::new(request_id, content_type, "owner", "session", b"payload".to_vec())
        .with_additional_headers(headers)
}

#[tokio::test]
async fn test_save_assigns_ids_and_round_trips_fields() {
    let Some(repository) = repository().await else {
        return;
    };
    let request_id = unique("pg-save");

    let saved = repository
        .save_all(vec![request(&request_id, "ct1")
            .with_status(RequestStatus::Dispatched)
            .with_step(Some(0), Some("worker1".to_string()))
            .with_dispatched_worker_type("worker1")])
        .await
        .unwrap();
    assert!(saved[0].id.is_some());

    let loaded = repository
        .find_one_by_request_id(&request_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.id, saved[0].id);
    assert_eq!(loaded.status, RequestStatus::Dispatched);
    assert_eq!(loaded.step_number, Some(0));
    assert_eq!(loaded.step_worker_type.as_deref(), Some("worker1"));
    assert_eq!(loaded.content, b"payload".to_vec());
    assert_eq!(loaded.additional_headers.get("trace").map(String::as_str), Some("abc"));

    repository.delete_by_request_ids(&[request_id]).await.unwrap();
}

#[tokio::test]
async fn test_commit_applies_upserts_and_deletes_together() {
    let Some(repository) = repository().await else {
        return;
    };
    let kept_id = unique("pg-kept");
    let purged_id = unique("pg-purged");
    let saved = repository
        .save_all(vec![request(&kept_id, "ct1"), request(&purged_id, "ct1")])
        .await
        .unwrap();

    let mut kept = saved[0].clone();
    kept.status = RequestStatus::Error;
    kept.error = Some("boom".to_string());
    repository
        .commit(RequestChangeset {
            upserts: vec![kept],
            deletes: vec![purged_id.clone()],
        })
        .await
        .unwrap();

    let existing = repository
        .existing_request_ids(&[kept_id.clone(), purged_id.clone()])
        .await
        .unwrap();
    assert!(existing.contains(&kept_id));
    assert!(!existing.contains(&purged_id));
    let kept = repository.find_one_by_request_id(&kept_id).await.unwrap().unwrap();
    assert_eq!(kept.status, RequestStatus::Error);
    assert_eq!(kept.error.as_deref(), Some("boom"));

    repository.delete_by_request_ids(&[kept_id]).await.unwrap();
}

#[tokio::test]
async fn test_search_filters_and_pages_by_id() {
    let Some(repository) = repository().await else {
        return;
    };
    let content_type = unique("pg-ct");
    let ids: Vec<String> = (0..3).map(|i| unique(&format!("pg-search-{i}"))).collect();
    repository
        .save_all(
            ids.iter()
                .map(|id| request(id, &content_type).with_status(RequestStatus::NoWorkerAvailable))
                .collect(),
        )
        .await
        .unwrap();

    let params = RequestSearchParameters::default()
        .with_statuses([RequestStatus::NoWorkerAvailable])
        .with_content_types([content_type.clone()]);
    assert_eq!(repository.count(&params).await.unwrap(), 3);

    let first = repository.search(&params, PageRequest::first(2)).await.unwrap();
    assert_eq!(first.total_elements, 3);
    assert_eq!(first.content.len(), 2);
    assert!(first.has_next());
    assert_eq!(first.content[0].request_id, ids[0]);

    let second = repository
        .search(&params, PageRequest::new(1, 2))
        .await
        .unwrap();
    assert_eq!(second.content.len(), 1);
    assert_eq!(second.content[0].request_id, ids[2]);

    repository.delete_by_request_ids(&ids).await.unwrap();
    assert_eq!(repository.count(&params).await.unwrap(), 0);
}

#[tokio::test]
async fn test_taken_request_id_is_not_inserted() {
    let Some(repository) = repository().await else {
        return;
    };
    let taken = unique("pg-taken");
    let fresh = unique("pg-fresh");
    repository.save_all(vec![request(&taken, "ct1")]).await.unwrap();

    let saved = repository
        .save_all(vec![request(&taken, "ct2"), request(&fresh, "ct1")])
        .await
        .unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].request_id, fresh);
    let kept = repository.find_one_by_request_id(&taken).await.unwrap().unwrap();
    assert_eq!(kept.content_type, "ct1");

    repository.delete_by_request_ids(&[taken, fresh]).await.unwrap();
}

#[tokio::test]
async fn test_update_of_purged_request_is_not_applied() {
    let Some(repository) = repository().await else {
        return;
    };
    let request_id = unique("pg-purged-update");
    let mut loaded = repository
        .save_all(vec![request(&request_id, "ct1").with_status(RequestStatus::Error)])
        .await
        .unwrap();
    repository
        .delete_by_request_ids(&[request_id.clone()])
        .await
        .unwrap();

    loaded[0].status = RequestStatus::Running;
    let saved = repository.save_all(loaded).await.unwrap();
    assert!(saved.is_empty());
    assert!(repository
        .find_one_by_request_id(&request_id)
        .await
        .unwrap()
        .is_none());
}
