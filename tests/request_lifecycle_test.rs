//! End-to-end request lifecycles through the request service: registration,
//! dispatch, worker responses, workflow chaining, retention and dead letters.

mod common;

use common::*;
use dispatch_core::constants::EMPTY_CONTENT;
use dispatch_core::messaging::{WorkerRequestDlqEvent, WorkerResponseEvent};
use dispatch_core::models::Request;
use dispatch_core::sessions::SessionEvent;
use dispatch_core::state_machine::{ResponseStatus, WorkerResponseStatus};
use dispatch_core::store::RequestRepository;
use dispatch_core::{DispatchError, RequestStatus};

#[tokio::test]
async fn test_duplicate_request_ids_are_skipped() {
    let harness = DispatchHarness::new();
    harness.heartbeat("worker1");

    harness
        .register(vec![
            submission("r1", "ct1", b"first"),
            submission("r1", "ct1", b"second"),
        ])
        .await;
    harness.register(vec![submission("r1", "ct1", b"third")]).await;

    assert_eq!(harness.repository.len().await, 1);
    let stored = harness.stored("r1").await.unwrap();
    assert_eq!(stored.content, b"first".to_vec());

    let responses = harness.take_responses().await;
    let skipped: Vec<_> = responses
        .iter()
        .filter(|r| r.status == ResponseStatus::Skipped)
        .collect();
    assert_eq!(skipped.len(), 2);
    assert!(skipped
        .iter()
        .all(|r| r.message.contains("<r1> already exists")));
    assert_eq!(
        responses
            .iter()
            .filter(|r| r.status == ResponseStatus::Granted)
            .count(),
        1
    );
    assert_eq!(harness.take_worker_requests("worker1").await.len(), 1);
}

#[tokio::test]
async fn test_missing_headers_and_auto_skip() {
    let mut config = dispatch_core::config::DispatchConfig::default();
    config.settings.skip_content_types = vec!["ignored".to_string()];
    let harness = DispatchHarness::with_config(config, default_routing());

    let no_owner = dispatch_core::messaging::RequestEvent::new(b"x".to_vec())
        .with_session(SESSION)
        .with_content_type("ct1")
        .with_request_id("r-no-owner");
    harness
        .register(vec![no_owner, submission("r-ignored", "ignored", b"x")])
        .await;

    assert!(harness.repository.is_empty().await);
    let responses = harness.take_responses().await;
    assert_eq!(responses.len(), 2);
    assert!(responses.iter().all(|r| r.status == ResponseStatus::Skipped));
    assert!(responses[0].message.contains("<owner> property is missing"));
    assert!(responses[1]
        .message
        .contains("Content type <ignored> is configured to be automatically skipped"));
}

#[tokio::test]
async fn test_request_without_id_gets_generated_one() {
    let harness = DispatchHarness::new();
    let event = dispatch_core::messaging::RequestEvent::new(b"x".to_vec())
        .with_owner(OWNER)
        .with_session(SESSION)
        .with_content_type("ct1");
    let info = harness.service.register_requests(vec![event]).await.unwrap();

    assert_eq!(info.requests.len(), 1);
    let request_id = &info.requests[0].request_id;
    assert!(uuid::Uuid::parse_str(request_id).is_ok());
    assert!(harness.stored(request_id).await.is_some());
}

#[tokio::test]
async fn test_no_worker_defers_until_heartbeat() {
    let harness = DispatchHarness::new();
    harness.register(vec![submission("r1", "ct1", b"payload")]).await;

    let parked = harness.stored("r1").await.unwrap();
    assert_eq!(parked.status, RequestStatus::NoWorkerAvailable);
    assert_eq!(parked.dispatched_worker_type, None);
    let responses = harness.take_responses().await;
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, ResponseStatus::Delayed);
    assert!(responses[0].message.contains("<ct1>"));

    // A periodic scan without any worker changes nothing.
    assert_eq!(harness.service.scan_no_worker_available().await.unwrap(), 0);
    assert_eq!(
        harness.service.count_waiting_for_worker("worker1").await.unwrap(),
        1
    );
    assert!(harness
        .service
        .has_requests_waiting_for(&["ct1".to_string()])
        .await
        .unwrap());
    assert!(!harness
        .service
        .has_requests_waiting_for(&["ct2".to_string()])
        .await
        .unwrap());

    harness.heartbeat("worker1");
    let dispatched = harness
        .service
        .dispatch_waiting_for(&["worker1".to_string()])
        .await
        .unwrap();
    assert_eq!(dispatched, 1);

    let sent = harness.stored("r1").await.unwrap();
    assert_eq!(sent.status, RequestStatus::Dispatched);
    assert_eq!(sent.dispatched_worker_type.as_deref(), Some("worker1"));
    assert!(!harness
        .service
        .has_requests_waiting_for(&["ct1".to_string()])
        .await
        .unwrap());

    let worker_requests = harness.take_worker_requests("worker1").await;
    assert_eq!(worker_requests.len(), 1);
    assert_eq!(worker_requests[0].request_id, "r1");
    assert_eq!(worker_requests[0].content, b"payload".to_vec());
    assert_eq!(worker_requests[0].source, OWNER);
    assert_eq!(
        harness.take_responses().await[0].status,
        ResponseStatus::Granted
    );
}

#[tokio::test]
async fn test_unrelated_worker_does_not_trigger_rescan() {
    let harness = DispatchHarness::new();
    harness.register(vec![submission("r1", "ct1", b"payload")]).await;

    harness.heartbeat("worker2");
    let dispatched = harness
        .service
        .dispatch_waiting_for(&["worker2".to_string()])
        .await
        .unwrap();

    assert_eq!(dispatched, 0);
    assert_eq!(
        harness.stored("r1").await.unwrap().status,
        RequestStatus::NoWorkerAvailable
    );
}

#[tokio::test]
async fn test_single_step_success_is_reported_and_purged() {
    let harness = DispatchHarness::new();
    harness.heartbeat("worker1");
    harness.register(vec![submission("r1", "ct1", b"in")]).await;
    harness.take_responses().await;

    harness.respond(vec![success("r1", b"out")]).await;

    assert!(harness.stored("r1").await.is_none());
    assert!(matches!(
        harness.service.retrieve("r1").await,
        Err(DispatchError::NotFound { .. })
    ));

    let responses = harness.take_responses().await;
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, ResponseStatus::Success);
    assert_eq!(responses[0].worker_type.as_deref(), Some("worker1"));
    assert_eq!(responses[0].content, Some(b"out".to_vec()));
}

#[tokio::test]
async fn test_success_without_content_reports_empty_object() {
    let harness = DispatchHarness::new();
    harness.heartbeat("worker1");
    harness.register(vec![submission("r1", "ct1", b"in")]).await;
    harness.take_responses().await;

    harness
        .respond(vec![WorkerResponseEvent::new(
            "r1",
            WorkerResponseStatus::Success,
        )])
        .await;

    let responses = harness.take_responses().await;
    assert_eq!(responses[0].content, Some(EMPTY_CONTENT.to_vec()));
}

#[tokio::test]
async fn test_running_is_recorded_but_not_reported() {
    let harness = DispatchHarness::new();
    harness.heartbeat("worker1");
    harness.register(vec![submission("r1", "ct1", b"in")]).await;
    harness.take_responses().await;

    harness
        .respond(vec![WorkerResponseEvent::new(
            "r1",
            WorkerResponseStatus::Running,
        )])
        .await;

    assert_eq!(
        harness.stored("r1").await.unwrap().status,
        RequestStatus::Running
    );
    assert!(harness.take_responses().await.is_empty());
}

#[tokio::test]
async fn test_workflow_chains_steps_and_passes_content() {
    let harness = DispatchHarness::new();
    harness.heartbeat("worker1");
    harness.register(vec![submission("r1", "workflow1", b"raw")]).await;

    let first = harness.stored("r1").await.unwrap();
    assert_eq!(first.status, RequestStatus::Dispatched);
    assert_eq!(first.step_number, Some(0));
    assert_eq!(first.step_worker_type.as_deref(), Some("worker1"));
    assert_eq!(harness.take_worker_requests("worker1").await.len(), 1);
    harness.take_responses().await;

    // worker2 is not alive yet: the advanced request parks on step 1.
    harness.respond(vec![success("r1", b"intermediate")]).await;
    let parked = harness.stored("r1").await.unwrap();
    assert_eq!(parked.status, RequestStatus::NoWorkerAvailable);
    assert_eq!(parked.step_number, Some(1));
    assert_eq!(parked.step_worker_type.as_deref(), Some("worker2"));
    assert_eq!(parked.content, b"intermediate".to_vec());
    assert_eq!(parked.dispatched_worker_type, None);
    let responses = harness.take_responses().await;
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, ResponseStatus::Delayed);

    harness.heartbeat("worker2");
    harness
        .service
        .dispatch_waiting_for(&["worker2".to_string()])
        .await
        .unwrap();
    let second = harness.take_worker_requests("worker2").await;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].content, b"intermediate".to_vec());
    assert_eq!(second[0].content_type, "workflow1");
    harness.take_responses().await;

    harness.respond(vec![success("r1", b"final")]).await;
    assert!(harness.stored("r1").await.is_none());
    let responses = harness.take_responses().await;
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status, ResponseStatus::Success);
    assert_eq!(responses[0].worker_type.as_deref(), Some("worker2"));
    assert_eq!(responses[0].content, Some(b"final".to_vec()));
}

#[tokio::test]
async fn test_workflow_advances_straight_to_live_next_worker() {
    let harness = DispatchHarness::new();
    harness.heartbeat("worker1");
    harness.heartbeat("worker2");
    harness.register(vec![submission("r1", "workflow1", b"raw")]).await;
    harness.take_worker_requests("worker1").await;

    let report = harness
        .service
        .handle_worker_responses(vec![success("r1", b"intermediate")])
        .await
        .unwrap();
    assert_eq!(report.redispatched, 1);

    let advanced = harness.stored("r1").await.unwrap();
    assert_eq!(advanced.status, RequestStatus::Dispatched);
    assert_eq!(advanced.dispatched_worker_type.as_deref(), Some("worker2"));
    assert_eq!(harness.take_worker_requests("worker2").await.len(), 1);
}

#[tokio::test]
async fn test_workflow_step_without_content_fails() {
    let harness = DispatchHarness::new();
    harness.heartbeat("worker1");
    harness.register(vec![submission("r1", "workflow1", b"raw")]).await;
    harness.take_responses().await;

    harness
        .respond(vec![WorkerResponseEvent::new(
            "r1",
            WorkerResponseStatus::Success,
        )])
        .await;

    // Workflows keep errors by default.
    let failed = harness.stored("r1").await.unwrap();
    assert_eq!(failed.status, RequestStatus::Error);
    assert!(failed.error.unwrap().contains("returned no content"));
    assert_eq!(
        harness.take_responses().await[0].status,
        ResponseStatus::Error
    );
}

#[tokio::test]
async fn test_error_retention_follows_route() {
    let harness = DispatchHarness::new();
    harness.heartbeat("worker1");
    harness.heartbeat("worker2");
    harness
        .register(vec![
            submission("kept", "ct1", b"a"),
            submission("purged", "ct2", b"b"),
        ])
        .await;
    harness.take_responses().await;

    harness
        .respond(vec![failure("kept", "boom"), failure("purged", "bang")])
        .await;

    let kept = harness.stored("kept").await.unwrap();
    assert_eq!(kept.status, RequestStatus::Error);
    assert_eq!(kept.error.as_deref(), Some("boom"));
    assert!(harness.stored("purged").await.is_none());

    let responses = harness.take_responses().await;
    assert_eq!(responses.len(), 2);
    assert!(responses.iter().all(|r| r.status == ResponseStatus::Error));
    let purged = responses
        .iter()
        .find(|r| r.request_id.as_deref() == Some("purged"))
        .unwrap();
    assert_eq!(
        purged.message,
        "Error during processing your request in <worker2> worker : Cause : bang."
    );
}

#[tokio::test]
async fn test_workflow_retention_overrides_step_worker() {
    // worker2 purges its own errors, but workflow1 keeps them.
    let harness = DispatchHarness::new();
    harness.heartbeat("worker1");
    harness.heartbeat("worker2");
    harness
        .register(vec![submission("r1", "workflow1", b"input")])
        .await;
    assert_eq!(harness.take_worker_requests("worker1").await.len(), 1);

    harness.respond(vec![success("r1", b"intermediate")]).await;
    let at_second_step = harness.take_worker_requests("worker2").await;
    assert_eq!(at_second_step.len(), 1);
    assert_eq!(at_second_step[0].content, b"intermediate".to_vec());

    harness.respond(vec![failure("r1", "step failed")]).await;

    let failed = harness.stored("r1").await.unwrap();
    assert_eq!(failed.status, RequestStatus::Error);
    assert_eq!(failed.step_worker_type.as_deref(), Some("worker2"));
    assert_eq!(failed.dispatched_worker_type.as_deref(), Some("worker2"));
    assert_eq!(failed.error.as_deref(), Some("step failed"));
    assert!(harness
        .take_responses()
        .await
        .iter()
        .any(|r| r.status == ResponseStatus::Error && r.message.contains("step failed")));
}

#[tokio::test]
async fn test_invalid_content_is_reported() {
    let harness = DispatchHarness::new();
    harness.heartbeat("worker1");
    harness.register(vec![submission("r1", "ct1", b"a")]).await;
    harness.take_responses().await;

    harness
        .respond(vec![WorkerResponseEvent::new(
            "r1",
            WorkerResponseStatus::InvalidContent,
        )
        .with_messages(["bad body"])])
        .await;

    let stored = harness.stored("r1").await.unwrap();
    assert_eq!(stored.status, RequestStatus::InvalidContent);
    assert_eq!(stored.error.as_deref(), Some("bad body"));
    let responses = harness.take_responses().await;
    assert_eq!(responses[0].status, ResponseStatus::InvalidContent);
    assert!(responses[0].message.contains("<worker1>"));
}

#[tokio::test]
async fn test_mixed_response_batch() {
    let harness = DispatchHarness::new();
    harness.heartbeat("worker1");
    harness.heartbeat("worker2");
    harness
        .register(vec![
            submission("r1", "ct2", b"a"),
            submission("r2", "ct1", b"b"),
        ])
        .await;
    harness.take_responses().await;

    let report = harness
        .service
        .handle_worker_responses(vec![failure("r1", "boom"), success("r2", b"done")])
        .await
        .unwrap();

    assert_eq!(report.deleted, 2);
    assert!(harness.repository.is_empty().await);
    let mut statuses: Vec<_> = harness
        .take_responses()
        .await
        .into_iter()
        .map(|r| (r.request_id.unwrap(), r.status))
        .collect();
    statuses.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        statuses,
        vec![
            ("r1".to_string(), ResponseStatus::Error),
            ("r2".to_string(), ResponseStatus::Success),
        ]
    );
}

#[tokio::test]
async fn test_responses_for_unknown_requests_are_ignored() {
    let harness = DispatchHarness::new();
    let report = harness
        .service
        .handle_worker_responses(vec![success("ghost", b"x")])
        .await
        .unwrap();

    assert_eq!(report.unknown, 1);
    assert!(harness.repository.is_empty().await);
    assert!(harness.take_responses().await.is_empty());
}

#[tokio::test]
async fn test_dead_letter_fails_dispatched_request() {
    let harness = DispatchHarness::new();
    harness.heartbeat("worker1");
    harness.register(vec![submission("r1", "ct1", b"a")]).await;
    harness.take_responses().await;

    let report = harness
        .service
        .handle_request_errors(vec![WorkerRequestDlqEvent {
            request_id: "r1".to_string(),
            error: Some("exchange unreachable".to_string()),
        }])
        .await
        .unwrap();

    assert_eq!(report.updated, 1);
    let failed = harness.stored("r1").await.unwrap();
    assert_eq!(failed.status, RequestStatus::Error);
    assert_eq!(failed.error.as_deref(), Some("exchange unreachable"));
    assert_eq!(
        harness.take_responses().await[0].status,
        ResponseStatus::Error
    );
}

#[tokio::test]
async fn test_dead_letter_ignores_request_awaiting_dispatch() {
    let harness = DispatchHarness::new();
    let pending = Request::new("r1", "ct1", OWNER, SESSION, b"a".to_vec());
    harness.repository.save_all(vec![pending]).await.unwrap();

    let report = harness
        .service
        .handle_request_errors(vec![WorkerRequestDlqEvent {
            request_id: "r1".to_string(),
            error: None,
        }])
        .await
        .unwrap();

    assert_eq!(report.stale, 1);
    let stored = harness.stored("r1").await.unwrap();
    assert_eq!(stored.status, RequestStatus::ToDispatch);
    assert_eq!(stored.error, None);
    assert!(harness.take_responses().await.is_empty());
}

#[tokio::test]
async fn test_session_events_follow_lifecycle() {
    let harness = DispatchHarness::new();
    let mut events = harness.subscribe_sessions();
    harness.heartbeat("worker1");

    harness.register(vec![submission("r1", "ct1", b"a")]).await;
    harness.respond(vec![success("r1", b"b")]).await;

    let mut received = Vec::new();
    while let Ok(published) = events.try_recv() {
        received.push(published.event);
    }

    match &received[0] {
        SessionEvent::NewRequests(info) => {
            assert_eq!(info.requests.len(), 1);
            assert_eq!(info.requests[0].status, RequestStatus::Dispatched);
        }
        other => panic!("expected NewRequests, got {other:?}"),
    }
    assert!(received.iter().any(|event| matches!(
        event,
        SessionEvent::StatusChanged { before, after }
            if before[0].status == RequestStatus::Dispatched
                && after[0].status == RequestStatus::Success
    )));
    assert!(matches!(received.last(), Some(SessionEvent::Deleted(deleted)) if deleted.len() == 1));
}

#[tokio::test]
async fn test_failed_publish_keeps_request_recorded() {
    let harness = DispatchHarness::new();
    harness.heartbeat("worker1");
    harness
        .messaging
        .fail_queue(&harness.config.queues.exchange_name("worker1"))
        .await;

    harness.register(vec![submission("r1", "ct1", b"a")]).await;

    // The transport dead-letters the undelivered request later on.
    let stored = harness.stored("r1").await.unwrap();
    assert_eq!(stored.status, RequestStatus::Dispatched);
    assert_eq!(harness.messaging.queue_depth(&harness.config.queues.exchange_name("worker1")).await, 0);
}
