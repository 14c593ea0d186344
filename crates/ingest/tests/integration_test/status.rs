use std::sync::Arc;

use kusto_ingest::IngestStatusQueues;
use kusto_queue::{
    FailureMessage, MemoryQueueStore, QueueStore, StatusHeader, StatusMessage, StatusQueueKind,
    SuccessMessage,
};

use crate::helpers::*;

fn header(op: &str) -> StatusHeader {
    StatusHeader {
        operation_id: op.to_string(),
        database: "db".into(),
        table: "Events".into(),
        ingestion_source_id: op.to_string(),
        ingestion_source_path: None,
        root_activity_id: None,
    }
}

#[tokio::test(start_paused = true)]
async fn readers_follow_discovered_queues() {
    let h = Harness::new();
    let status = IngestStatusQueues::new(h.resources.clone(), h.queues.clone());

    let ok = StatusMessage::Success(SuccessMessage {
        header: header("op-ok"),
        succeeded_on: None,
    });
    let failed = StatusMessage::Failure(FailureMessage {
        header: header("op-bad"),
        failed_on: None,
        details: "bad mapping".into(),
        error_code: "BadRequest_MappingReferenceWasNotFound".into(),
        failure_status: "Permanent".into(),
        originates_from_update_policy: false,
        should_retry: false,
    });
    h.queues
        .enqueue(&success_queue(), &ok.encode().unwrap())
        .await
        .unwrap();
    h.queues
        .enqueue(&failure_queue(), &failed.encode().unwrap())
        .await
        .unwrap();

    let success = status.success().await.unwrap();
    assert_eq!(success.kind(), StatusQueueKind::Success);
    assert_eq!(success.peek(10).await.unwrap(), vec![ok.clone()]);

    let failure = status.failure().await.unwrap();
    let popped = failure.pop(10).await.unwrap();
    assert_eq!(popped.len(), 1);
    match &popped[0] {
        StatusMessage::Failure(f) => {
            assert_eq!(f.header.operation_id, "op-bad");
            assert!(!f.should_retry);
        }
        other => panic!("expected failure message, got {other:?}"),
    }
    assert!(failure.is_empty().await.unwrap());
    assert!(!success.is_empty().await.unwrap());

    // One discovery call served both readers.
    assert_eq!(h.executor.resource_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn discovery_failure_reaches_status_caller() {
    let h = Harness::new();
    h.executor.set_failing(true);
    let status = IngestStatusQueues::new(h.resources.clone(), Arc::new(MemoryQueueStore::new()));

    assert!(status.success().await.is_err());
}
