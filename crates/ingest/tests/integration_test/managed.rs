use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use kusto_client::ClientError;
use kusto_ingest::{
    DataFormat, IngestError, IngestSource, IngestionPath, IngestionProperties,
    ManagedStreamingOptions,
};

use crate::helpers::*;

const MIB: usize = 1024 * 1024;

fn csv_props() -> IngestionProperties {
    IngestionProperties::new("db", "Events", DataFormat::Csv)
}

fn csv_source(size: usize) -> IngestSource {
    IngestSource::bytes(vec![b'a'; size])
}

#[tokio::test(start_paused = true)]
async fn small_source_streams_on_first_attempt() {
    let h = Harness::new();
    let id = Uuid::new_v4();

    let result = h
        .managed
        .ingest_with_id(csv_source(1024), &csv_props(), id)
        .await
        .unwrap();

    assert_eq!(
        result.path,
        IngestionPath::Streaming {
            response: streaming_ack()
        }
    );
    assert_eq!(result.streaming_attempts, 1);
    assert_eq!(result.source_id, id);
    assert_eq!(
        h.streaming.request_ids(),
        [format!("KNC.executeManagedStreamingIngest;{id};0")]
    );
    assert_eq!(h.blobs.upload_count(), 0);
    assert!(h.queued_messages().is_empty());
    // Streaming never touches resource discovery.
    assert_eq!(h.executor.resource_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_fall_back_to_queue_once() {
    let h = Harness::new();
    for _ in 0..3 {
        h.streaming.push(Err(ClientError::transient("engine busy")));
    }
    let id = Uuid::new_v4();

    let result = h
        .managed
        .ingest_with_id(csv_source(2 * MIB), &csv_props(), id)
        .await
        .unwrap();

    assert!(result.is_queued());
    assert_eq!(result.streaming_attempts, 3);
    assert_eq!(
        h.streaming.request_ids(),
        (0..3)
            .map(|attempt| format!("KNC.executeManagedStreamingIngest;{id};{attempt}"))
            .collect::<Vec<_>>()
    );

    let messages = h.queued_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id(), id);
    assert_eq!(messages[0].raw_data_size(), (2 * MIB) as u64);
    assert_eq!(h.blobs.upload_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn recovers_when_a_retry_succeeds() {
    let h = Harness::new();
    h.streaming.push(Err(ClientError::transient("blip")));
    h.streaming.push(Err(ClientError::throttled("busy")));

    let start = Instant::now();
    let result = h.managed.ingest(csv_source(10), &csv_props()).await.unwrap();

    assert!(matches!(result.path, IngestionPath::Streaming { .. }));
    assert_eq!(result.streaming_attempts, 3);
    assert!(start.elapsed() >= Duration::from_secs(3));
    assert!(h.queued_messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn oversized_source_never_streams() {
    let h = Harness::new();

    let result = h
        .managed
        .ingest(csv_source(5 * MIB), &csv_props())
        .await
        .unwrap();

    assert!(result.is_queued());
    assert_eq!(result.streaming_attempts, 0);
    assert_eq!(h.streaming.request_count(), 0);
    assert_eq!(h.queued_messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn permanent_error_aborts_without_fallback() {
    let h = Harness::new();
    h.streaming
        .push(Err(ClientError::permanent("mapping 'm' not found")));

    let start = Instant::now();
    let err = h
        .managed
        .ingest(csv_source(1024), &csv_props())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Permanent(_)));
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(h.streaming.request_count(), 1);
    assert_eq!(h.blobs.upload_count(), 0);
    assert!(h.queued_messages().is_empty());
    assert_eq!(h.executor.resource_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn large_file_is_queued_without_streaming() {
    let h = Harness::with_streaming_options(ManagedStreamingOptions {
        max_stream_bytes: 1024,
        streaming_attempts: 3,
        backoff_base: Duration::from_secs(1),
        backoff_jitter: Duration::ZERO,
        call_timeout: Duration::from_secs(5),
    });
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("large.csv");
    std::fs::write(&path, vec![b'a'; 4096]).unwrap();
    let id = Uuid::new_v4();

    let result = h
        .managed
        .ingest_with_id(IngestSource::file(&path), &csv_props(), id)
        .await
        .unwrap();

    assert!(result.is_queued());
    assert_eq!(result.streaming_attempts, 0);
    assert_eq!(h.streaming.request_count(), 0);

    let messages = h.queued_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].raw_data_size(), 4096);
    assert!(messages[0]
        .blob_path()
        .contains(&format!("db__Events__{id}__large.csv.gz")));
}

#[tokio::test(start_paused = true)]
async fn streaming_timeout_counts_as_failed_attempt() {
    let h = Harness::with_streaming_options(ManagedStreamingOptions {
        max_stream_bytes: (4 * MIB) as u64,
        streaming_attempts: 2,
        backoff_base: Duration::from_secs(1),
        backoff_jitter: Duration::ZERO,
        call_timeout: Duration::from_secs(5),
    });
    h.streaming.set_delay(Duration::from_secs(60));

    let result = h.managed.ingest(csv_source(100), &csv_props()).await.unwrap();

    assert!(result.is_queued());
    assert_eq!(result.streaming_attempts, 2);
    assert_eq!(h.queued_messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn blob_source_is_queued_directly() {
    let h = Harness::new();
    let uri = "https://external.blob.core.windows.net/data/events.csv.gz?sig=x";

    let result = h
        .managed
        .ingest(IngestSource::blob(uri, Some(4096)), &csv_props())
        .await
        .unwrap();

    assert_eq!(
        result.path,
        IngestionPath::Queued {
            blob_path: uri.to_string()
        }
    );
    assert_eq!(h.streaming.request_count(), 0);
    assert_eq!(h.blobs.upload_count(), 0);

    let messages = h.queued_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].blob_path(), uri);
    assert_eq!(messages[0].raw_data_size(), 4096);
}

#[tokio::test(start_paused = true)]
async fn invalid_properties_fail_before_any_call() {
    let h = Harness::new();
    let props = IngestionProperties::new("db", "Events", DataFormat::Json);

    let err = h.managed.ingest(csv_source(10), &props).await.unwrap_err();

    assert!(matches!(err, IngestError::InvalidProperties(_)));
    assert_eq!(h.streaming.request_count(), 0);
    assert_eq!(h.executor.resource_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn mapping_reference_is_streamed() {
    let h = Harness::new();
    let props = IngestionProperties::new("db", "Events", DataFormat::Json)
        .with_mapping_reference("events_json");

    h.managed
        .ingest(IngestSource::bytes(r#"{"a":1}"#), &props)
        .await
        .unwrap();

    let requests = h.streaming.requests.lock().unwrap();
    assert_eq!(requests[0].format, "json");
    assert_eq!(requests[0].mapping_name.as_deref(), Some("events_json"));
    assert!(!requests[0].compressed);
}

#[tokio::test(start_paused = true)]
async fn cancelled_token_stops_before_streaming() {
    let h = Harness::new();
    let token = CancellationToken::new();
    token.cancel();

    let err = h
        .managed
        .ingest_with_cancellation(csv_source(10), &csv_props(), &token)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Cancelled));
    assert_eq!(h.streaming.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_backoff_skips_fallback() {
    let h = Harness::new();
    for _ in 0..3 {
        h.streaming.push(Err(ClientError::transient("engine busy")));
    }
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        canceller.cancel();
    });

    let err = h
        .managed
        .ingest_with_cancellation(csv_source(10), &csv_props(), &token)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Cancelled));
    assert_eq!(h.streaming.request_count(), 1);
    assert!(h.queued_messages().is_empty());
}
