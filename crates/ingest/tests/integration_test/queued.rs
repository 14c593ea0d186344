use std::io::Read;

use flate2::read::GzDecoder;
use object_store::path::Path;
use object_store::ObjectStore;
use uuid::Uuid;

use kusto_core::ResourceKind;
use kusto_ingest::{
    DataFormat, IngestError, IngestSource, IngestionPath, IngestionProperties, ReportLevel,
    ReportMethod,
};

use crate::helpers::*;

fn props() -> IngestionProperties {
    IngestionProperties::new("db", "Events", DataFormat::Csv)
        .with_report(ReportLevel::FailuresAndSuccesses, ReportMethod::Queue)
}

#[tokio::test(start_paused = true)]
async fn stages_gzipped_blob_and_queues_message() {
    let h = Harness::new();
    let id = Uuid::new_v4();
    let data = "a,b\n1,2\n";

    let result = h
        .queued
        .ingest_with_id(IngestSource::bytes(data), &props(), id)
        .await
        .unwrap();

    let blob_path = match &result.path {
        IngestionPath::Queued { blob_path } => blob_path.clone(),
        other => panic!("expected queued path, got {other:?}"),
    };
    let blob_name = format!("db__Events__{id}__stream.csv.gz");
    assert!(blob_path.contains(&blob_name), "{blob_path}");
    assert!(blob_path.contains("?sig="), "blob URI keeps the access signature");

    // The blob landed in whichever container was ranked first.
    let container = if blob_path.contains("acct1") { "tmp1" } else { "tmp2" };
    let stored = h
        .blobs
        .memory
        .get(&Path::from(format!("{container}/{blob_name}")))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    let mut text = String::new();
    GzDecoder::new(&stored[..]).read_to_string(&mut text).unwrap();
    assert_eq!(text, data);

    let messages = h.queued_messages();
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert_eq!(message.id(), id);
    assert_eq!(message.blob_path(), blob_path);
    assert_eq!(message.raw_data_size(), data.len() as u64);
    assert_eq!(message.database_name(), "db");
    assert_eq!(message.table_name(), "Events");
    assert_eq!(message.additional_properties()["authorizationContext"], AUTH_CONTEXT);
    assert_eq!(message.additional_properties()["format"], "csv");
}

#[tokio::test(start_paused = true)]
async fn failed_container_moves_to_next_account() {
    let h = Harness::new();
    h.blobs.fail_account("acct1");

    for _ in 0..5 {
        h.queued
            .ingest(IngestSource::bytes("x\n"), &props())
            .await
            .unwrap();
    }

    assert_eq!(h.blobs.upload_count(), 5);
    assert!(h
        .blobs
        .uploads
        .lock()
        .unwrap()
        .iter()
        .all(|uri| uri.contains("acct2")));

    // After one failure acct1 drops to the bottom tier and is not tried first again.
    let acct1 = h.selector.reliability("acct1").unwrap();
    assert!(acct1.failure_count <= 1);
    let acct2 = h.selector.reliability("acct2").unwrap();
    assert!(acct2.success_count >= 5);
}

#[tokio::test(start_paused = true)]
async fn all_containers_failing_is_fatal() {
    let h = Harness::new();
    h.blobs.fail_account("acct1");
    h.blobs.fail_account("acct2");

    let err = h
        .queued
        .ingest(IngestSource::bytes("x\n"), &props())
        .await
        .unwrap_err();

    match err {
        IngestError::ResourcesExhausted {
            kind,
            attempts,
            causes,
        } => {
            assert_eq!(kind, ResourceKind::Container);
            assert_eq!(attempts, 2);
            assert_eq!(causes.len(), 2);
            assert!(causes.iter().any(|c| c.contains("acct1")));
            assert!(causes.iter().any(|c| c.contains("acct2")));
        }
        other => panic!("expected exhausted containers, got {other:?}"),
    }
    assert!(h.queued_messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_queue_moves_to_next_queue() {
    let h = Harness::new();
    let queues = ingestion_queues();
    h.queues.fail_queue(&queues[0]);

    h.queued
        .ingest(IngestSource::bytes("x\n"), &props())
        .await
        .unwrap();

    assert_eq!(h.queues.len(&queues[1]), 1);
}

#[tokio::test(start_paused = true)]
async fn all_queues_failing_is_fatal() {
    let h = Harness::new();
    for q in ingestion_queues() {
        h.queues.fail_queue(&q);
    }

    let err = h
        .queued
        .ingest(IngestSource::bytes("x\n"), &props())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::ResourcesExhausted {
            kind: ResourceKind::Queue,
            attempts: 2,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn binary_formats_are_not_recompressed() {
    let h = Harness::new();
    let id = Uuid::new_v4();
    let props = IngestionProperties::new("db", "Events", DataFormat::Parquet);

    h.queued
        .ingest_with_id(IngestSource::bytes(vec![0x50u8, 0x41, 0x52, 0x31]), &props, id)
        .await
        .unwrap();

    let messages = h.queued_messages();
    assert!(messages[0]
        .blob_path()
        .contains(&format!("db__Events__{id}__stream.parquet?")));
    assert_eq!(messages[0].raw_data_size(), 4);
}

#[tokio::test(start_paused = true)]
async fn file_source_is_read_from_disk() {
    let h = Harness::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daily.csv");
    std::fs::write(&path, "a\nb\nc\n").unwrap();
    let id = Uuid::new_v4();

    h.queued
        .ingest_with_id(IngestSource::file(&path), &props(), id)
        .await
        .unwrap();

    let messages = h.queued_messages();
    assert!(messages[0]
        .blob_path()
        .contains(&format!("db__Events__{id}__daily.csv.gz")));
    assert_eq!(messages[0].raw_data_size(), 6);
}

#[tokio::test(start_paused = true)]
async fn discovery_failure_surfaces_before_upload() {
    let h = Harness::new();
    h.executor.set_failing(true);

    let err = h
        .queued
        .ingest(IngestSource::bytes("x\n"), &props())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::ResourceDiscovery { .. }));
    assert_eq!(h.blobs.upload_count(), 0);
}
