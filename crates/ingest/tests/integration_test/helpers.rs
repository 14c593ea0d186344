use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::memory::InMemory;
use serde_json::json;

use kusto_client::{ClientError, CommandExecutor, StreamingIngestor, StreamingRequest};
use kusto_core::{ResourceDescriptor, TabularResult};
use kusto_ingest::{
    IngestionMessageEnvelope, ManagedStreamingIngestor, ManagedStreamingOptions, QueuedIngestor,
    QueuedIngestorOptions, RankedAccountSelector, ResourceCache, ResourceCacheOptions,
};
use kusto_queue::MemoryQueueStore;
use kusto_storage::{BlobStore, ObjectStoreBlobStore, StorageError};

pub const AUTH_CONTEXT: &str = "test-auth-context";

pub fn descriptor(uri: &str) -> ResourceDescriptor {
    ResourceDescriptor::parse(uri).unwrap()
}

pub fn ingestion_queues() -> Vec<ResourceDescriptor> {
    vec![
        descriptor("https://acct1.queue.core.windows.net/readyforaggregation-secured?sig=q1"),
        descriptor("https://acct2.queue.core.windows.net/readyforaggregation-secured?sig=q2"),
    ]
}

pub fn containers() -> Vec<ResourceDescriptor> {
    vec![
        descriptor("https://acct1.blob.core.windows.net/tmp1?sig=c1"),
        descriptor("https://acct2.blob.core.windows.net/tmp2?sig=c2"),
    ]
}

pub fn success_queue() -> ResourceDescriptor {
    descriptor("https://acct1.queue.core.windows.net/successfulingestions?sig=s")
}

pub fn failure_queue() -> ResourceDescriptor {
    descriptor("https://acct1.queue.core.windows.net/failedingestions?sig=f")
}

/// `.get ingestion resources` output for two storage accounts.
pub fn resources_table() -> TabularResult {
    let mut rows = Vec::new();
    for q in ingestion_queues() {
        rows.push(vec![json!("SecuredReadyForAggregationQueue"), json!(q.uri())]);
    }
    for c in containers() {
        rows.push(vec![json!("TempStorage"), json!(c.uri())]);
    }
    rows.push(vec![json!("SuccessfulIngestionsQueue"), json!(success_queue().uri())]);
    rows.push(vec![json!("FailedIngestionsQueue"), json!(failure_queue().uri())]);
    rows.push(vec![
        json!("IngestionsStatusTable"),
        json!("https://acct1.table.core.windows.net/ingestionsstatus?sig=t"),
    ]);
    TabularResult::new(&["ResourceTypeName", "StorageRoot"], rows)
}

/// Command executor answering the two discovery commands.
pub struct FakeExecutor {
    resources: Mutex<TabularResult>,
    scripted_errors: Mutex<VecDeque<ClientError>>,
    failing: AtomicBool,
    delay: Mutex<Duration>,
    pub resource_calls: AtomicUsize,
    pub identity_calls: AtomicUsize,
}

impl FakeExecutor {
    pub fn new(resources: TabularResult) -> Self {
        Self {
            resources: Mutex::new(resources),
            scripted_errors: Mutex::new(VecDeque::new()),
            failing: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            resource_calls: AtomicUsize::new(0),
            identity_calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next call with `err`.
    pub fn push_error(&self, err: ClientError) {
        self.scripted_errors.lock().unwrap().push_back(err);
    }

    /// Fail every call with a transient error while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_resources(&self, resources: TabularResult) {
        *self.resources.lock().unwrap() = resources;
    }

    pub fn resource_calls(&self) -> usize {
        self.resource_calls.load(Ordering::SeqCst)
    }

    pub fn identity_calls(&self) -> usize {
        self.identity_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn execute(&self, database: &str, command: &str) -> Result<TabularResult, ClientError> {
        assert_eq!(database, "NetDefaultDB");
        let is_resources = command.starts_with(".get ingestion resources");
        if is_resources {
            self.resource_calls.fetch_add(1, Ordering::SeqCst);
        } else {
            self.identity_calls.fetch_add(1, Ordering::SeqCst);
        }

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(ClientError::transient("service unavailable"));
        }
        if let Some(err) = self.scripted_errors.lock().unwrap().pop_front() {
            return Err(err);
        }

        if is_resources {
            Ok(self.resources.lock().unwrap().clone())
        } else {
            Ok(TabularResult::new(
                &["AuthorizationContext"],
                vec![vec![json!(AUTH_CONTEXT)]],
            ))
        }
    }
}

/// What [`ScriptedStreaming`] answers on success.
pub fn streaming_ack() -> TabularResult {
    TabularResult::new(&["ConsumedRecordsCount"], vec![vec![json!(1)]])
}

/// Streaming endpoint that replays scripted outcomes, then succeeds.
#[derive(Default)]
pub struct ScriptedStreaming {
    outcomes: Mutex<VecDeque<Result<(), ClientError>>>,
    delay: Mutex<Duration>,
    pub requests: Mutex<Vec<StreamingRequest>>,
}

impl ScriptedStreaming {
    pub fn push(&self, outcome: Result<(), ClientError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn request_ids(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.client_request_id.clone())
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl StreamingIngestor for ScriptedStreaming {
    async fn ingest_stream(&self, request: StreamingRequest) -> Result<TabularResult, ClientError> {
        self.requests.lock().unwrap().push(request);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.outcomes.lock().unwrap().pop_front() {
            Some(Err(err)) => Err(err),
            _ => Ok(streaming_ack()),
        }
    }
}

/// In-memory blob store that can refuse uploads to chosen accounts.
pub struct FlakyBlobs {
    inner: ObjectStoreBlobStore,
    pub memory: Arc<InMemory>,
    failing_accounts: Mutex<HashSet<String>>,
    pub uploads: Mutex<Vec<String>>,
}

impl FlakyBlobs {
    pub fn new() -> Self {
        let memory = Arc::new(InMemory::new());
        Self {
            inner: ObjectStoreBlobStore::fixed(memory.clone()),
            memory,
            failing_accounts: Mutex::new(HashSet::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_account(&self, account: &str) {
        self.failing_accounts
            .lock()
            .unwrap()
            .insert(account.to_string());
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobStore for FlakyBlobs {
    async fn upload(
        &self,
        container: &ResourceDescriptor,
        blob_name: &str,
        data: Bytes,
    ) -> Result<String, StorageError> {
        if self
            .failing_accounts
            .lock()
            .unwrap()
            .contains(container.account_name())
        {
            return Err(StorageError::Other(format!(
                "account {} unavailable",
                container.account_name()
            )));
        }
        let uri = self.inner.upload(container, blob_name, data).await?;
        self.uploads.lock().unwrap().push(uri.clone());
        Ok(uri)
    }
}

/// Route logs through the test harness so they show only for failing tests.
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn cache_options() -> ResourceCacheOptions {
    ResourceCacheOptions {
        refresh_ttl: Duration::from_secs(3600),
        failure_ttl: Duration::from_secs(600),
        call_timeout: Duration::from_secs(5),
        throttle_attempts: 3,
        backoff_base: Duration::from_secs(1),
        backoff_jitter: Duration::ZERO,
    }
}

pub struct Harness {
    pub executor: Arc<FakeExecutor>,
    pub streaming: Arc<ScriptedStreaming>,
    pub blobs: Arc<FlakyBlobs>,
    pub queues: Arc<MemoryQueueStore>,
    pub selector: Arc<RankedAccountSelector>,
    pub resources: Arc<ResourceCache>,
    pub queued: Arc<QueuedIngestor>,
    pub managed: ManagedStreamingIngestor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_streaming_options(ManagedStreamingOptions {
            max_stream_bytes: 4 * 1024 * 1024,
            streaming_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_jitter: Duration::ZERO,
            call_timeout: Duration::from_secs(5),
        })
    }

    pub fn with_streaming_options(options: ManagedStreamingOptions) -> Self {
        init_test_tracing();

        let executor = Arc::new(FakeExecutor::new(resources_table()));
        let streaming = Arc::new(ScriptedStreaming::default());
        let blobs = Arc::new(FlakyBlobs::new());
        let queues = Arc::new(MemoryQueueStore::new());
        let selector = Arc::new(RankedAccountSelector::new());
        let resources = Arc::new(ResourceCache::new(
            executor.clone(),
            selector.clone(),
            cache_options(),
        ));
        let queued = Arc::new(QueuedIngestor::new(
            resources.clone(),
            blobs.clone(),
            queues.clone(),
            QueuedIngestorOptions {
                max_retries: 3,
                call_timeout: Duration::from_secs(5),
            },
        ));
        let managed = ManagedStreamingIngestor::new(streaming.clone(), queued.clone(), options);

        Self {
            executor,
            streaming,
            blobs,
            queues,
            selector,
            resources,
            queued,
            managed,
        }
    }

    /// Every ingestion message on the ingestion queues, decoded.
    pub fn queued_messages(&self) -> Vec<IngestionMessageEnvelope> {
        ingestion_queues()
            .iter()
            .flat_map(|q| self.queues.message_texts(q))
            .map(|text| IngestionMessageEnvelope::decode(&text).unwrap())
            .collect()
    }
}
