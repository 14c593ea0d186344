pub mod backoff;
pub mod envelope;
pub mod error;
pub mod managed;
pub mod outcome;
pub mod properties;
pub mod queued;
pub mod ranking;
pub mod resources;
pub mod source;
pub mod status;

use std::sync::Arc;

use tracing::info;

use kusto_client::{ClientError, CommandExecutor, KustoHttpClient, StreamingIngestor};
use kusto_core::IngestConfig;
use kusto_queue::QueueStore;
use kusto_storage::BlobStore;

pub use backoff::BackoffPolicy;
pub use envelope::IngestionMessageEnvelope;
pub use error::IngestError;
pub use managed::{ManagedStreamingIngestor, ManagedStreamingOptions};
pub use outcome::{IngestionPath, IngestionResult};
pub use properties::{DataFormat, IngestionProperties, ReportLevel, ReportMethod};
pub use queued::{QueuedIngestor, QueuedIngestorOptions};
pub use ranking::{AccountReliability, RankedAccountSelector};
pub use resources::{ResourceBundle, ResourceCache, ResourceCacheOptions};
pub use source::IngestSource;
pub use status::IngestStatusQueues;

/// Everything needed to ingest against one cluster, wired from config.
///
/// The resource cache and account ranking are shared by the queued path,
/// the managed streaming path and the status readers.
pub struct IngestClient {
    pub resources: Arc<ResourceCache>,
    pub queued: Arc<QueuedIngestor>,
    pub managed: ManagedStreamingIngestor,
    pub status: IngestStatusQueues,
}

impl IngestClient {
    /// Build HTTP clients for both endpoints from config.
    ///
    /// Blob and queue access are supplied by the caller.
    pub fn from_config(
        config: &IngestConfig,
        blobs: Arc<dyn BlobStore>,
        queues: Arc<dyn QueueStore>,
    ) -> Result<Self, ClientError> {
        let dm = Arc::new(KustoHttpClient::ingest_from_config(config)?);
        let engine = Arc::new(KustoHttpClient::engine_from_config(config)?);
        info!(
            engine = engine.base_url(),
            ingest = dm.base_url(),
            "Ingest client configured"
        );
        Ok(Self::new(config, dm, engine, blobs, queues))
    }

    pub fn new(
        config: &IngestConfig,
        executor: Arc<dyn CommandExecutor>,
        streaming: Arc<dyn StreamingIngestor>,
        blobs: Arc<dyn BlobStore>,
        queues: Arc<dyn QueueStore>,
    ) -> Self {
        let resources = Arc::new(ResourceCache::new(
            executor,
            Arc::new(RankedAccountSelector::new()),
            ResourceCacheOptions::from_config(config),
        ));
        let queued = Arc::new(QueuedIngestor::new(
            resources.clone(),
            blobs,
            queues.clone(),
            QueuedIngestorOptions::from_config(config),
        ));
        let managed = ManagedStreamingIngestor::new(
            streaming,
            queued.clone(),
            ManagedStreamingOptions::from_config(config),
        );
        let status = IngestStatusQueues::new(resources.clone(), queues);
        Self {
            resources,
            queued,
            managed,
            status,
        }
    }
}
