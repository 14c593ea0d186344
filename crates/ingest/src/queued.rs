//! Durable ingestion: stage the data in a blob container, then post an
//! ingestion message to a queue the service drains.
//!
//! Both steps walk the ranked resource list, moving to the next container
//! or queue after each failure and feeding every outcome back into the
//! account ranking.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kusto_core::{IngestConfig, ResourceDescriptor, ResourceKind};
use kusto_queue::QueueStore;
use kusto_storage::BlobStore;

use crate::envelope::IngestionMessageEnvelope;
use crate::error::IngestError;
use crate::outcome::{IngestionPath, IngestionResult};
use crate::properties::IngestionProperties;
use crate::resources::ResourceCache;
use crate::source::{IngestSource, Payload};

#[derive(Debug, Clone)]
pub struct QueuedIngestorOptions {
    /// Most containers (and, separately, queues) tried per request.
    pub max_retries: u32,
    /// Upper bound on each upload and enqueue call.
    pub call_timeout: Duration,
}

impl Default for QueuedIngestorOptions {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

impl QueuedIngestorOptions {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_retries: config.durable_max_retries.max(1),
            call_timeout: config.call_timeout(),
        }
    }
}

pub struct QueuedIngestor {
    resources: Arc<ResourceCache>,
    blobs: Arc<dyn BlobStore>,
    queues: Arc<dyn QueueStore>,
    options: QueuedIngestorOptions,
}

impl QueuedIngestor {
    pub fn new(
        resources: Arc<ResourceCache>,
        blobs: Arc<dyn BlobStore>,
        queues: Arc<dyn QueueStore>,
        options: QueuedIngestorOptions,
    ) -> Self {
        Self {
            resources,
            blobs,
            queues,
            options,
        }
    }

    pub fn resources(&self) -> &Arc<ResourceCache> {
        &self.resources
    }

    pub async fn ingest(
        &self,
        source: IngestSource,
        properties: &IngestionProperties,
    ) -> Result<IngestionResult, IngestError> {
        self.ingest_with_id(source, properties, Uuid::new_v4()).await
    }

    /// Queue `source` for ingestion under a caller-chosen source id.
    ///
    /// Returns once the message is on a queue; the data becomes queryable
    /// only after the service processes it.
    pub async fn ingest_with_id(
        &self,
        source: IngestSource,
        properties: &IngestionProperties,
        source_id: Uuid,
    ) -> Result<IngestionResult, IngestError> {
        properties.validate()?;

        let blob_path = match (&source, Payload::load(&source, 0).await?) {
            (IngestSource::Blob { uri, raw_size }, _) => {
                self.enqueue(source_id, uri, raw_size.unwrap_or(0), properties)
                    .await?;
                uri.clone()
            }
            (_, Some(payload)) => self.ingest_payload(source_id, &payload, properties).await?,
            (_, None) => {
                return Err(IngestError::InvalidProperties(
                    "source produced no payload".into(),
                ))
            }
        };

        Ok(IngestionResult {
            source_id,
            path: IngestionPath::Queued { blob_path },
            streaming_attempts: 0,
        })
    }

    /// Upload an already loaded payload and queue it. Returns the blob URI.
    pub(crate) async fn ingest_payload(
        &self,
        source_id: Uuid,
        payload: &Payload,
        properties: &IngestionProperties,
    ) -> Result<String, IngestError> {
        let (data, gzipped) = payload.for_upload(properties.format).await?;
        let blob_name = payload.blob_name(
            &properties.database,
            &properties.table,
            source_id,
            properties.format,
            gzipped,
        );

        let blob_uri = self.upload(&blob_name, data).await?;
        self.enqueue(source_id, &blob_uri, payload.raw_size(), properties)
            .await?;
        Ok(blob_uri)
    }

    async fn upload(&self, blob_name: &str, data: Bytes) -> Result<String, IngestError> {
        let containers = self.resources.get_containers().await?;
        let size = data.len();
        let uri = self
            .try_ranked(&containers, ResourceKind::Container, |container| {
                let data = data.clone();
                async move {
                    self.blobs
                        .upload(container, blob_name, data)
                        .await
                        .map_err(IngestError::from)
                }
            })
            .await?;
        debug!(blob = blob_name, bytes = size, "Uploaded staging blob");
        Ok(uri)
    }

    async fn enqueue(
        &self,
        source_id: Uuid,
        blob_uri: &str,
        raw_size: u64,
        properties: &IngestionProperties,
    ) -> Result<(), IngestError> {
        let auth_context = self.resources.get_authorization_context().await?;
        let message = IngestionMessageEnvelope::new(
            source_id,
            blob_uri,
            raw_size,
            properties,
            &auth_context,
        )?
        .encode()?;

        let queues = self.resources.get_ingestion_queues().await?;
        self.try_ranked(&queues, ResourceKind::Queue, |queue| {
            let message = &message;
            async move {
                self.queues
                    .enqueue(queue, message)
                    .await
                    .map_err(IngestError::from)
            }
        })
        .await?;

        info!(
            source_id = %source_id,
            database = %properties.database,
            table = %properties.table,
            raw_size,
            "Queued ingestion message"
        );
        Ok(())
    }

    /// Run `op` against candidates in ranked order until one succeeds.
    async fn try_ranked<'a, T, F, Fut>(
        &self,
        candidates: &'a [ResourceDescriptor],
        kind: ResourceKind,
        mut op: F,
    ) -> Result<T, IngestError>
    where
        F: FnMut(&'a ResourceDescriptor) -> Fut,
        Fut: Future<Output = Result<T, IngestError>>,
    {
        let attempts = (self.options.max_retries as usize).min(candidates.len());
        if attempts == 0 {
            return Err(IngestError::InvalidResources(format!("no {kind} available")));
        }

        let selector = self.resources.selector();
        let mut causes = Vec::with_capacity(attempts);

        for candidate in candidates.iter().take(attempts) {
            let outcome = tokio::time::timeout(self.options.call_timeout, op(candidate)).await;
            let cause = match outcome {
                Ok(Ok(value)) => {
                    selector.report_outcome(candidate.account_name(), true);
                    return Ok(value);
                }
                Ok(Err(err)) => err.to_string(),
                Err(_) => format!("timed out after {:?}", self.options.call_timeout),
            };
            selector.report_outcome(candidate.account_name(), false);
            warn!(%kind, resource = %candidate, error = %cause, "Durable write failed; trying next");
            causes.push(format!("{candidate}: {cause}"));
        }

        Err(IngestError::ResourcesExhausted {
            kind,
            attempts,
            causes,
        })
    }
}
