//! Managed streaming ingestion.
//!
//! Small payloads are streamed straight into the engine, retried with
//! backoff on transient failures, and queued through [`QueuedIngestor`]
//! once the streaming attempts run out. Large payloads go to the queue
//! directly. A permanent streaming error ends the request at once: the
//! durable path would be rejected for the same reason.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kusto_client::{StreamingIngestor, StreamingRequest};
use kusto_core::{IngestConfig, TabularResult};

use crate::backoff::BackoffPolicy;
use crate::error::IngestError;
use crate::outcome::{IngestionPath, IngestionResult};
use crate::properties::IngestionProperties;
use crate::queued::QueuedIngestor;
use crate::source::{IngestSource, Packing, Payload};

const CLIENT_REQUEST_PREFIX: &str = "KNC.executeManagedStreamingIngest";

#[derive(Debug, Clone)]
pub struct ManagedStreamingOptions {
    /// Payloads larger than this skip streaming.
    pub max_stream_bytes: u64,
    pub streaming_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_jitter: Duration,
    /// Upper bound on each streaming call.
    pub call_timeout: Duration,
}

impl Default for ManagedStreamingOptions {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

impl ManagedStreamingOptions {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_stream_bytes: config.streaming_max_bytes,
            streaming_attempts: config.streaming_attempts,
            backoff_base: Duration::from_secs_f64(config.backoff_base_secs.max(0.0)),
            backoff_jitter: Duration::from_secs_f64(config.backoff_jitter_secs.max(0.0)),
            call_timeout: config.call_timeout(),
        }
    }
}

pub struct ManagedStreamingIngestor {
    streaming: Arc<dyn StreamingIngestor>,
    queued: Arc<QueuedIngestor>,
    options: ManagedStreamingOptions,
}

impl ManagedStreamingIngestor {
    pub fn new(
        streaming: Arc<dyn StreamingIngestor>,
        queued: Arc<QueuedIngestor>,
        options: ManagedStreamingOptions,
    ) -> Self {
        Self {
            streaming,
            queued,
            options,
        }
    }

    pub fn queued(&self) -> &Arc<QueuedIngestor> {
        &self.queued
    }

    pub async fn ingest(
        &self,
        source: IngestSource,
        properties: &IngestionProperties,
    ) -> Result<IngestionResult, IngestError> {
        self.ingest_with_id(source, properties, Uuid::new_v4()).await
    }

    /// Like [`ingest`](Self::ingest), but gives up with
    /// [`IngestError::Cancelled`] as soon as `token` is cancelled.
    ///
    /// A message already placed on a queue stays there.
    pub async fn ingest_with_cancellation(
        &self,
        source: IngestSource,
        properties: &IngestionProperties,
        token: &CancellationToken,
    ) -> Result<IngestionResult, IngestError> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!("Ingestion cancelled by caller");
                Err(IngestError::Cancelled)
            }
            result = self.ingest(source, properties) => result,
        }
    }

    pub async fn ingest_with_id(
        &self,
        source: IngestSource,
        properties: &IngestionProperties,
        source_id: Uuid,
    ) -> Result<IngestionResult, IngestError> {
        properties.validate()?;

        let payload = match Payload::load(&source, self.options.max_stream_bytes).await? {
            Some(payload) => payload,
            None => return self.queued.ingest_with_id(source, properties, source_id).await,
        };

        let mut attempts = 0;
        match self.streamable(&payload, properties) {
            Err(reason) => {
                debug!(source_id = %source_id, reason, "Skipping streaming ingestion");
            }
            Ok(data) => {
                attempts = match self.stream(source_id, data, &payload, properties).await? {
                    StreamOutcome::Ingested { attempts, response } => {
                        return Ok(IngestionResult {
                            source_id,
                            path: IngestionPath::Streaming { response },
                            streaming_attempts: attempts,
                        })
                    }
                    StreamOutcome::Exhausted(attempts) => attempts,
                };
                info!(
                    source_id = %source_id,
                    attempts,
                    "Streaming attempts exhausted; falling back to queued ingestion"
                );
            }
        }

        let blob_path = self
            .queued
            .ingest_payload(source_id, &payload, properties)
            .await?;
        Ok(IngestionResult {
            source_id,
            path: IngestionPath::Queued { blob_path },
            streaming_attempts: attempts,
        })
    }

    /// The bytes to stream, or why this payload goes to the queue instead.
    fn streamable<'p>(
        &self,
        payload: &'p Payload,
        properties: &IngestionProperties,
    ) -> Result<&'p Bytes, &'static str> {
        let data = match payload.in_memory_bytes() {
            Some(data) if payload.len() <= self.options.max_stream_bytes => data,
            _ => return Err("payload exceeds streaming size limit"),
        };
        if payload.packing == Packing::Zip {
            Err("zip payloads cannot be streamed")
        } else if properties.mapping.is_some() && properties.mapping_reference.is_none() {
            Err("inline mappings cannot be streamed")
        } else {
            Ok(data)
        }
    }

    async fn stream(
        &self,
        source_id: Uuid,
        data: &Bytes,
        payload: &Payload,
        properties: &IngestionProperties,
    ) -> Result<StreamOutcome, IngestError> {
        let mut policy = BackoffPolicy::new(
            self.options.streaming_attempts,
            self.options.backoff_base,
            self.options.backoff_jitter,
        );
        let mut made = 0;

        while policy.should_try() {
            let attempt = policy.current_attempt();
            let request = StreamingRequest {
                database: properties.database.clone(),
                table: properties.table.clone(),
                format: properties.format.as_str().to_string(),
                mapping_name: properties.mapping_reference.clone(),
                data: data.clone(),
                compressed: payload.packing == Packing::Gzip,
                client_request_id: format!("{CLIENT_REQUEST_PREFIX};{source_id};{attempt}"),
            };
            made += 1;

            let call = self.streaming.ingest_stream(request);
            match tokio::time::timeout(self.options.call_timeout, call).await {
                Ok(Ok(response)) => {
                    info!(
                        source_id = %source_id,
                        database = %properties.database,
                        table = %properties.table,
                        attempt,
                        "Streaming ingestion succeeded"
                    );
                    return Ok(StreamOutcome::Ingested {
                        attempts: made,
                        response,
                    });
                }
                Ok(Err(err)) if err.is_permanent() => {
                    warn!(source_id = %source_id, attempt, error = %err, "Streaming ingestion rejected");
                    return Err(IngestError::Permanent(err));
                }
                Ok(Err(err)) => {
                    warn!(
                        source_id = %source_id,
                        attempt,
                        kind = %err.kind(),
                        error = %err,
                        "Streaming ingestion failed"
                    );
                }
                Err(_) => {
                    warn!(
                        source_id = %source_id,
                        attempt,
                        timeout_secs = self.options.call_timeout.as_secs_f64(),
                        "Streaming ingestion timed out"
                    );
                }
            }
            policy.backoff().await;
        }

        Ok(StreamOutcome::Exhausted(made))
    }
}

enum StreamOutcome {
    Ingested {
        attempts: u32,
        response: TabularResult,
    },
    Exhausted(u32),
}
