use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use kusto_core::TabularResult;

use crate::error::ClientError;

/// Runs management commands against a database.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute `command` in `database` and return the primary result table.
    async fn execute(&self, database: &str, command: &str) -> Result<TabularResult, ClientError>;
}

/// Blanket implementation so `Arc<dyn CommandExecutor>` can be used directly.
#[async_trait]
impl<T: CommandExecutor + ?Sized> CommandExecutor for Arc<T> {
    async fn execute(&self, database: &str, command: &str) -> Result<TabularResult, ClientError> {
        (**self).execute(database, command).await
    }
}

/// One streaming ingestion call.
#[derive(Debug, Clone)]
pub struct StreamingRequest {
    pub database: String,
    pub table: String,
    /// Wire name of the data format (`csv`, `json`, ...).
    pub format: String,
    pub mapping_name: Option<String>,
    pub data: Bytes,
    /// Whether `data` is gzip-compressed.
    pub compressed: bool,
    /// Correlation id sent as `x-ms-client-request-id`.
    pub client_request_id: String,
}

/// Low-latency direct ingestion into the engine.
#[async_trait]
pub trait StreamingIngestor: Send + Sync {
    async fn ingest_stream(&self, request: StreamingRequest) -> Result<TabularResult, ClientError>;
}

#[async_trait]
impl<T: StreamingIngestor + ?Sized> StreamingIngestor for Arc<T> {
    async fn ingest_stream(&self, request: StreamingRequest) -> Result<TabularResult, ClientError> {
        (**self).ingest_stream(request).await
    }
}
