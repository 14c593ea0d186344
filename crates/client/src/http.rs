//! reqwest-backed REST client.
//!
//! One [`KustoHttpClient`] talks to one endpoint. Resource discovery runs
//! against the data-management (`ingest-`) endpoint, streaming ingestion
//! against the engine endpoint, so callers usually build two.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use kusto_core::{IngestConfig, TabularResult};

use crate::auth::{AuthProvider, NoAuthProvider, StaticTokenProvider};
use crate::error::ClientError;
use crate::traits::{CommandExecutor, StreamingIngestor, StreamingRequest};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CLIENT_APP_NAME: &str = "kusto-ingest-rs";

pub struct KustoHttpClient {
    client: reqwest::Client,
    base_url: String,
    auth: Arc<dyn AuthProvider>,
    timeout: Duration,
}

impl KustoHttpClient {
    pub fn new(base_url: impl Into<String>, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Client for the engine endpoint (streaming ingestion).
    pub fn engine_from_config(config: &IngestConfig) -> Result<Self, ClientError> {
        let url = config
            .engine_url
            .as_deref()
            .ok_or_else(|| ClientError::NotConfigured("KUSTO_ENGINE_URL not set".into()))?;
        Ok(Self::new(url, auth_from_config(config)).with_timeout(config.call_timeout()))
    }

    /// Client for the data-management endpoint (resource discovery).
    pub fn ingest_from_config(config: &IngestConfig) -> Result<Self, ClientError> {
        let url = config
            .ingest_url
            .as_deref()
            .ok_or_else(|| ClientError::NotConfigured("KUSTO_INGEST_URL not set".into()))?;
        Ok(Self::new(url, auth_from_config(config)).with_timeout(config.call_timeout()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn streaming_url(&self, request: &StreamingRequest) -> Result<reqwest::Url, ClientError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ClientError::NotConfigured(format!("invalid base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::NotConfigured("base URL cannot have a path".into()))?
            .extend(["v1", "rest", "ingest", &request.database, &request.table]);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("streamFormat", &request.format);
            if let Some(mapping) = &request.mapping_name {
                query.append_pair("mappingName", mapping);
            }
        }
        Ok(url)
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        client_request_id: &str,
    ) -> Result<TabularResult, ClientError> {
        let mut builder = builder
            .timeout(self.timeout)
            .header("x-ms-client-request-id", client_request_id)
            .header("x-ms-app", CLIENT_APP_NAME);
        if let Some(header) = self.auth.auth_header().await? {
            builder = builder.header("Authorization", header);
        }

        let response = builder.send().await.map_err(|e| self.map_transport(e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.map_transport(e))?;

        if !(200..300).contains(&status) {
            return Err(ClientError::from_response(status, body));
        }
        if body.trim().is_empty() {
            return Ok(TabularResult::default());
        }
        Ok(TabularResult::from_v1_response(&body)?)
    }

    fn map_transport(&self, e: reqwest::Error) -> ClientError {
        if e.is_timeout() {
            ClientError::Timeout(self.timeout)
        } else {
            ClientError::Transport(e)
        }
    }
}

fn auth_from_config(config: &IngestConfig) -> Arc<dyn AuthProvider> {
    match &config.auth_token {
        Some(token) => Arc::new(StaticTokenProvider::new(token.clone())),
        None => Arc::new(NoAuthProvider),
    }
}

#[async_trait]
impl CommandExecutor for KustoHttpClient {
    async fn execute(&self, database: &str, command: &str) -> Result<TabularResult, ClientError> {
        let url = format!("{}/v1/rest/mgmt", self.base_url);
        let request_id = format!("KIRS.execute;{}", Uuid::new_v4());
        debug!(url = %url, database, command, "Executing management command");

        let builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json; charset=utf-8")
            .json(&json!({ "db": database, "csl": command }));
        self.send(builder, &request_id).await
    }
}

#[async_trait]
impl StreamingIngestor for KustoHttpClient {
    async fn ingest_stream(&self, request: StreamingRequest) -> Result<TabularResult, ClientError> {
        let url = self.streaming_url(&request)?;
        debug!(
            url = %url,
            bytes = request.data.len(),
            request_id = %request.client_request_id,
            "Streaming ingest request"
        );

        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/octet-stream")
            .body(request.data.clone());
        if request.compressed {
            builder = builder.header("Content-Encoding", "gzip");
        }
        self.send(builder, &request.client_request_id).await
    }
}
