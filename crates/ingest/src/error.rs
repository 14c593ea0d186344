//! Ingestion error types.
//!
//! Every variant names the phase that failed so a caller gets one
//! aggregated error rather than the individual retries behind it.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use kusto_client::ClientError;
use kusto_core::ResourceKind;
use kusto_queue::QueueError;
use kusto_storage::StorageError;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Resource discovery failed and there was no cached value to fall back on.
    #[error("resource discovery failed during {operation}: {source}")]
    ResourceDiscovery {
        operation: &'static str,
        #[source]
        source: Box<IngestError>,
    },

    /// The service kept throttling until the attempt budget ran out.
    #[error("{operation} still throttled after {attempts} attempts")]
    Throttled {
        operation: &'static str,
        attempts: u32,
    },

    /// The service rejected the request; retrying or falling back cannot help.
    #[error("permanent ingestion failure: {0}")]
    Permanent(#[source] ClientError),

    /// Every candidate container or queue failed in the durable path.
    #[error("all {attempts} {kind} candidates failed: {}", Causes(.causes))]
    ResourcesExhausted {
        kind: ResourceKind,
        attempts: usize,
        causes: Vec<String>,
    },

    /// The service returned a resource set that cannot be used.
    #[error("invalid ingestion resources: {0}")]
    InvalidResources(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("ingestion cancelled")]
    Cancelled,

    #[error("invalid ingestion properties: {0}")]
    InvalidProperties(String),

    #[error("failed to read source: {0}")]
    Source(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("core error: {0}")]
    Core(#[from] kusto_core::CoreError),
}

impl IngestError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, IngestError::Permanent(_))
    }
}

struct Causes<'a>(&'a [String]);

impl fmt::Display for Causes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, cause) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "[{}] {}", i + 1, cause)?;
        }
        Ok(())
    }
}
