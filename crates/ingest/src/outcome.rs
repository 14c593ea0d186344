use std::fmt;

use uuid::Uuid;

use kusto_core::TabularResult;

/// Which path accepted the data.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestionPath {
    /// Ingested synchronously by the engine; `response` is what it returned.
    Streaming { response: TabularResult },
    /// Staged and queued; the service ingests it later.
    Queued { blob_path: String },
}

impl fmt::Display for IngestionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestionPath::Streaming { .. } => f.write_str("streaming"),
            IngestionPath::Queued { .. } => f.write_str("queued"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestionResult {
    pub source_id: Uuid,
    pub path: IngestionPath,
    /// Streaming attempts made before the result; zero for direct queued ingestion.
    pub streaming_attempts: u32,
}

impl IngestionResult {
    pub fn is_queued(&self) -> bool {
        matches!(self.path, IngestionPath::Queued { .. })
    }
}
