use std::sync::Arc;

use kusto_queue::{QueueStore, StatusQueueKind, StatusQueueReader};

use crate::error::IngestError;
use crate::resources::ResourceCache;

/// Success and failure status feeds for queued ingestion.
///
/// Queue lists are resolved from the resource cache on every call, so the
/// readers follow topology changes without being rebuilt by the caller.
pub struct IngestStatusQueues {
    resources: Arc<ResourceCache>,
    store: Arc<dyn QueueStore>,
}

impl IngestStatusQueues {
    pub fn new(resources: Arc<ResourceCache>, store: Arc<dyn QueueStore>) -> Self {
        Self { resources, store }
    }

    pub async fn success(&self) -> Result<StatusQueueReader, IngestError> {
        let queues = self.resources.get_success_queues().await?;
        Ok(StatusQueueReader::new(
            StatusQueueKind::Success,
            queues,
            self.store.clone(),
        ))
    }

    pub async fn failure(&self) -> Result<StatusQueueReader, IngestError> {
        let queues = self.resources.get_failed_queues().await?;
        Ok(StatusQueueReader::new(
            StatusQueueKind::Failure,
            queues,
            self.store.clone(),
        ))
    }
}
