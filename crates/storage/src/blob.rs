use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use tracing::{debug, info};

use kusto_core::{ResourceDescriptor, ResourceKind};

use crate::error::StorageError;

/// Uploads staging blobs into a service-provided container.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `data` as `blob_name` inside `container`.
    ///
    /// Returns the final blob URI, including the container's access
    /// signature, so it can be handed to the ingestion service.
    async fn upload(
        &self,
        container: &ResourceDescriptor,
        blob_name: &str,
        data: Bytes,
    ) -> Result<String, StorageError>;
}

#[async_trait]
impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    async fn upload(
        &self,
        container: &ResourceDescriptor,
        blob_name: &str,
        data: Bytes,
    ) -> Result<String, StorageError> {
        (**self).upload(container, blob_name, data).await
    }
}

/// Where blobs actually land.
pub enum BlobBackend {
    /// One Azure store per container, built lazily from the container's SAS URI.
    Azure {
        stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
    },
    /// A single store for every container; objects are keyed `{container}/{blob}`.
    /// Used with `InMemory` / `LocalFileSystem` stores for local runs and tests.
    Fixed(Arc<dyn ObjectStore>),
}

/// [`BlobStore`] backed by `object_store`.
pub struct ObjectStoreBlobStore {
    backend: BlobBackend,
}

impl ObjectStoreBlobStore {
    pub fn azure() -> Self {
        Self {
            backend: BlobBackend::Azure {
                stores: Mutex::new(HashMap::new()),
            },
        }
    }

    pub fn fixed(store: Arc<dyn ObjectStore>) -> Self {
        info!("Blob storage: fixed object store backend");
        Self {
            backend: BlobBackend::Fixed(store),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.backend, BlobBackend::Azure { .. })
    }

    /// Resolve the store and object path for a blob.
    fn locate(
        &self,
        container: &ResourceDescriptor,
        blob_name: &str,
    ) -> Result<(Arc<dyn ObjectStore>, Path), StorageError> {
        if container.kind() != ResourceKind::Container {
            return Err(StorageError::Other(format!(
                "{} is a {}, not a blob container",
                container,
                container.kind()
            )));
        }

        match &self.backend {
            BlobBackend::Fixed(store) => Ok((
                store.clone(),
                Path::from(format!("{}/{}", container.object_name(), blob_name)),
            )),
            BlobBackend::Azure { stores } => {
                let key = container.base_uri().to_string();
                let mut stores = stores
                    .lock()
                    .map_err(|_| StorageError::Other("blob store cache poisoned".into()))?;
                let store = match stores.get(&key) {
                    Some(store) => store.clone(),
                    None => {
                        let store = build_azure_store(container)?;
                        stores.insert(key, store.clone());
                        store
                    }
                };
                Ok((store, Path::from(blob_name)))
            }
        }
    }
}

fn build_azure_store(container: &ResourceDescriptor) -> Result<Arc<dyn ObjectStore>, StorageError> {
    let sas = container.sas().ok_or_else(|| {
        StorageError::NotConfigured(format!("container {container} has no access signature"))
    })?;

    let store = MicrosoftAzureBuilder::new()
        .with_account(container.account_name())
        .with_container_name(container.object_name())
        .with_config(AzureConfigKey::SasKey, sas)
        .build()?;

    debug!(
        account = container.account_name(),
        container = container.object_name(),
        "Built Azure blob store"
    );
    Ok(Arc::new(store))
}

/// `{container base}/{blob}?{sas}`
pub fn blob_uri(container: &ResourceDescriptor, blob_name: &str) -> String {
    match container.sas() {
        Some(sas) => format!("{}/{}?{}", container.base_uri(), blob_name, sas),
        None => format!("{}/{}", container.base_uri(), blob_name),
    }
}

#[async_trait]
impl BlobStore for ObjectStoreBlobStore {
    async fn upload(
        &self,
        container: &ResourceDescriptor,
        blob_name: &str,
        data: Bytes,
    ) -> Result<String, StorageError> {
        let (store, path) = self.locate(container, blob_name)?;
        let size = data.len();
        store.put(&path, PutPayload::from(data)).await?;

        debug!(
            account = container.account_name(),
            path = %path,
            bytes = size,
            "Uploaded blob"
        );
        Ok(blob_uri(container, blob_name))
    }
}
