pub mod blob;
pub mod error;

pub use blob::{BlobBackend, BlobStore, ObjectStoreBlobStore};
pub use error::StorageError;
