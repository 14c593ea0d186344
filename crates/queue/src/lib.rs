pub mod error;
pub mod memory;
pub mod reader;
pub mod status;
pub mod store;

pub use error::QueueError;
pub use memory::MemoryQueueStore;
pub use reader::StatusQueueReader;
pub use status::{FailureMessage, StatusHeader, StatusMessage, StatusQueueKind, SuccessMessage};
pub use store::{QueueMessage, QueueStore};
