pub mod config;
pub mod error;
pub mod resource;
pub mod result;
pub mod telemetry;

pub use config::{load_dotenv, IngestConfig};
pub use error::CoreError;
pub use resource::{ResourceDescriptor, ResourceKind};
pub use result::{TabularColumn, TabularResult};
