pub mod auth;
pub mod error;
pub mod http;
pub mod traits;

pub use auth::{AuthProvider, NoAuthProvider, StaticTokenProvider};
pub use error::{ClientError, ErrorKind};
pub use http::KustoHttpClient;
pub use traits::{CommandExecutor, StreamingIngestor, StreamingRequest};
