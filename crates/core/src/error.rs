use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid resource URI '{uri}': {reason}")]
    InvalidResourceUri { uri: String, reason: String },

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("malformed tabular response: {0}")]
    MalformedResult(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
