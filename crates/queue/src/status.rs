//! Ingestion status messages posted by the service to the success and
//! failure queues.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Which logical status feed a queue belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusQueueKind {
    Success,
    Failure,
}

/// Fields common to success and failure notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusHeader {
    pub operation_id: String,
    pub database: String,
    pub table: String,
    pub ingestion_source_id: String,
    #[serde(default)]
    pub ingestion_source_path: Option<String>,
    #[serde(default)]
    pub root_activity_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SuccessMessage {
    #[serde(flatten)]
    pub header: StatusHeader,
    #[serde(default)]
    pub succeeded_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FailureMessage {
    #[serde(flatten)]
    pub header: StatusHeader,
    #[serde(default)]
    pub failed_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub error_code: String,
    /// `Permanent`, `Transient` or `Exhausted`.
    #[serde(default)]
    pub failure_status: String,
    #[serde(default)]
    pub originates_from_update_policy: bool,
    #[serde(default)]
    pub should_retry: bool,
}

/// A completion notification, typed by the queue it was read from.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusMessage {
    Success(SuccessMessage),
    Failure(FailureMessage),
}

impl StatusMessage {
    /// Decode a queue message body: base64 text wrapping a JSON document.
    pub fn decode(kind: StatusQueueKind, text: &str) -> Result<Self, QueueError> {
        let raw = STANDARD
            .decode(text.trim())
            .map_err(|e| QueueError::Decode(format!("invalid base64: {e}")))?;
        let parsed = match kind {
            StatusQueueKind::Success => serde_json::from_slice(&raw).map(StatusMessage::Success),
            StatusQueueKind::Failure => serde_json::from_slice(&raw).map(StatusMessage::Failure),
        };
        parsed.map_err(|e| QueueError::Decode(format!("invalid status JSON: {e}")))
    }

    /// Base64-JSON encoding, as the service writes it.
    pub fn encode(&self) -> Result<String, QueueError> {
        let json = match self {
            StatusMessage::Success(m) => serde_json::to_vec(m),
            StatusMessage::Failure(m) => serde_json::to_vec(m),
        }
        .map_err(|e| QueueError::Decode(e.to_string()))?;
        Ok(STANDARD.encode(json))
    }

    pub fn header(&self) -> &StatusHeader {
        match self {
            StatusMessage::Success(m) => &m.header,
            StatusMessage::Failure(m) => &m.header,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StatusMessage::Success(_))
    }
}
