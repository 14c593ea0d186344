//! Client error types and retry classification.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// How a failed backend call should be treated by retrying callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The service rejected the request on semantic grounds; retrying cannot help.
    Permanent,
    /// Network or service hiccup; a retry may succeed.
    Transient,
    /// The service signalled overload; back off before retrying.
    Throttled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Permanent => "permanent",
            ErrorKind::Transient => "transient",
            ErrorKind::Throttled => "throttled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP {status} ({kind}): {body}")]
    Http {
        status: u16,
        body: String,
        kind: ErrorKind,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("response parse error: {0}")]
    Parse(#[from] kusto_core::CoreError),

    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl ClientError {
    /// Build an HTTP error, classifying it from status and body.
    pub fn from_response(status: u16, body: String) -> Self {
        let kind = classify(status, &body);
        ClientError::Http { status, body, kind }
    }

    /// Shorthand for fakes and tests.
    pub fn transient(msg: impl Into<String>) -> Self {
        ClientError::Http {
            status: 503,
            body: msg.into(),
            kind: ErrorKind::Transient,
        }
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        ClientError::Http {
            status: 400,
            body: msg.into(),
            kind: ErrorKind::Permanent,
        }
    }

    pub fn throttled(msg: impl Into<String>) -> Self {
        ClientError::Http {
            status: 429,
            body: msg.into(),
            kind: ErrorKind::Throttled,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Http { kind, .. } => *kind,
            ClientError::Transport(_) | ClientError::Timeout(_) => ErrorKind::Transient,
            ClientError::Parse(_) | ClientError::NotConfigured(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind() == ErrorKind::Permanent
    }

    pub fn is_throttled(&self) -> bool {
        self.kind() == ErrorKind::Throttled
    }
}

/// Map an HTTP failure onto an [`ErrorKind`].
///
/// 429 is throttling. A JSON body carrying `"@permanent": true` is permanent
/// regardless of status; so are the client-error statuses that never change
/// on retry.
pub fn classify(status: u16, body: &str) -> ErrorKind {
    if status == 429 {
        return ErrorKind::Throttled;
    }
    if body_marks_permanent(body) {
        return ErrorKind::Permanent;
    }
    match status {
        400 | 401 | 403 | 404 => ErrorKind::Permanent,
        _ => ErrorKind::Transient,
    }
}

fn body_marks_permanent(body: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.get("@permanent")).cloned())
        .and_then(|flag| flag.as_bool())
        .unwrap_or(false)
}
