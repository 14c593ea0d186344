//! Storage resource descriptors reported by the ingestion service.
//!
//! The service hands out storage roots as URIs of the shape
//! `https://{account}.{blob|queue|table}.core.windows.net/{object}?{sas}`.
//! [`ResourceDescriptor::parse`] splits those into the parts the ingestion
//! layer needs: the account (used for reliability ranking), the resource
//! kind, and the object name (container / queue / table).

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CoreError;

/// The storage service a resource lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Queue,
    Container,
    Table,
}

impl ResourceKind {
    /// Map the service label from the URI host (`blob`, `queue`, `table`).
    fn from_host_label(label: &str) -> Option<Self> {
        match label {
            "queue" => Some(Self::Queue),
            "blob" => Some(Self::Container),
            "table" => Some(Self::Table),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Container => "container",
            Self::Table => "table",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One storage resource (queue, blob container or table).
///
/// Immutable once parsed. The full `uri` keeps the embedded access
/// signature; [`Display`](fmt::Display) prints it without the query string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    uri: String,
    account_name: String,
    object_name: String,
    kind: ResourceKind,
}

impl ResourceDescriptor {
    /// Parse a storage root URI.
    pub fn parse(uri: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidResourceUri {
            uri: redact(uri),
            reason: reason.to_string(),
        };

        let parsed = Url::parse(uri).map_err(|e| invalid(&e.to_string()))?;
        let host = parsed.host_str().ok_or_else(|| invalid("missing host"))?;

        let mut labels = host.split('.');
        let account_name = labels
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("missing account name"))?;
        let kind = labels
            .next()
            .and_then(ResourceKind::from_host_label)
            .ok_or_else(|| invalid("host does not name a blob, queue or table service"))?;
        if labels.next().is_none() {
            return Err(invalid("host is not a storage endpoint"));
        }

        let object_name = parsed
            .path_segments()
            .and_then(|mut segs| segs.next())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("missing object name in path"))?;

        Ok(Self {
            uri: uri.to_string(),
            account_name: account_name.to_string(),
            object_name: object_name.to_string(),
            kind,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    /// Container, queue or table name (first path segment).
    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// The URI without its access signature.
    pub fn base_uri(&self) -> &str {
        self.uri.split('?').next().unwrap_or(&self.uri)
    }

    /// The access signature (query string without the leading `?`), if any.
    pub fn sas(&self) -> Option<&str> {
        self.uri.split_once('?').map(|(_, q)| q).filter(|q| !q.is_empty())
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base_uri())
    }
}

fn redact(uri: &str) -> String {
    match uri.split_once('?') {
        Some((base, _)) => format!("{base}?<redacted>"),
        None => uri.to_string(),
    }
}
