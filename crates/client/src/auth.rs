//! Authorization header providers.
//!
//! Token acquisition is outside this crate: providers only hand back the
//! header value to attach to each request.

use async_trait::async_trait;

use crate::error::ClientError;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Value for the `Authorization` header, or `None` for anonymous requests.
    async fn auth_header(&self) -> Result<Option<String>, ClientError>;
}

/// Sends no `Authorization` header.
#[derive(Debug, Default, Clone)]
pub struct NoAuthProvider;

#[async_trait]
impl AuthProvider for NoAuthProvider {
    async fn auth_header(&self) -> Result<Option<String>, ClientError> {
        Ok(None)
    }
}

/// A pre-acquired bearer token.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn auth_header(&self) -> Result<Option<String>, ClientError> {
        Ok(Some(format!("Bearer {}", self.token)))
    }
}
