//! Credential providers
//!
//! Requests ask an injected provider for a bearer token at send time instead
//! of reading it from ambient storage.

use async_trait::async_trait;

/// Source of the bearer token attached to outgoing requests
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current token, or `None` to send the request unauthenticated
    async fn bearer_token(&self) -> Option<String>;
}

/// Sends every request without credentials
pub struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn bearer_token(&self) -> Option<String> {
        None
    }
}

/// Fixed token supplied at construction
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Token read from an environment variable on every request
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialProvider for EnvToken {
    async fn bearer_token(&self) -> Option<String> {
        std::env::var(&self.var)
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    }
}
