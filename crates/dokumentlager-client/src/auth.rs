//! Authentication strategies
//!
//! A strategy produces the headers that authenticate one request. It is
//! asked again for every request, so token providers may refresh freely.

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const INTEGRATION_ID_HEADER: &str = "IntegrasjonId";
pub const INTEGRATION_PASSWORD_HEADER: &str = "IntegrasjonPassord";

/// Supplies authentication headers for outgoing requests
#[async_trait]
pub trait AuthenticationStrategy: Send + Sync {
    async fn headers(&self) -> Result<Vec<(&'static str, String)>>;
}

/// Source of OAuth access tokens, typically a Maskinporten client
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Sends requests without credentials
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAuthentication;

#[async_trait]
impl AuthenticationStrategy for NoAuthentication {
    async fn headers(&self) -> Result<Vec<(&'static str, String)>> {
        Ok(Vec::new())
    }
}

/// A fixed bearer token
#[derive(Clone)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken([REDACTED])")
    }
}

#[async_trait]
impl AuthenticationStrategy for BearerToken {
    async fn headers(&self) -> Result<Vec<(&'static str, String)>> {
        Ok(vec![(AUTHORIZATION_HEADER, format!("Bearer {}", self.0))])
    }
}

#[async_trait]
impl AccessTokenProvider for BearerToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Fiks integration credentials on top of an access token
pub struct IntegrationAuthentication {
    token_provider: Arc<dyn AccessTokenProvider>,
    integration_id: Uuid,
    integration_password: String,
}

impl IntegrationAuthentication {
    pub fn new(
        token_provider: Arc<dyn AccessTokenProvider>,
        integration_id: Uuid,
        integration_password: impl Into<String>,
    ) -> Self {
        Self {
            token_provider,
            integration_id,
            integration_password: integration_password.into(),
        }
    }
}

impl std::fmt::Debug for IntegrationAuthentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationAuthentication")
            .field("integration_id", &self.integration_id)
            .field("integration_password", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl AuthenticationStrategy for IntegrationAuthentication {
    async fn headers(&self) -> Result<Vec<(&'static str, String)>> {
        let token = self.token_provider.access_token().await?;
        Ok(vec![
            (AUTHORIZATION_HEADER, format!("Bearer {}", token)),
            (INTEGRATION_ID_HEADER, self.integration_id.to_string()),
            (INTEGRATION_PASSWORD_HEADER, self.integration_password.clone()),
        ])
    }
}
