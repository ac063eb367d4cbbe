//! Client side of the OAuth refresh-token exchange.
//!
//! The refresh seam is a trait so the vault can be exercised in tests
//! without the network. The production client talks to the fixed
//! Anthropic token endpoint with a bounded timeout and is never retried
//! internally.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Token endpoint for the refresh-token grant.
pub const TOKEN_ENDPOINT: &str = "https://console.anthropic.com/v1/oauth/token";

/// Public OAuth client identifier for the Claude CLI. Not a secret.
pub const CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";

/// Cap on the response body carried inside `Rejected` errors.
const ERROR_BODY_LIMIT: usize = 300;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("Token endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Token refresh rejected ({status}): {body}. Re-authenticate with: claude-accounts login <name>")]
    Rejected { status: u16, body: String },

    #[error("Token endpoint returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// A successful refresh-token exchange.
///
/// Per the protocol the returned refresh token is single-use: the caller
/// must discard the token it sent and store this one. `refresh_token` is
/// `None` when the endpoint chose not to rotate it.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_secs: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

/// Seam for the refresh network call.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, OAuthError>;
}

/// Production refresher backed by `reqwest`.
pub struct OAuthClient {
    client: reqwest::Client,
    endpoint: String,
}

impl OAuthClient {
    pub fn new(timeout: Duration) -> Self {
        Self::with_endpoint(TOKEN_ENDPOINT.to_string(), timeout)
    }

    /// Override the endpoint (stub servers in tests).
    pub fn with_endpoint(endpoint: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, endpoint }
    }
}

#[async_trait]
impl TokenRefresher for OAuthClient {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, OAuthError> {
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", CLIENT_ID),
            ])
            .send()
            .await
            .map_err(|e| OAuthError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > ERROR_BODY_LIMIT {
                body.truncate(ERROR_BODY_LIMIT);
                body.push_str("...");
            }
            tracing::warn!(status = %status, "OAuth token refresh rejected");
            return Err(OAuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| OAuthError::InvalidResponse(e.to_string()))?;

        if parsed.access_token.is_empty() {
            return Err(OAuthError::InvalidResponse(
                "missing access_token".to_string(),
            ));
        }

        Ok(TokenGrant {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
            expires_in_secs: parsed.expires_in,
        })
    }
}
