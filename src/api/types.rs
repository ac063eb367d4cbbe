//! Request and response types for the HTTP API.

use serde::{Deserialize, Serialize};

use crate::vault::{AuthType, ExportedAccount, TokenStatus};

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
    pub auth_type: AuthType,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CaptureRequest {
    /// Override for the credential file path; defaults to the configured one.
    #[serde(default)]
    pub credentials_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AccountStatusResponse {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub status: TokenStatus,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub token_preview: String,
    pub expires_in_min: i64,
}

/// A ready-to-paste launch command for one account. The secret is
/// embedded shell-quoted; this endpoint is the one deliberate place
/// plaintext leaves the vault besides export.
#[derive(Debug, Serialize)]
pub struct LaunchResponse {
    pub command: String,
    pub alias: String,
    pub env_var: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountsDocument {
    pub accounts: Vec<ExportedAccount>,
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub imported: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
