//! The credential vault: named accounts, encrypted secrets, OAuth
//! refresh and capture.
//!
//! Every account carries either a static API key or an OAuth token pair,
//! never both. Secrets live in the store only as ciphertext; plaintext
//! exists transiently during resolution and display. The central
//! operation is [`Vault::resolve_launch_credentials`], which hands back
//! the single environment variable the CLI needs for the chosen
//! identity, transparently refreshing an expired OAuth token first.

pub mod cipher;
pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::credentials::{CredentialFile, CredentialFileError, StoredOAuthTokens};
use crate::oauth::{OAuthError, TokenRefresher};
use crate::util::{now_ms, token_preview};
use cipher::Cipher;
use store::{AccountRecord, AccountStore};

/// Identity variable injected for API-key accounts.
pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Identity variable injected for OAuth accounts.
pub const OAUTH_TOKEN_VAR: &str = "CLAUDE_CODE_OAUTH_TOKEN";

const API_KEY_MASK_PREFIX: &str = "sk-ant";
const OAUTH_MASK_PREFIX: &str = "sk-ant-oat01";

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Invalid account name '{0}': must be at least 2 characters")]
    InvalidName(String),

    #[error("An account named '{0}' already exists")]
    DuplicateName(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account '{0}' is not an OAuth account")]
    NotOAuth(String),

    #[error("{0}")]
    MissingCredential(String),

    #[error("Credentials for '{0}' have expired and no refresh token is stored. Re-authenticate with: claude-accounts login {0}")]
    CredentialExpired(String),

    #[error("No refresh token stored for '{0}'. Re-authenticate with: claude-accounts login {0}")]
    NoRefreshToken(String),

    #[error(transparent)]
    Refresh(#[from] OAuthError),

    #[error(transparent)]
    CredentialFile(#[from] CredentialFileError),

    #[error("Vault storage error: {0}")]
    Storage(String),

    #[error("Vault key error: {0}")]
    Key(#[from] cipher::CipherError),
}

/// Account kind, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    ApiKey,
    OAuth,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::ApiKey => "api_key",
            AuthType::OAuth => "oauth",
        }
    }

    fn from_db(s: &str) -> AuthType {
        if s == "oauth" {
            AuthType::OAuth
        } else {
            AuthType::ApiKey
        }
    }
}

/// Redacted listing view of one account. Never carries plaintext secrets.
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    pub id: String,
    pub name: String,
    pub auth_type: AuthType,
    /// Masked preview of the stored credential, or `None` if nothing stored.
    pub credential_preview: Option<String>,
    pub has_refresh: bool,
    pub expires_at: i64,
    pub created_at: String,
    pub last_used: Option<String>,
}

/// Informational token state. Never mutates anything.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TokenStatus {
    NotFound,
    /// API-key account with no key stored.
    Missing,
    /// OAuth account that has never been authenticated.
    NeedsLogin,
    /// OAuth token past its deadline.
    Expired { has_refresh: bool },
    Ok {
        /// Minutes until expiry; `None` when no expiry is known.
        expires_in_min: Option<i64>,
    },
}

/// The single environment variable a launch needs.
#[derive(Debug, Clone)]
pub struct LaunchCredentials {
    pub env_var: &'static str,
    pub secret: String,
}

/// Result of pulling tokens out of the external credential file.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureInfo {
    pub token_preview: String,
    pub has_refresh: bool,
    pub expires_in_min: Option<i64>,
}

/// Result of a successful refresh. `access_token` is the fresh plaintext
/// for in-process callers; outward surfaces expose only the preview.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub access_token: String,
    pub token_preview: String,
    pub expires_in_min: i64,
}

/// Plaintext serialization of one account, for export/import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedAccount {
    pub name: String,
    pub auth_type: AuthType,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub expires_at: i64,
}

/// Fields of an existing account that can change. `auth_type` cannot.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountUpdate {
    pub name: Option<String>,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
}

pub struct Vault {
    store: AccountStore,
    cipher: Cipher,
    credential_file: CredentialFile,
    refresher: Arc<dyn TokenRefresher>,
    /// One guard per account id; held only while that account refreshes.
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Lowercase, spaces to hyphens. Errors if fewer than 2 characters remain.
fn normalize_name(name: &str) -> Result<String, VaultError> {
    let normalized = name.trim().to_lowercase().replace(' ', "-");
    if normalized.chars().count() < 2 {
        return Err(VaultError::InvalidName(name.to_string()));
    }
    Ok(normalized)
}

fn new_account_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("acc_{}", &uuid[..8])
}

fn is_expired(record: &AccountRecord) -> bool {
    record.expires_at > 0 && record.expires_at <= now_ms()
}

fn minutes_until(expires_at: i64) -> i64 {
    (expires_at - now_ms()) / 60_000
}

impl Vault {
    /// Open the vault under `config.vault_dir`, creating the database and
    /// encryption key on first use.
    pub async fn open(config: &Config, refresher: Arc<dyn TokenRefresher>) -> Result<Self, VaultError> {
        let cipher = Cipher::load_or_create(&config.vault_dir.join(".key"))?;
        let store = AccountStore::open(config.vault_dir.join("accounts.db"))
            .await
            .map_err(VaultError::Storage)?;
        let credential_file =
            CredentialFile::new(config.credentials_path.clone(), config.cli_path.clone());

        Ok(Self {
            store,
            cipher,
            credential_file,
            refresher,
            refresh_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Create an account. `api_key` seeds API-key accounts; OAuth accounts
    /// start empty and get their tokens from a login capture.
    pub async fn create_account(
        &self,
        name: &str,
        auth_type: AuthType,
        api_key: Option<&str>,
    ) -> Result<String, VaultError> {
        let name = normalize_name(name)?;
        if self.get_record_by_name(&name).await?.is_some() {
            return Err(VaultError::DuplicateName(name));
        }

        let api_key_enc = match (auth_type, api_key) {
            (AuthType::ApiKey, Some(key)) => self.cipher.encrypt(key)?,
            _ => String::new(),
        };

        let id = new_account_id();
        self.store
            .insert(AccountRecord {
                id: id.clone(),
                name: name.clone(),
                auth_type: auth_type.as_str().to_string(),
                api_key_enc,
                access_token_enc: String::new(),
                refresh_token_enc: String::new(),
                expires_at: 0,
                created_at: String::new(),
                last_used: None,
            })
            .await
            .map_err(VaultError::Storage)?;

        tracing::info!(account = %name, auth_type = auth_type.as_str(), "Created account");
        Ok(id)
    }

    /// Resolve the environment variable a launch under this account needs,
    /// refreshing an expired OAuth token first when a refresh token is
    /// stored. Updates `last_used` on every success path.
    pub async fn resolve_launch_credentials(
        &self,
        account_id: &str,
    ) -> Result<LaunchCredentials, VaultError> {
        let record = self.require_record(account_id).await?;

        let creds = match AuthType::from_db(&record.auth_type) {
            AuthType::ApiKey => {
                let key = self.decrypt_lenient(&record.api_key_enc);
                if key.is_empty() {
                    return Err(VaultError::MissingCredential(format!(
                        "No API key stored for '{}'. Add one with: claude-accounts add {} --key <api-key>",
                        record.name, record.name
                    )));
                }
                LaunchCredentials {
                    env_var: API_KEY_VAR,
                    secret: key,
                }
            }
            AuthType::OAuth => {
                let token = self.decrypt_lenient(&record.access_token_enc);
                if token.is_empty() {
                    return Err(VaultError::MissingCredential(format!(
                        "No OAuth token stored for '{}'. Authenticate with: claude-accounts login {}",
                        record.name, record.name
                    )));
                }

                let secret = if is_expired(&record) {
                    let has_refresh = !self.decrypt_lenient(&record.refresh_token_enc).is_empty();
                    if !has_refresh {
                        return Err(VaultError::CredentialExpired(record.name.clone()));
                    }
                    self.refresh_if_still_expired(&record.id).await?
                } else {
                    token
                };

                LaunchCredentials {
                    env_var: OAUTH_TOKEN_VAR,
                    secret,
                }
            }
        };

        self.store
            .touch_last_used(&record.id)
            .await
            .map_err(VaultError::Storage)?;
        Ok(creds)
    }

    /// Report token state without mutating anything.
    pub async fn token_status(&self, account_id: &str) -> Result<TokenStatus, VaultError> {
        let record = match self.store.get(account_id).await.map_err(VaultError::Storage)? {
            Some(record) => record,
            None => return Ok(TokenStatus::NotFound),
        };

        Ok(match AuthType::from_db(&record.auth_type) {
            AuthType::ApiKey => {
                if self.decrypt_lenient(&record.api_key_enc).is_empty() {
                    TokenStatus::Missing
                } else {
                    TokenStatus::Ok {
                        expires_in_min: None,
                    }
                }
            }
            AuthType::OAuth => {
                if self.decrypt_lenient(&record.access_token_enc).is_empty() {
                    TokenStatus::NeedsLogin
                } else if is_expired(&record) {
                    TokenStatus::Expired {
                        has_refresh: !self.decrypt_lenient(&record.refresh_token_enc).is_empty(),
                    }
                } else {
                    TokenStatus::Ok {
                        expires_in_min: (record.expires_at > 0)
                            .then(|| minutes_until(record.expires_at)),
                    }
                }
            }
        })
    }

    /// Pull tokens the CLI wrote during its own login flow into the
    /// account. `credentials_path` overrides the configured file.
    pub async fn capture_oauth_tokens(
        &self,
        account_id: &str,
        credentials_path: Option<&Path>,
    ) -> Result<CaptureInfo, VaultError> {
        let record = self.require_record(account_id).await?;
        if AuthType::from_db(&record.auth_type) != AuthType::OAuth {
            return Err(VaultError::NotOAuth(record.name));
        }

        let file = match credentials_path {
            Some(path) => CredentialFile::new(path.to_path_buf(), "claude".to_string()),
            None => self.credential_file.clone(),
        };
        let tokens = file.read_tokens()?;

        let access_enc = self.cipher.encrypt(&tokens.access_token)?;
        let refresh_enc = self.cipher.encrypt(&tokens.refresh_token)?;
        self.store
            .set_oauth_tokens(&record.id, &access_enc, &refresh_enc, tokens.expires_at)
            .await
            .map_err(VaultError::Storage)?;

        tracing::info!(account = %record.name, "Captured OAuth tokens");
        Ok(CaptureInfo {
            token_preview: token_preview(OAUTH_MASK_PREFIX, &tokens.access_token),
            has_refresh: !tokens.refresh_token.is_empty(),
            expires_in_min: (tokens.expires_at > 0).then(|| minutes_until(tokens.expires_at)),
        })
    }

    /// Exchange the stored refresh token for a fresh access token,
    /// unconditionally. Serialized per account with the auto-refresh path.
    pub async fn refresh_account(&self, account_id: &str) -> Result<RefreshOutcome, VaultError> {
        let lock = self.lock_for(account_id).await;
        let _guard = lock.lock().await;

        let record = self.require_record(account_id).await?;
        self.do_refresh(record).await
    }

    /// Auto-refresh path from `resolve_launch_credentials`. Re-checks the
    /// record after taking the per-account lock so that of N concurrent
    /// expired resolves only the first performs the network exchange; the
    /// rest read the token it stored.
    async fn refresh_if_still_expired(&self, account_id: &str) -> Result<String, VaultError> {
        let lock = self.lock_for(account_id).await;
        let _guard = lock.lock().await;

        let record = self.require_record(account_id).await?;
        if !is_expired(&record) {
            let token = self.decrypt_lenient(&record.access_token_enc);
            if !token.is_empty() {
                return Ok(token);
            }
        }

        Ok(self.do_refresh(record).await?.access_token)
    }

    async fn do_refresh(&self, record: AccountRecord) -> Result<RefreshOutcome, VaultError> {
        if AuthType::from_db(&record.auth_type) != AuthType::OAuth {
            return Err(VaultError::NotOAuth(record.name));
        }
        let old_refresh = self.decrypt_lenient(&record.refresh_token_enc);
        if old_refresh.is_empty() {
            return Err(VaultError::NoRefreshToken(record.name));
        }

        let grant = self.refresher.refresh(&old_refresh).await?;

        // The endpoint rotates single-use refresh tokens; keep the old one
        // only when the response omits a replacement.
        let new_refresh = grant.refresh_token.unwrap_or(old_refresh);
        let expires_at = now_ms() + grant.expires_in_secs * 1000;

        let access_enc = self.cipher.encrypt(&grant.access_token)?;
        let refresh_enc = self.cipher.encrypt(&new_refresh)?;
        let updated = self
            .store
            .set_oauth_tokens(&record.id, &access_enc, &refresh_enc, expires_at)
            .await
            .map_err(VaultError::Storage)?;
        if !updated {
            return Err(VaultError::AccountNotFound(record.id));
        }

        // Keep the CLI's own credential file in sync so a `claude` started
        // outside this system does not invalidate the rotated token.
        if let Err(e) = self.credential_file.write_tokens(&StoredOAuthTokens {
            access_token: grant.access_token.clone(),
            refresh_token: new_refresh,
            expires_at,
        }) {
            tracing::warn!(account = %record.name, error = %e, "Could not sync credential file");
        }

        tracing::info!(account = %record.name, "Refreshed OAuth token");
        Ok(RefreshOutcome {
            token_preview: token_preview(OAUTH_MASK_PREFIX, &grant.access_token),
            expires_in_min: minutes_until(expires_at),
            access_token: grant.access_token,
        })
    }

    /// Rename an account or replace its credential material. The auth
    /// type is fixed; credential fields of the other kind are ignored.
    pub async fn update_account(
        &self,
        account_id: &str,
        update: AccountUpdate,
    ) -> Result<(), VaultError> {
        let mut record = self.require_record(account_id).await?;
        let auth_type = AuthType::from_db(&record.auth_type);

        if let Some(name) = update.name {
            let name = normalize_name(&name)?;
            if name != record.name {
                if self.get_record_by_name(&name).await?.is_some() {
                    return Err(VaultError::DuplicateName(name));
                }
                record.name = name;
            }
        }

        match auth_type {
            AuthType::ApiKey => {
                if let Some(key) = update.api_key {
                    record.api_key_enc = self.cipher.encrypt(&key)?;
                }
            }
            AuthType::OAuth => {
                if let Some(token) = update.access_token {
                    record.access_token_enc = self.cipher.encrypt(&token)?;
                }
                if let Some(token) = update.refresh_token {
                    record.refresh_token_enc = self.cipher.encrypt(&token)?;
                }
                if let Some(expires_at) = update.expires_at {
                    record.expires_at = expires_at;
                }
            }
        }

        let id = record.id.clone();
        let updated = self.store.update(record).await.map_err(VaultError::Storage)?;
        if !updated {
            return Err(VaultError::AccountNotFound(id));
        }
        Ok(())
    }

    pub async fn delete_account(&self, account_id: &str) -> Result<(), VaultError> {
        let deleted = self
            .store
            .delete(account_id)
            .await
            .map_err(VaultError::Storage)?;
        if !deleted {
            return Err(VaultError::AccountNotFound(account_id.to_string()));
        }
        Ok(())
    }

    /// Redacted views of every account, in creation order.
    pub async fn list_accounts(&self) -> Result<Vec<AccountView>, VaultError> {
        let records = self.store.list().await.map_err(VaultError::Storage)?;
        Ok(records.into_iter().map(|r| self.view_of(r)).collect())
    }

    pub async fn get_account(&self, account_id: &str) -> Result<AccountView, VaultError> {
        let record = self.require_record(account_id).await?;
        Ok(self.view_of(record))
    }

    /// Resolve a name or id to the account id. Names are normalized first
    /// so `Work` finds the account created as `work`.
    pub async fn find_account_id(&self, selector: &str) -> Result<String, VaultError> {
        if let Some(record) = self.store.get(selector).await.map_err(VaultError::Storage)? {
            return Ok(record.id);
        }
        let name = selector.trim().to_lowercase().replace(' ', "-");
        match self.get_record_by_name(&name).await? {
            Some(record) => Ok(record.id),
            None => Err(VaultError::AccountNotFound(selector.to_string())),
        }
    }

    /// Decrypted serialization of every account.
    pub async fn export_all(&self) -> Result<Vec<ExportedAccount>, VaultError> {
        let records = self.store.list().await.map_err(VaultError::Storage)?;
        Ok(records
            .into_iter()
            .map(|r| ExportedAccount {
                name: r.name.clone(),
                auth_type: AuthType::from_db(&r.auth_type),
                api_key: self.decrypt_lenient(&r.api_key_enc),
                access_token: self.decrypt_lenient(&r.access_token_enc),
                refresh_token: self.decrypt_lenient(&r.refresh_token_enc),
                expires_at: r.expires_at,
            })
            .collect())
    }

    /// Import exported accounts, skipping names that already exist.
    /// Returns the count actually imported.
    pub async fn import_accounts(
        &self,
        accounts: Vec<ExportedAccount>,
    ) -> Result<usize, VaultError> {
        let mut imported = 0;
        for account in accounts {
            let name = match normalize_name(&account.name) {
                Ok(name) => name,
                Err(_) => {
                    tracing::warn!(name = %account.name, "Skipping import: invalid name");
                    continue;
                }
            };
            if self.get_record_by_name(&name).await?.is_some() {
                tracing::debug!(account = %name, "Skipping import: name exists");
                continue;
            }

            self.store
                .insert(AccountRecord {
                    id: new_account_id(),
                    name,
                    auth_type: account.auth_type.as_str().to_string(),
                    api_key_enc: self.cipher.encrypt(&account.api_key)?,
                    access_token_enc: self.cipher.encrypt(&account.access_token)?,
                    refresh_token_enc: self.cipher.encrypt(&account.refresh_token)?,
                    expires_at: account.expires_at,
                    created_at: String::new(),
                    last_used: None,
                })
                .await
                .map_err(VaultError::Storage)?;
            imported += 1;
        }
        Ok(imported)
    }

    async fn require_record(&self, account_id: &str) -> Result<AccountRecord, VaultError> {
        self.store
            .get(account_id)
            .await
            .map_err(VaultError::Storage)?
            .ok_or_else(|| VaultError::AccountNotFound(account_id.to_string()))
    }

    async fn get_record_by_name(&self, name: &str) -> Result<Option<AccountRecord>, VaultError> {
        self.store
            .get_by_name(name)
            .await
            .map_err(VaultError::Storage)
    }

    /// Decrypt a stored field, treating corrupt ciphertext as absent so a
    /// single bad field never breaks listings or resolution of others.
    fn decrypt_lenient(&self, ciphertext: &str) -> String {
        match self.cipher.decrypt(ciphertext) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                tracing::warn!("Stored credential failed to decrypt; treating as absent");
                String::new()
            }
        }
    }

    fn view_of(&self, record: AccountRecord) -> AccountView {
        let auth_type = AuthType::from_db(&record.auth_type);
        let credential_preview = match auth_type {
            AuthType::ApiKey => mask_field(&self.cipher, &record.api_key_enc, API_KEY_MASK_PREFIX),
            AuthType::OAuth => {
                mask_field(&self.cipher, &record.access_token_enc, OAUTH_MASK_PREFIX)
            }
        };
        AccountView {
            id: record.id,
            name: record.name,
            auth_type,
            credential_preview,
            has_refresh: !record.refresh_token_enc.is_empty(),
            expires_at: record.expires_at,
            created_at: record.created_at,
            last_used: record.last_used,
        }
    }

    async fn lock_for(&self, account_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Mask for listings. Decrypt failure masks as `***` rather than erroring
/// the whole listing.
fn mask_field(cipher: &Cipher, ciphertext: &str, prefix: &str) -> Option<String> {
    if ciphertext.is_empty() {
        return None;
    }
    match cipher.decrypt(ciphertext) {
        Ok(plaintext) if !plaintext.is_empty() => Some(token_preview(prefix, &plaintext)),
        Ok(_) => None,
        Err(_) => Some("***".to_string()),
    }
}
