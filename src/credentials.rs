//! The Claude CLI's own credential file.
//!
//! The CLI writes its OAuth tokens to `~/.claude/.credentials.json` under
//! the `claudeAiOauth` top-level key. The vault reads that file when
//! capturing a login and writes refreshed tokens back so a CLI launched
//! outside this system keeps working. Write-back goes through a temp
//! file in the same directory followed by a rename, preserving any other
//! top-level keys already present.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

use crate::vault::cipher::restrict_permissions;

/// Top-level key the CLI stores its OAuth material under.
const OAUTH_KEY: &str = "claudeAiOauth";

#[derive(Debug, Error)]
pub enum CredentialFileError {
    #[error("Credentials file not found: {0}. Run '{1}' first to authenticate, then capture the tokens.")]
    NotFound(PathBuf, String),

    #[error("No accessToken found in credentials file. Login may have failed.")]
    NoAccessToken,

    #[error("Failed to read credentials file: {0}")]
    Read(String),

    #[error("Failed to write credentials file: {0}")]
    Write(String),
}

/// Token material from (or destined for) the credential file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredOAuthTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Absolute expiry in epoch ms; 0 means no known expiry.
    #[serde(default)]
    pub expires_at: i64,
}

/// Handle on one on-disk credential file.
#[derive(Debug, Clone)]
pub struct CredentialFile {
    path: PathBuf,
    cli_name: String,
}

impl CredentialFile {
    pub fn new(path: PathBuf, cli_name: String) -> Self {
        Self { path, cli_name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Modification time, if the file exists. Used by the login watcher.
    pub fn modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    /// Read the OAuth token block out of the file.
    pub fn read_tokens(&self) -> Result<StoredOAuthTokens, CredentialFileError> {
        if !self.path.exists() {
            return Err(CredentialFileError::NotFound(
                self.path.clone(),
                self.cli_name.clone(),
            ));
        }

        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| CredentialFileError::Read(e.to_string()))?;
        let doc: Value =
            serde_json::from_str(&contents).map_err(|e| CredentialFileError::Read(e.to_string()))?;

        let tokens: StoredOAuthTokens = doc
            .get(OAUTH_KEY)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or(CredentialFileError::NoAccessToken)?;

        if tokens.access_token.is_empty() {
            return Err(CredentialFileError::NoAccessToken);
        }

        Ok(tokens)
    }

    /// Write refreshed tokens back, merging into the existing document so
    /// unrelated top-level keys survive. The write is atomic: temp file
    /// in the same directory, owner-only permissions, rename over the
    /// target.
    pub fn write_tokens(&self, tokens: &StoredOAuthTokens) -> Result<(), CredentialFileError> {
        let mut doc = match std::fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str::<Value>(&contents)
                .unwrap_or_else(|_| Value::Object(Default::default())),
            Err(_) => Value::Object(Default::default()),
        };

        if !doc.is_object() {
            doc = Value::Object(Default::default());
        }

        // Merge into any existing oauth block so extra fields the CLI
        // keeps there (scopes, subscription type) are preserved too.
        let Some(obj) = doc.as_object_mut() else {
            return Err(CredentialFileError::Write(
                "credential document is not an object".to_string(),
            ));
        };
        let mut oauth = obj
            .get(OAUTH_KEY)
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        oauth.insert("accessToken".to_string(), tokens.access_token.clone().into());
        oauth.insert(
            "refreshToken".to_string(),
            tokens.refresh_token.clone().into(),
        );
        oauth.insert("expiresAt".to_string(), tokens.expires_at.into());
        obj.insert(OAUTH_KEY.to_string(), Value::Object(oauth));

        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&parent).map_err(|e| CredentialFileError::Write(e.to_string()))?;

        let tmp_path = parent.join(format!(
            ".{}.tmp-{}",
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "credentials".to_string()),
            std::process::id()
        ));

        let contents = serde_json::to_string_pretty(&doc)
            .map_err(|e| CredentialFileError::Write(e.to_string()))?;
        std::fs::write(&tmp_path, contents).map_err(|e| CredentialFileError::Write(e.to_string()))?;
        restrict_permissions(&tmp_path).map_err(|e| CredentialFileError::Write(e.to_string()))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            CredentialFileError::Write(e.to_string())
        })?;

        tracing::debug!(path = %self.path.display(), "Synced tokens to CLI credential file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_in(dir: &tempfile::TempDir) -> CredentialFile {
        CredentialFile::new(dir.path().join(".credentials.json"), "claude".to_string())
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let file = file_in(&dir);
        assert!(matches!(
            file.read_tokens(),
            Err(CredentialFileError::NotFound(_, _))
        ));
    }

    #[test]
    fn reads_oauth_block() {
        let dir = tempfile::tempdir().unwrap();
        let file = file_in(&dir);
        std::fs::write(
            file.path(),
            r#"{"claudeAiOauth":{"accessToken":"tok1","refreshToken":"ref1","expiresAt":12345}}"#,
        )
        .unwrap();

        let tokens = file.read_tokens().unwrap();
        assert_eq!(tokens.access_token, "tok1");
        assert_eq!(tokens.refresh_token, "ref1");
        assert_eq!(tokens.expires_at, 12345);
    }

    #[test]
    fn empty_access_token_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = file_in(&dir);
        std::fs::write(file.path(), r#"{"claudeAiOauth":{"accessToken":""}}"#).unwrap();
        assert!(matches!(
            file.read_tokens(),
            Err(CredentialFileError::NoAccessToken)
        ));
    }

    #[test]
    fn write_back_preserves_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let file = file_in(&dir);
        std::fs::write(
            file.path(),
            r#"{"other":{"keep":true},"claudeAiOauth":{"accessToken":"old","refreshToken":"oldref","expiresAt":1,"scopes":["user:inference"]}}"#,
        )
        .unwrap();

        file.write_tokens(&StoredOAuthTokens {
            access_token: "new".to_string(),
            refresh_token: "newref".to_string(),
            expires_at: 99,
        })
        .unwrap();

        let doc: Value =
            serde_json::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(doc["other"]["keep"], true);
        assert_eq!(doc["claudeAiOauth"]["accessToken"], "new");
        assert_eq!(doc["claudeAiOauth"]["refreshToken"], "newref");
        assert_eq!(doc["claudeAiOauth"]["expiresAt"], 99);
        assert_eq!(doc["claudeAiOauth"]["scopes"][0], "user:inference");
    }

    #[test]
    fn write_back_creates_file_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let file = file_in(&dir);
        file.write_tokens(&StoredOAuthTokens {
            access_token: "tok".to_string(),
            refresh_token: String::new(),
            expires_at: 0,
        })
        .unwrap();

        assert_eq!(file.read_tokens().unwrap().access_token, "tok");
    }

    #[cfg(unix)]
    #[test]
    fn written_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let file = file_in(&dir);
        file.write_tokens(&StoredOAuthTokens {
            access_token: "tok".to_string(),
            refresh_token: String::new(),
            expires_at: 0,
        })
        .unwrap();
        let mode = std::fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
