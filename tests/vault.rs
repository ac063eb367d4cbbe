//! Vault integration tests: account lifecycle, credential resolution,
//! refresh behavior, and the capture flow, all against a real temp-dir
//! vault with the network seam stubbed out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use claude_accounts::config::Config;
use claude_accounts::credentials::CredentialFileError;
use claude_accounts::oauth::{OAuthClient, OAuthError, TokenGrant, TokenRefresher};
use claude_accounts::util::now_ms;
use claude_accounts::vault::{
    AccountUpdate, AuthType, TokenStatus, Vault, VaultError, API_KEY_VAR, OAUTH_TOKEN_VAR,
};

/// Refresher that hands out rotating tokens and records every refresh
/// token it is shown.
struct StubRefresher {
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
    delay: Duration,
}

impl StubRefresher {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }
}

#[async_trait]
impl TokenRefresher for StubRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, OAuthError> {
        tokio::time::sleep(self.delay).await;
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen.lock().unwrap().push(refresh_token.to_string());
        Ok(TokenGrant {
            access_token: format!("fresh-{}", n),
            refresh_token: Some(format!("rotated-{}", n)),
            expires_in_secs: 3600,
        })
    }
}

struct Fixture {
    vault: Arc<Vault>,
    config: Config,
    refresher: Arc<StubRefresher>,
    _dir: TempDir,
}

async fn fixture_with(refresher: StubRefresher) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::new(dir.path().join("vault"), dir.path().join(".credentials.json"));
    let refresher = Arc::new(refresher);
    let seam: Arc<dyn TokenRefresher> = refresher.clone();
    let vault = Arc::new(Vault::open(&config, seam).await.unwrap());
    Fixture {
        vault,
        config,
        refresher,
        _dir: dir,
    }
}

async fn fixture() -> Fixture {
    fixture_with(StubRefresher::new()).await
}

/// Seed an OAuth account with plaintext tokens and an expiry.
async fn seed_oauth(
    vault: &Vault,
    name: &str,
    access: &str,
    refresh: &str,
    expires_at: i64,
) -> String {
    let id = vault.create_account(name, AuthType::OAuth, None).await.unwrap();
    vault
        .update_account(
            &id,
            AccountUpdate {
                access_token: Some(access.to_string()),
                refresh_token: Some(refresh.to_string()),
                expires_at: Some(expires_at),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    id
}

#[tokio::test]
async fn api_key_account_resolves_to_its_key() {
    let f = fixture().await;
    let id = f
        .vault
        .create_account("work", AuthType::ApiKey, Some("sk-ant-api03-X"))
        .await
        .unwrap();

    let creds = f.vault.resolve_launch_credentials(&id).await.unwrap();
    assert_eq!(creds.env_var, API_KEY_VAR);
    assert_eq!(creds.secret, "sk-ant-api03-X");
}

#[tokio::test]
async fn resolve_is_idempotent_for_api_key_accounts() {
    let f = fixture().await;
    let id = f
        .vault
        .create_account("work", AuthType::ApiKey, Some("sk-ant-api03-X"))
        .await
        .unwrap();

    let first = f.vault.resolve_launch_credentials(&id).await.unwrap();
    let second = f.vault.resolve_launch_credentials(&id).await.unwrap();
    assert_eq!(first.secret, second.secret);

    let view = f.vault.get_account(&id).await.unwrap();
    assert_eq!(view.expires_at, 0);
    assert!(view.last_used.is_some());
}

#[tokio::test]
async fn names_collide_after_normalization() {
    let f = fixture().await;
    f.vault
        .create_account("Work Account", AuthType::ApiKey, Some("k1"))
        .await
        .unwrap();

    let err = f
        .vault
        .create_account("work-account", AuthType::ApiKey, Some("k2"))
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::DuplicateName(_)));

    let err = f
        .vault
        .create_account("x", AuthType::ApiKey, Some("k"))
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidName(_)));
}

#[tokio::test]
async fn oauth_account_lifecycle_through_capture() {
    let f = fixture().await;
    let id = f
        .vault
        .create_account("personal", AuthType::OAuth, None)
        .await
        .unwrap();

    assert!(matches!(
        f.vault.token_status(&id).await.unwrap(),
        TokenStatus::NeedsLogin
    ));

    // Never-authenticated accounts cannot launch.
    let err = f.vault.resolve_launch_credentials(&id).await.unwrap_err();
    match err {
        VaultError::MissingCredential(msg) => {
            assert!(msg.contains("personal"));
            assert!(msg.contains("login"));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let future = now_ms() + 90 * 60_000;
    std::fs::write(
        &f.config.credentials_path,
        format!(
            r#"{{"claudeAiOauth":{{"accessToken":"tok1","refreshToken":"ref1","expiresAt":{}}}}}"#,
            future
        ),
    )
    .unwrap();

    let info = f.vault.capture_oauth_tokens(&id, None).await.unwrap();
    assert_eq!(info.token_preview, "sk-ant-oat01...tok1");
    assert!(info.has_refresh);

    match f.vault.token_status(&id).await.unwrap() {
        TokenStatus::Ok { expires_in_min } => {
            let min = expires_in_min.unwrap();
            assert!((85..=90).contains(&min), "expected ~90, got {}", min);
        }
        other => panic!("unexpected status: {:?}", other),
    }

    let creds = f.vault.resolve_launch_credentials(&id).await.unwrap();
    assert_eq!(creds.env_var, OAUTH_TOKEN_VAR);
    assert_eq!(creds.secret, "tok1");
}

#[tokio::test]
async fn capture_errors_distinguish_missing_file_from_missing_token() {
    let f = fixture().await;
    let id = f
        .vault
        .create_account("personal", AuthType::OAuth, None)
        .await
        .unwrap();

    let err = f.vault.capture_oauth_tokens(&id, None).await.unwrap_err();
    assert!(matches!(
        err,
        VaultError::CredentialFile(CredentialFileError::NotFound(_, _))
    ));

    std::fs::write(&f.config.credentials_path, r#"{"claudeAiOauth":{"accessToken":""}}"#).unwrap();
    let err = f.vault.capture_oauth_tokens(&id, None).await.unwrap_err();
    assert!(matches!(
        err,
        VaultError::CredentialFile(CredentialFileError::NoAccessToken)
    ));
}

#[tokio::test]
async fn expired_without_refresh_token_is_credential_expired() {
    let f = fixture().await;
    let id = seed_oauth(&f.vault, "stale", "tok-old", "", now_ms() - 1000).await;

    let err = f.vault.resolve_launch_credentials(&id).await.unwrap_err();
    assert!(matches!(err, VaultError::CredentialExpired(_)));
    assert_eq!(f.refresher.calls.load(Ordering::SeqCst), 0);

    match f.vault.token_status(&id).await.unwrap() {
        TokenStatus::Expired { has_refresh } => assert!(!has_refresh),
        other => panic!("unexpected status: {:?}", other),
    }
}

#[tokio::test]
async fn expired_resolve_refreshes_transparently() {
    let f = fixture().await;
    let id = seed_oauth(&f.vault, "stale", "tok-old", "ref-1", now_ms() - 1000).await;

    let creds = f.vault.resolve_launch_credentials(&id).await.unwrap();
    assert_eq!(creds.env_var, OAUTH_TOKEN_VAR);
    assert_eq!(creds.secret, "fresh-1");
    assert_eq!(f.refresher.calls.load(Ordering::SeqCst), 1);

    match f.vault.token_status(&id).await.unwrap() {
        TokenStatus::Ok { expires_in_min } => {
            let min = expires_in_min.unwrap();
            assert!((58..=60).contains(&min), "expected ~60, got {}", min);
        }
        other => panic!("unexpected status: {:?}", other),
    }
}

#[tokio::test]
async fn refresh_rotates_the_single_use_refresh_token() {
    let f = fixture().await;
    let id = seed_oauth(&f.vault, "rotating", "tok-old", "ref-1", now_ms() + 60_000).await;

    f.vault.refresh_account(&id).await.unwrap();
    f.vault.refresh_account(&id).await.unwrap();

    let seen = f.refresher.seen.lock().unwrap().clone();
    assert_eq!(seen, vec!["ref-1".to_string(), "rotated-1".to_string()]);

    // The discarded token is gone from every public surface.
    let exported = f.vault.export_all().await.unwrap();
    assert_eq!(exported[0].refresh_token, "rotated-2");
}

#[tokio::test]
async fn refresh_writes_back_to_the_credential_file() {
    let f = fixture().await;
    let id = seed_oauth(&f.vault, "synced", "tok-old", "ref-1", now_ms() + 60_000).await;

    let outcome = f.vault.refresh_account(&id).await.unwrap();
    assert_eq!(outcome.access_token, "fresh-1");
    assert!((58..=60).contains(&outcome.expires_in_min));

    let doc: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(&f.config.credentials_path).unwrap(),
    )
    .unwrap();
    assert_eq!(doc["claudeAiOauth"]["accessToken"], "fresh-1");
    assert_eq!(doc["claudeAiOauth"]["refreshToken"], "rotated-1");
}

#[tokio::test]
async fn refresh_requires_an_oauth_account_with_a_refresh_token() {
    let f = fixture().await;

    let api = f
        .vault
        .create_account("keyed", AuthType::ApiKey, Some("k"))
        .await
        .unwrap();
    assert!(matches!(
        f.vault.refresh_account(&api).await.unwrap_err(),
        VaultError::NotOAuth(_)
    ));

    let bare = f.vault.create_account("bare", AuthType::OAuth, None).await.unwrap();
    assert!(matches!(
        f.vault.refresh_account(&bare).await.unwrap_err(),
        VaultError::NoRefreshToken(_)
    ));

    assert!(matches!(
        f.vault.refresh_account("acc_missing").await.unwrap_err(),
        VaultError::AccountNotFound(_)
    ));
}

#[tokio::test]
async fn concurrent_expired_resolves_refresh_exactly_once() {
    let f = fixture_with(StubRefresher::slow(Duration::from_millis(50))).await;
    let id = seed_oauth(&f.vault, "busy", "tok-old", "ref-1", now_ms() - 1000).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let vault = f.vault.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            vault.resolve_launch_credentials(&id).await
        }));
    }

    let mut tokens = Vec::new();
    for handle in handles {
        tokens.push(handle.await.unwrap().unwrap().secret);
    }

    assert_eq!(f.refresher.calls.load(Ordering::SeqCst), 1);
    assert!(tokens.iter().all(|t| t == "fresh-1"), "tokens: {:?}", tokens);
}

#[tokio::test]
async fn listings_are_redacted() {
    let f = fixture().await;
    f.vault
        .create_account("work", AuthType::ApiKey, Some("sk-ant-api03-verysecret"))
        .await
        .unwrap();

    let accounts = f.vault.list_accounts().await.unwrap();
    assert_eq!(accounts.len(), 1);
    let preview = accounts[0].credential_preview.as_deref().unwrap();
    assert_eq!(preview, "sk-ant...secret");
    assert!(!preview.contains("verysecret"));
}

#[tokio::test]
async fn export_then_import_skips_collisions() {
    let f = fixture().await;
    f.vault
        .create_account("work", AuthType::ApiKey, Some("sk-1"))
        .await
        .unwrap();
    seed_oauth(&f.vault, "personal", "tok-1", "ref-1", now_ms() + 60_000).await;

    let exported = f.vault.export_all().await.unwrap();
    assert_eq!(exported.len(), 2);
    assert!(exported.iter().any(|a| a.api_key == "sk-1"));

    // Fresh vault takes everything.
    let other = fixture().await;
    assert_eq!(other.vault.import_accounts(exported.clone()).await.unwrap(), 2);
    let id = other.vault.find_account_id("work").await.unwrap();
    let creds = other.vault.resolve_launch_credentials(&id).await.unwrap();
    assert_eq!(creds.secret, "sk-1");

    // Re-import into the original skips every name.
    assert_eq!(f.vault.import_accounts(exported).await.unwrap(), 0);
}

#[tokio::test]
async fn update_renames_and_replaces_credentials() {
    let f = fixture().await;
    let id = f
        .vault
        .create_account("work", AuthType::ApiKey, Some("old-key"))
        .await
        .unwrap();

    f.vault
        .update_account(
            &id,
            AccountUpdate {
                name: Some("Work Main".to_string()),
                api_key: Some("new-key".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let view = f.vault.get_account(&id).await.unwrap();
    assert_eq!(view.name, "work-main");
    let creds = f.vault.resolve_launch_credentials(&id).await.unwrap();
    assert_eq!(creds.secret, "new-key");
}

#[tokio::test]
async fn oauth_client_maps_endpoint_responses() {
    use axum::{routing::post, Json, Router};

    async fn grant() -> Json<serde_json::Value> {
        Json(serde_json::json!({
            "access_token": "net-tok",
            "refresh_token": "net-ref",
            "expires_in": 1800,
        }))
    }
    async fn reject() -> (axum::http::StatusCode, &'static str) {
        (axum::http::StatusCode::BAD_REQUEST, "invalid_grant")
    }

    let app = Router::new()
        .route("/ok", post(grant))
        .route("/bad", post(reject));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let ok = OAuthClient::with_endpoint(format!("http://{}/ok", addr), Duration::from_secs(5));
    let grant = ok.refresh("some-refresh").await.unwrap();
    assert_eq!(grant.access_token, "net-tok");
    assert_eq!(grant.refresh_token.as_deref(), Some("net-ref"));
    assert_eq!(grant.expires_in_secs, 1800);

    let bad = OAuthClient::with_endpoint(format!("http://{}/bad", addr), Duration::from_secs(5));
    match bad.refresh("some-refresh").await.unwrap_err() {
        OAuthError::Rejected { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("invalid_grant"));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let down = OAuthClient::with_endpoint(
        "http://127.0.0.1:1/ok".to_string(),
        Duration::from_secs(1),
    );
    assert!(matches!(
        down.refresh("some-refresh").await.unwrap_err(),
        OAuthError::Unreachable(_)
    ));
}
