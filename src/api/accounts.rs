//! Account REST handlers and shell-alias generation.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};

use super::routes::AppState;
use super::types::*;
use crate::util::shell_quote;
use crate::vault::{AccountUpdate, AccountView, CaptureInfo, Vault, VaultError};

/// Map a vault failure to an HTTP status plus a user-actionable message.
pub fn error_response(e: VaultError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &e {
        VaultError::InvalidName(_) | VaultError::NotOAuth(_) | VaultError::NoRefreshToken(_) => {
            StatusCode::BAD_REQUEST
        }
        VaultError::DuplicateName(_) => StatusCode::CONFLICT,
        VaultError::AccountNotFound(_) => StatusCode::NOT_FOUND,
        VaultError::MissingCredential(_) | VaultError::CredentialExpired(_) => StatusCode::CONFLICT,
        VaultError::Refresh(_) => StatusCode::BAD_GATEWAY,
        VaultError::CredentialFile(crate::credentials::CredentialFileError::NotFound(_, _)) => {
            StatusCode::NOT_FOUND
        }
        VaultError::CredentialFile(_) => StatusCode::BAD_REQUEST,
        VaultError::Storage(_) | VaultError::Key(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AccountView>>, ApiError> {
    state
        .vault
        .list_accounts()
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<AccountView>), ApiError> {
    let id = state
        .vault
        .create_account(&req.name, req.auth_type, req.api_key.as_deref())
        .await
        .map_err(error_response)?;
    let view = state.vault.get_account(&id).await.map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn update_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<AccountUpdate>,
) -> Result<Json<AccountView>, ApiError> {
    state
        .vault
        .update_account(&id, update)
        .await
        .map_err(error_response)?;
    state
        .vault
        .get_account(&id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .vault
        .delete_account(&id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn account_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AccountStatusResponse>, ApiError> {
    let view = state.vault.get_account(&id).await.map_err(error_response)?;
    let status = state
        .vault
        .token_status(&id)
        .await
        .map_err(error_response)?;
    Ok(Json(AccountStatusResponse {
        id: view.id,
        name: view.name,
        status,
    }))
}

pub async fn capture_oauth(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    req: Option<Json<CaptureRequest>>,
) -> Result<Json<CaptureInfo>, ApiError> {
    let path = req
        .and_then(|Json(r)| r.credentials_path)
        .map(PathBuf::from);
    state
        .vault
        .capture_oauth_tokens(&id, path.as_deref())
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn refresh_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let outcome = state
        .vault
        .refresh_account(&id)
        .await
        .map_err(error_response)?;
    Ok(Json(RefreshResponse {
        token_preview: outcome.token_preview,
        expires_in_min: outcome.expires_in_min,
    }))
}

pub async fn launch_command(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LaunchResponse>, ApiError> {
    let view = state.vault.get_account(&id).await.map_err(error_response)?;
    let creds = state
        .vault
        .resolve_launch_credentials(&id)
        .await
        .map_err(error_response)?;

    let command = format!(
        "{}={} {}",
        creds.env_var,
        shell_quote(&creds.secret),
        state.config.cli_path
    );
    let alias = format!("alias claude-{}={}", view.name, shell_quote(&command));
    Ok(Json(LaunchResponse {
        command,
        alias,
        env_var: creds.env_var.to_string(),
    }))
}

/// Shell script defining `claude-<name>` aliases for every account.
/// Accounts that cannot resolve are rendered as comments so one broken
/// account never breaks the script.
pub async fn alias_script(vault: &Vault, cli_path: &str) -> Result<String, VaultError> {
    let mut script = String::from("# Aliases generated by claude-accounts\n");
    for view in vault.list_accounts().await? {
        match vault.resolve_launch_credentials(&view.id).await {
            Ok(creds) => {
                let command = format!("{}={} {}", creds.env_var, shell_quote(&creds.secret), cli_path);
                script.push_str(&format!(
                    "alias claude-{}={}\n",
                    view.name,
                    shell_quote(&command)
                ));
            }
            Err(e) => {
                script.push_str(&format!("# {}: {}\n", view.name, e));
            }
        }
    }
    Ok(script)
}

pub async fn aliases(State(state): State<Arc<AppState>>) -> Result<String, ApiError> {
    alias_script(&state.vault, &state.config.cli_path)
        .await
        .map_err(error_response)
}

pub async fn export_accounts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AccountsDocument>, ApiError> {
    state
        .vault
        .export_all()
        .await
        .map(|accounts| Json(AccountsDocument { accounts }))
        .map_err(error_response)
}

pub async fn import_accounts(
    State(state): State<Arc<AppState>>,
    Json(doc): Json<AccountsDocument>,
) -> Result<Json<ImportResponse>, ApiError> {
    state
        .vault
        .import_accounts(doc.accounts)
        .await
        .map(|imported| Json(ImportResponse { imported }))
        .map_err(error_response)
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
