//! SQLite-backed account records.
//!
//! One connection behind an async mutex, with every public operation run
//! as a single statement (or transaction) inside `spawn_blocking`, so
//! each read/modify/write is atomic against the backing store.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::cipher::restrict_permissions;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS accounts (
    id                  TEXT PRIMARY KEY,
    name                TEXT UNIQUE NOT NULL,
    auth_type           TEXT NOT NULL CHECK(auth_type IN ('api_key', 'oauth')),
    api_key_enc         TEXT NOT NULL DEFAULT '',
    access_token_enc    TEXT NOT NULL DEFAULT '',
    refresh_token_enc   TEXT NOT NULL DEFAULT '',
    expires_at          INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL,
    last_used           TEXT
);

CREATE INDEX IF NOT EXISTS idx_accounts_name ON accounts(name);
"#;

/// One account row, credential columns still encrypted.
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub id: String,
    pub name: String,
    pub auth_type: String,
    pub api_key_enc: String,
    pub access_token_enc: String,
    pub refresh_token_enc: String,
    pub expires_at: i64,
    pub created_at: String,
    pub last_used: Option<String>,
}

pub struct AccountStore {
    conn: Arc<Mutex<Connection>>,
}

fn now_string() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<AccountRecord, rusqlite::Error> {
    Ok(AccountRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        auth_type: row.get(2)?,
        api_key_enc: row.get(3)?,
        access_token_enc: row.get(4)?,
        refresh_token_enc: row.get(5)?,
        expires_at: row.get(6)?,
        created_at: row.get(7)?,
        last_used: row.get(8)?,
    })
}

const COLUMNS: &str = "id, name, auth_type, api_key_enc, access_token_enc, \
                       refresh_token_enc, expires_at, created_at, last_used";

impl AccountStore {
    /// Open (or create) the database at `db_path` and apply the schema.
    pub async fn open(db_path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Failed to create vault directory: {}", e))?;
        }

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| format!("Failed to open accounts database: {}", e))?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| format!("Failed to run schema: {}", e))?;
            restrict_permissions(&db_path)
                .map_err(|e| format!("Failed to restrict database permissions: {}", e))?;
            Ok::<_, String>(conn)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn insert(&self, record: AccountRecord) -> Result<(), String> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO accounts
                 (id, name, auth_type, api_key_enc, access_token_enc, refresh_token_enc, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    record.name,
                    record.auth_type,
                    record.api_key_enc,
                    record.access_token_enc,
                    record.refresh_token_enc,
                    record.expires_at,
                    now_string(),
                ],
            )
            .map_err(|e| e.to_string())?;
            Ok(())
        })
        .await
        .map_err(|e| e.to_string())?
    }

    pub async fn get(&self, id: &str) -> Result<Option<AccountRecord>, String> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row(
                &format!("SELECT {} FROM accounts WHERE id = ?1", COLUMNS),
                params![id],
                row_to_record,
            )
            .optional()
            .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| e.to_string())?
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<AccountRecord>, String> {
        let conn = self.conn.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row(
                &format!("SELECT {} FROM accounts WHERE name = ?1", COLUMNS),
                params![name],
                row_to_record,
            )
            .optional()
            .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| e.to_string())?
    }

    pub async fn list(&self) -> Result<Vec<AccountRecord>, String> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM accounts ORDER BY created_at",
                    COLUMNS
                ))
                .map_err(|e| e.to_string())?;
            let records = stmt
                .query_map([], row_to_record)
                .map_err(|e| e.to_string())?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.to_string())?;
            Ok(records)
        })
        .await
        .map_err(|e| e.to_string())?
    }

    /// Overwrite mutable columns of an existing row in one statement.
    /// Returns false if the row does not exist.
    pub async fn update(&self, record: AccountRecord) -> Result<bool, String> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let rows = conn
                .execute(
                    "UPDATE accounts SET name = ?1, api_key_enc = ?2, access_token_enc = ?3,
                            refresh_token_enc = ?4, expires_at = ?5
                     WHERE id = ?6",
                    params![
                        record.name,
                        record.api_key_enc,
                        record.access_token_enc,
                        record.refresh_token_enc,
                        record.expires_at,
                        record.id,
                    ],
                )
                .map_err(|e| e.to_string())?;
            Ok(rows > 0)
        })
        .await
        .map_err(|e| e.to_string())?
    }

    /// Replace an account's OAuth material in one statement.
    pub async fn set_oauth_tokens(
        &self,
        id: &str,
        access_token_enc: &str,
        refresh_token_enc: &str,
        expires_at: i64,
    ) -> Result<bool, String> {
        let conn = self.conn.clone();
        let id = id.to_string();
        let access = access_token_enc.to_string();
        let refresh = refresh_token_enc.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let rows = conn
                .execute(
                    "UPDATE accounts SET access_token_enc = ?1, refresh_token_enc = ?2, expires_at = ?3
                     WHERE id = ?4",
                    params![access, refresh, expires_at, id],
                )
                .map_err(|e| e.to_string())?;
            Ok(rows > 0)
        })
        .await
        .map_err(|e| e.to_string())?
    }

    pub async fn touch_last_used(&self, id: &str) -> Result<(), String> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "UPDATE accounts SET last_used = ?1 WHERE id = ?2",
                params![now_string(), id],
            )
            .map_err(|e| e.to_string())?;
            Ok(())
        })
        .await
        .map_err(|e| e.to_string())?
    }

    pub async fn delete(&self, id: &str) -> Result<bool, String> {
        let conn = self.conn.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let rows = conn
                .execute("DELETE FROM accounts WHERE id = ?1", params![id])
                .map_err(|e| e.to_string())?;
            Ok(rows > 0)
        })
        .await
        .map_err(|e| e.to_string())?
    }
}
