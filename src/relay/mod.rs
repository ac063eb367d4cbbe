//! Terminal session relay.
//!
//! Each session wraps one spawned `claude` process attached to a PTY.
//! Output is pumped to the caller as ordered events; input and resize
//! requests travel the other way through a writer thread that owns the
//! PTY master. Sessions die exactly once, from whichever of process
//! exit, explicit stop, or caller disconnect comes first.

pub mod watcher;

use portable_pty::{native_pty_system, Child, CommandBuilder, PtySize};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::config::Config;
use crate::credentials::CredentialFile;
use crate::util::home_dir;
use crate::vault::{Vault, VaultError, API_KEY_VAR, OAUTH_TOKEN_VAR};

/// Largest terminal geometry a resize request may carry.
const MAX_DIM: u16 = 1000;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Credential(#[from] VaultError),

    #[error("Failed to start terminal: {0}")]
    SpawnFailed(String),

    #[error("Failed to allocate PTY: {0}")]
    Pty(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Normal,
    /// Spawn with no identity variables so the CLI runs its own login
    /// flow, and watch the credential file for the resulting tokens.
    LoginCapture,
}

/// Events delivered to the session's caller, in order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    TerminalStarted,
    TerminalOutput {
        data: String,
    },
    TerminalExit,
    TerminalError {
        message: String,
    },
    LoginComplete {
        account_id: String,
        token_preview: String,
        has_refresh: bool,
        expires_in_min: Option<i64>,
    },
}

enum PtyCommand {
    Input(Vec<u8>),
    Resize { rows: u16, cols: u16 },
}

struct Session {
    input_tx: mpsc::UnboundedSender<PtyCommand>,
    child: Arc<std::sync::Mutex<Box<dyn Child + Send + Sync>>>,
    watcher_stop: Arc<AtomicBool>,
}

/// Owns the live session table. Shared behind `Arc`; the map lock is
/// held only while the table itself is mutated, never across I/O.
pub struct SessionRelay {
    vault: Arc<Vault>,
    config: Config,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionRelay {
    pub fn new(vault: Arc<Vault>, config: Config) -> Self {
        Self {
            vault,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn the CLI for `account_id` and begin relaying its terminal.
    /// An existing session under the same key is stopped first.
    pub async fn start(
        self: Arc<Self>,
        session_key: &str,
        account_id: &str,
        cwd: Option<&str>,
        mode: SessionMode,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<(), RelayError> {
        self.stop(session_key).await;

        // LoginCapture deliberately runs the CLI with no identity at all.
        let creds = match mode {
            SessionMode::Normal => Some(self.vault.resolve_launch_credentials(account_id).await?),
            SessionMode::LoginCapture => {
                // Session start should still fail loudly for a bad id.
                self.vault.get_account(account_id).await?;
                None
            }
        };

        let cwd = match cwd {
            Some(dir) if Path::new(dir).is_dir() => dir.to_string(),
            _ => home_dir(),
        };

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| RelayError::Pty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&self.config.cli_path);
        cmd.cwd(&cwd);
        cmd.env("TERM", "xterm-256color");
        // The CLI treats these as mutually exclusive identity signals, so
        // both inherited values are dropped before one is injected.
        cmd.env_remove(API_KEY_VAR);
        cmd.env_remove(OAUTH_TOKEN_VAR);
        if let Some(creds) = creds {
            cmd.env(creds.env_var, &creds.secret);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| RelayError::SpawnFailed(e.to_string()))?;
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| RelayError::Pty(e.to_string()))?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| RelayError::Pty(e.to_string()))?;

        let child = Arc::new(std::sync::Mutex::new(child));
        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<PtyCommand>();
        let watcher_stop = Arc::new(AtomicBool::new(false));

        // Writer thread owns the master so resize and input stay ordered.
        let master = pair.master;
        tokio::task::spawn_blocking(move || {
            use std::io::Write;
            while let Some(cmd) = input_rx.blocking_recv() {
                match cmd {
                    PtyCommand::Input(bytes) => {
                        let _ = writer.write_all(&bytes);
                        let _ = writer.flush();
                    }
                    PtyCommand::Resize { rows, cols } => {
                        let _ = master.resize(PtySize {
                            rows,
                            cols,
                            pixel_width: 0,
                            pixel_height: 0,
                        });
                    }
                }
            }
        });

        // Reader thread: ordered output until EOF or descriptor error.
        let output_events = events.clone();
        let reader_task = tokio::task::spawn_blocking(move || {
            use std::io::Read;
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let data = String::from_utf8_lossy(&buf[..n]).to_string();
                        if output_events
                            .send(SessionEvent::TerminalOutput { data })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(
                session_key.to_string(),
                Session {
                    input_tx,
                    child,
                    watcher_stop: watcher_stop.clone(),
                },
            );
        }

        let _ = events.send(SessionEvent::TerminalStarted);
        tracing::info!(session = session_key, account = account_id, cwd = %cwd, "Terminal session started");

        if mode == SessionMode::LoginCapture {
            let credential_file = CredentialFile::new(
                self.config.credentials_path.clone(),
                self.config.cli_path.clone(),
            );
            tokio::spawn(watcher::watch(
                self.vault.clone(),
                account_id.to_string(),
                credential_file,
                self.config.login_poll_interval,
                self.config.login_settle_delay,
                watcher_stop,
                events.clone(),
            ));
        }

        // Supervisor: when the reader ends the process is gone; announce
        // the exit and tear the session down.
        let relay = self.clone();
        let session_key = session_key.to_string();
        tokio::spawn(async move {
            let _ = reader_task.await;
            let _ = events.send(SessionEvent::TerminalExit);
            relay.stop(&session_key).await;
        });

        Ok(())
    }

    /// Forward bytes to the child's terminal. Silently dropped when the
    /// session is not running.
    pub async fn write_input(&self, session_key: &str, data: &[u8]) {
        let sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(session_key) {
            let _ = session.input_tx.send(PtyCommand::Input(data.to_vec()));
        }
    }

    /// Apply a window-size change. Out-of-range dimensions are ignored.
    pub async fn resize(&self, session_key: &str, rows: u16, cols: u16) {
        if rows == 0 || cols == 0 || rows > MAX_DIM || cols > MAX_DIM {
            return;
        }
        let sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(session_key) {
            let _ = session.input_tx.send(PtyCommand::Resize { rows, cols });
        }
    }

    /// Tear a session down. Removing the record under the map lock makes
    /// this idempotent across all three triggers; unknown keys are a
    /// no-op.
    pub async fn stop(&self, session_key: &str) {
        let session = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(session_key)
        };
        let Some(session) = session else {
            return;
        };

        session.watcher_stop.store(true, Ordering::SeqCst);
        drop(session.input_tx);

        let child = session.child;
        let _ = tokio::task::spawn_blocking(move || {
            if let Ok(mut child) = child.lock() {
                let _ = child.kill();
                let _ = child.try_wait();
            }
        })
        .await;

        tracing::info!(session = session_key, "Terminal session stopped");
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
