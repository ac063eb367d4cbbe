//! Polling watcher for the CLI's credential file during login capture.
//!
//! The CLI writes its credential file at the end of its own login flow.
//! There is no notification channel for a file another program owns, so
//! the watcher compares modification times on an interval, waits a short
//! settle delay after a change so it never reads a half-written file,
//! then pulls the tokens into the vault.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;

use super::SessionEvent;
use crate::credentials::CredentialFile;
use crate::vault::Vault;

/// Poll until the credential file changes and a capture succeeds, the
/// stop flag is raised, or the events channel closes.
pub async fn watch(
    vault: Arc<Vault>,
    account_id: String,
    credential_file: CredentialFile,
    poll_interval: Duration,
    settle_delay: Duration,
    stop: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut baseline: Option<SystemTime> = credential_file.modified();
    tracing::debug!(account = %account_id, "Watching credential file for login");

    loop {
        tokio::time::sleep(poll_interval).await;
        if stop.load(Ordering::SeqCst) || events.is_closed() {
            return;
        }

        let current = credential_file.modified();
        if !advanced(baseline, current) {
            continue;
        }

        tokio::time::sleep(settle_delay).await;
        if stop.load(Ordering::SeqCst) {
            return;
        }

        match vault
            .capture_oauth_tokens(&account_id, Some(credential_file.path()))
            .await
        {
            Ok(info) => {
                tracing::info!(account = %account_id, "Login detected, tokens captured");
                let _ = events.send(SessionEvent::LoginComplete {
                    account_id,
                    token_preview: info.token_preview,
                    has_refresh: info.has_refresh,
                    expires_in_min: info.expires_in_min,
                });
                return;
            }
            Err(e) => {
                // The change was not a completed login; rebaseline and
                // keep watching.
                tracing::debug!(account = %account_id, error = %e, "Credential file changed but capture failed");
                baseline = current;
            }
        }
    }
}

fn advanced(baseline: Option<SystemTime>, current: Option<SystemTime>) -> bool {
    match (baseline, current) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(before), Some(now)) => now > before,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_detection() {
        let earlier = SystemTime::UNIX_EPOCH;
        let later = earlier + Duration::from_secs(5);

        assert!(!advanced(None, None));
        assert!(!advanced(Some(earlier), None));
        assert!(advanced(None, Some(earlier)));
        assert!(advanced(Some(earlier), Some(later)));
        assert!(!advanced(Some(later), Some(earlier)));
        assert!(!advanced(Some(earlier), Some(earlier)));
    }
}
