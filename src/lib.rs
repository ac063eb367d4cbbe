//! claude-accounts - multi-account credential manager for the Claude CLI.
//!
//! Stores any number of Anthropic identities (static API keys and Claude
//! Code OAuth token pairs) encrypted at rest, launches the `claude` CLI
//! under any of them, keeps OAuth tokens fresh, and serves a
//! browser-hosted terminal over WebSocket.

pub mod api;
pub mod config;
pub mod credentials;
pub mod oauth;
pub mod relay;
pub mod util;
pub mod vault;

pub use config::Config;
pub use oauth::{OAuthClient, TokenRefresher};
pub use relay::{SessionEvent, SessionMode, SessionRelay};
pub use vault::{AuthType, TokenStatus, Vault, VaultError};
