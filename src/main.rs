//! claude-accounts - CLI entry point.

use std::io::Write as _;
use std::process::Command;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use claude_accounts::api;
use claude_accounts::config::Config;
use claude_accounts::oauth::OAuthClient;
use claude_accounts::util::home_dir;
use claude_accounts::vault::{AuthType, TokenStatus, Vault, API_KEY_VAR, OAUTH_TOKEN_VAR};

#[derive(Parser)]
#[command(name = "claude-accounts", version, about = "Manage multiple Claude accounts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add an account
    Add {
        name: String,
        /// Store a static API key
        #[arg(long)]
        key: Option<String>,
        /// Create an OAuth account (authenticate later with `login`)
        #[arg(long)]
        oauth: bool,
    },
    /// Run the CLI's login flow and capture the resulting tokens
    Login { name: String },
    /// List accounts
    List,
    /// Show token status for an account
    Status { name: String },
    /// Force an OAuth token refresh
    Refresh { name: String },
    /// Launch the CLI under an account, forwarding extra arguments
    Launch {
        name: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Remove an account
    Remove {
        name: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Print shell aliases for all accounts
    Aliases,
    /// Write the alias file and source it from the shell rc
    Install,
    /// Print all accounts, decrypted, as JSON
    Export,
    /// Import accounts from an export file
    Import { file: String },
    /// Run the HTTP server and browser terminal
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "claude_accounts=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    if let Commands::Serve { host, port } = &cli.command {
        if let Some(host) = host {
            config.host = host.clone();
        }
        if let Some(port) = port {
            config.port = *port;
        }
        return api::serve(config).await;
    }

    let refresher = Arc::new(OAuthClient::new(config.refresh_timeout));
    let vault = Arc::new(Vault::open(&config, refresher).await?);

    match cli.command {
        Commands::Add { name, key, oauth } => {
            let auth_type = match (&key, oauth) {
                (Some(_), false) => AuthType::ApiKey,
                (None, true) => AuthType::OAuth,
                _ => bail!("Specify exactly one of --key <api-key> or --oauth"),
            };
            let id = vault.create_account(&name, auth_type, key.as_deref()).await?;
            let view = vault.get_account(&id).await?;
            println!("Added {} account '{}' ({})", auth_type.as_str(), view.name, id);
            if auth_type == AuthType::OAuth {
                println!("Authenticate with: claude-accounts login {}", view.name);
            }
        }
        Commands::Login { name } => {
            let id = match vault.find_account_id(&name).await {
                Ok(id) => id,
                Err(_) => {
                    let id = vault.create_account(&name, AuthType::OAuth, None).await?;
                    println!("Created OAuth account '{}'", name);
                    id
                }
            };

            println!(
                "Launching '{}' with no credentials. Run /login inside it, then exit.",
                config.cli_path
            );
            let status = Command::new(&config.cli_path)
                .env_remove(API_KEY_VAR)
                .env_remove(OAUTH_TOKEN_VAR)
                .status()
                .with_context(|| format!("Failed to run '{}'", config.cli_path))?;
            if !status.success() {
                tracing::warn!("CLI exited with {}; trying to capture anyway", status);
            }

            let info = vault.capture_oauth_tokens(&id, None).await?;
            println!("Captured token {} (refresh token: {})", info.token_preview,
                if info.has_refresh { "yes" } else { "no" });
            if let Some(min) = info.expires_in_min {
                println!("Expires in {} min", min);
            }
        }
        Commands::List => {
            let accounts = vault.list_accounts().await?;
            if accounts.is_empty() {
                println!("No accounts. Add one with: claude-accounts add <name> --key <api-key>");
            }
            for view in accounts {
                println!(
                    "{:<20} {:<8} {:<24} last used: {}",
                    view.name,
                    view.auth_type.as_str(),
                    view.credential_preview.as_deref().unwrap_or("(no credential)"),
                    view.last_used.as_deref().unwrap_or("never"),
                );
            }
        }
        Commands::Status { name } => {
            let id = vault.find_account_id(&name).await?;
            match vault.token_status(&id).await? {
                TokenStatus::NotFound => println!("{}: not found", name),
                TokenStatus::Missing => println!("{}: no API key stored", name),
                TokenStatus::NeedsLogin => {
                    println!("{}: needs login (claude-accounts login {})", name, name)
                }
                TokenStatus::Expired { has_refresh } => println!(
                    "{}: expired ({})",
                    name,
                    if has_refresh {
                        "refresh token available"
                    } else {
                        "re-login required"
                    }
                ),
                TokenStatus::Ok { expires_in_min } => match expires_in_min {
                    Some(min) => println!("{}: ok, expires in {} min", name, min),
                    None => println!("{}: ok", name),
                },
            }
        }
        Commands::Refresh { name } => {
            let id = vault.find_account_id(&name).await?;
            let outcome = vault.refresh_account(&id).await?;
            println!(
                "Refreshed {}: {} (expires in {} min)",
                name, outcome.token_preview, outcome.expires_in_min
            );
        }
        Commands::Launch { name, args } => {
            let id = vault.find_account_id(&name).await?;
            let creds = vault.resolve_launch_credentials(&id).await?;

            let status = Command::new(&config.cli_path)
                .args(&args)
                .env_remove(API_KEY_VAR)
                .env_remove(OAUTH_TOKEN_VAR)
                .env(creds.env_var, &creds.secret)
                .status()
                .with_context(|| format!("Failed to run '{}'", config.cli_path))?;
            std::process::exit(status.code().unwrap_or(1));
        }
        Commands::Remove { name, yes } => {
            let id = vault.find_account_id(&name).await?;
            if !yes {
                print!("Remove account '{}'? [y/N] ", name);
                std::io::stdout().flush()?;
                let mut answer = String::new();
                std::io::stdin().read_line(&mut answer)?;
                if !matches!(answer.trim(), "y" | "Y" | "yes") {
                    println!("Aborted");
                    return Ok(());
                }
            }
            vault.delete_account(&id).await?;
            println!("Removed '{}'", name);
        }
        Commands::Aliases => {
            print!("{}", api::accounts::alias_script(&vault, &config.cli_path).await?);
        }
        Commands::Install => {
            let script = api::accounts::alias_script(&vault, &config.cli_path).await?;
            let alias_path = config.vault_dir.join("aliases.sh");
            std::fs::create_dir_all(&config.vault_dir)?;
            std::fs::write(&alias_path, &script)?;
            claude_accounts::vault::cipher::restrict_permissions(&alias_path)?;
            println!("Wrote {}", alias_path.display());

            let source_line = format!("source {}", alias_path.display());
            for rc in [".bashrc", ".zshrc"] {
                let rc_path = std::path::Path::new(&home_dir()).join(rc);
                if !rc_path.exists() {
                    continue;
                }
                let contents = std::fs::read_to_string(&rc_path)?;
                if contents.contains(&source_line) {
                    continue;
                }
                let mut file = std::fs::OpenOptions::new().append(true).open(&rc_path)?;
                writeln!(file, "\n# claude-accounts aliases\n{}", source_line)?;
                println!("Updated {}", rc_path.display());
            }
        }
        Commands::Export => {
            let doc = api::types::AccountsDocument {
                accounts: vault.export_all().await?,
            };
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        Commands::Import { file } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file))?;
            let doc: api::types::AccountsDocument = serde_json::from_str(&contents)
                .with_context(|| format!("{} is not a valid export file", file))?;
            let imported = vault.import_accounts(doc.accounts).await?;
            println!("Imported {} account(s)", imported);
        }
        Commands::Serve { .. } => unreachable!("handled above"),
    }

    Ok(())
}
