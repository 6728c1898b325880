//! Courier - command-line driver for the mailsync engine
//!
//! Wires the config directory, the SQLite store, the Gmail provider and
//! the sync runner together. Intended to be run by hand or from cron;
//! every invocation is one trigger.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde::Deserialize;

use mailsync::{
    CancelToken, Credential, CredentialAuthority, CredentialError, CredentialSession,
    GmailProvider, Integration, IntegrationId, MailStore, RunOutcome, SqliteMailStore,
    SyncConfig, SyncRunner, SyncStats, WorkspaceId, cooldown_elapsed,
};

const DB_FILE: &str = "courier.db";

#[derive(Parser, Debug)]
#[command(name = "courier", version, about = "Mirror a mailbox into a local store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register an integration and validate its credential
    Connect {
        /// Workspace that will own the mirrored messages
        #[arg(long)]
        workspace: String,
        /// Account email address the credential belongs to
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "gmail")]
        provider: String,
    },
    /// Run a full snapshot sync (resumes if one was interrupted)
    Full {
        integration_id: String,
    },
    /// Apply remote changes since the last checkpoint
    Incremental {
        integration_id: String,
        /// Skip the cooldown check
        #[arg(long)]
        force: bool,
    },
    /// Show an integration's sync state
    Status {
        integration_id: String,
    },
}

/// Bearer tokens live as JSON files in the config directory, one per
/// integration, written by whatever OAuth flow the user runs out of band.
struct FileCredentialAuthority;

#[derive(Deserialize)]
struct TokenFile {
    access_token: String,
}

impl FileCredentialAuthority {
    fn token_filename(integration_id: &IntegrationId) -> String {
        format!("token-{}.json", integration_id.as_str())
    }
}

impl CredentialAuthority for FileCredentialAuthority {
    fn credential(&self, integration_id: &IntegrationId) -> Result<Credential, CredentialError> {
        let filename = Self::token_filename(integration_id);
        if !config::config_exists(&filename) {
            return Err(CredentialError::Missing(
                integration_id.as_str().to_string(),
            ));
        }
        let token: TokenFile = config::load_json(&filename)
            .map_err(|e| CredentialError::Unavailable(e.to_string()))?;
        Ok(Credential::new(token.access_token))
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_dir = config::init().context("Failed to initialize config directory")?;
    let sync_config = SyncConfig::load()?;
    let store = Arc::new(SqliteMailStore::new(config_dir.join(DB_FILE))?);

    match cli.command {
        Commands::Connect {
            workspace,
            email,
            provider,
        } => connect(store, &sync_config, &workspace, &email, &provider),
        Commands::Full { integration_id } => {
            let id = IntegrationId::new(integration_id);
            let runner = make_runner(store, &sync_config, &id)?;
            report(runner.run_full_sync(&id, &CancelToken::new())?);
            Ok(())
        }
        Commands::Incremental {
            integration_id,
            force,
        } => {
            let id = IntegrationId::new(integration_id);
            let integration = store
                .get_integration(&id)?
                .with_context(|| format!("Unknown integration: {}", id.as_str()))?;
            if !force
                && !cooldown_elapsed(integration.last_sync_at, sync_config.sync_cooldown_secs)
            {
                info!(
                    "last sync was under {}s ago; use --force to sync anyway",
                    sync_config.sync_cooldown_secs
                );
                return Ok(());
            }
            let runner = make_runner(store, &sync_config, &id)?;
            report(runner.run_incremental_sync(&id, &CancelToken::new())?);
            Ok(())
        }
        Commands::Status { integration_id } => {
            status(store.as_ref(), &IntegrationId::new(integration_id))
        }
    }
}

fn connect(
    store: Arc<SqliteMailStore>,
    sync_config: &SyncConfig,
    workspace: &str,
    email: &str,
    provider: &str,
) -> Result<()> {
    let workspace_id = WorkspaceId::new(workspace);
    let id = match store.find_integration(&workspace_id, provider, email)? {
        Some(existing) => {
            info!("integration {} already exists", existing.id.as_str());
            existing.id
        }
        None => {
            let id = IntegrationId::new(format!("{}-{}", provider, email));
            let integration = Integration::new(
                id.clone(),
                workspace_id,
                provider,
                email,
                FileCredentialAuthority::token_filename(&id),
            );
            store.create_integration(integration)?;
            info!("created integration {}", id.as_str());
            id
        }
    };

    let runner = make_runner(store, sync_config, &id)?;
    runner.authorize(&id)?;
    println!(
        "integration {} authorized; run `courier full {}` to start mirroring",
        id.as_str(),
        id.as_str()
    );
    Ok(())
}

/// Build a runner whose provider session carries the integration's token
fn make_runner(
    store: Arc<SqliteMailStore>,
    sync_config: &SyncConfig,
    id: &IntegrationId,
) -> Result<SyncRunner> {
    let credential = FileCredentialAuthority
        .credential(id)
        .with_context(|| format!("No usable credential for {}", id.as_str()))?;
    let session = CredentialSession::new(credential, sync_config.http_timeout());
    let provider = GmailProvider::new(session);
    SyncRunner::new(Box::new(provider), store, sync_config.clone())
}

fn report(outcome: RunOutcome) {
    match outcome {
        RunOutcome::Completed(stats) => print_stats(&stats),
        RunOutcome::AlreadyRunning => {
            warn!("another sync run is active; nothing to do");
        }
    }
}

fn print_stats(stats: &SyncStats) {
    println!(
        "synced: {} upserted, {} deleted, {} label updates, {} errors, {} pages in {}ms{}",
        stats.messages_upserted,
        stats.messages_deleted,
        stats.label_updates,
        stats.errors,
        stats.pages,
        stats.duration_ms,
        if stats.capped { " (capped)" } else { "" }
    );
}

fn status(store: &SqliteMailStore, id: &IntegrationId) -> Result<()> {
    let Some(integration) = store.get_integration(id)? else {
        bail!("Unknown integration: {}", id.as_str());
    };
    println!("integration:  {}", integration.id.as_str());
    println!("workspace:    {}", integration.workspace_id.as_str());
    println!(
        "account:      {} ({})",
        integration.account_email, integration.provider
    );
    println!("status:       {}", integration.status.as_str());
    println!(
        "checkpoint:   {}",
        integration
            .last_checkpoint
            .as_ref()
            .map(|c| c.as_str())
            .unwrap_or("-")
    );
    println!(
        "last sync:    {}",
        integration
            .last_sync_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("total synced: {}", integration.total_synced);
    if let Some(token) = &integration.resume_page_token {
        println!("resume token: {}", token);
    }
    if let Some(err) = &integration.last_error {
        println!("last error:   {}", err);
    }
    println!(
        "mirrored:     {} messages",
        store.count_messages(&integration.workspace_id)?
    );
    Ok(())
}
