#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

use anyhow::{Context, Result, bail};
use clap::Parser;
use console::style;
use dialoguer::Confirm;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod cli;

use cli::{Cli, CloudCommand, Command, SessionCommand};
use driftvault::chat::{ChatProvider, ChunkStream};
use driftvault::cloud::{HttpBlobStore, TokenManager};
use driftvault::config::Config;
use driftvault::error::ChatError;
use driftvault::session::types::{ImageAttachment, Message, SessionSettings};
use driftvault::session::SessionManager;
use driftvault::snapshot;
use driftvault::store::{ProgressFn, RestorePhase, SessionStore, SqliteSessionStore};
use driftvault::sync::SyncOrchestrator;

/// The CLI manages session data only; AI calls are blocked until a real
/// provider is configured.
struct DetachedProvider;

impl ChatProvider for DetachedProvider {
    fn has_valid_api_key(&self) -> bool {
        false
    }

    fn initialize<'a>(
        &'a self,
        _history: &'a [Message],
        _settings: &'a SessionSettings,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async { Ok(()) })
    }

    fn send_message<'a>(
        &'a self,
        _text: &'a str,
        _attachments: &'a [ImageAttachment],
    ) -> Pin<Box<dyn Future<Output = Result<ChunkStream>> + Send + 'a>> {
        Box::pin(async { Err(ChatError::MissingApiKey.into()) })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("set tracing subscriber")?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let store: Arc<dyn SessionStore> =
        Arc::new(SqliteSessionStore::open(config.store_path()).await?);

    match cli.command {
        Command::Sessions { command } => sessions(command, &config, store).await,
        Command::Export { file } => export(&file, &store).await,
        Command::Import { file, yes } => import(&file, yes, &store).await,
        Command::Sync { quiet } => run_sync(quiet, &config, store).await,
        Command::Recover => recover(&store).await,
        Command::Cloud { command } => cloud(command, &config, store).await,
    }
}

async fn sessions(
    command: SessionCommand,
    config: &Config,
    store: Arc<dyn SessionStore>,
) -> Result<()> {
    let manager = SessionManager::new(
        store,
        Arc::new(DetachedProvider),
        config.autosave_debounce(),
    );

    match command {
        SessionCommand::List => {
            let sessions = manager.list_sessions().await?;
            if sessions.is_empty() {
                println!("no sessions");
                return Ok(());
            }
            for session in sessions {
                println!(
                    "{}  {}  {}",
                    style(&session.id).dim(),
                    style(&session.title).bold(),
                    session.updated_at.format("%Y-%m-%d %H:%M"),
                );
            }
        }
        SessionCommand::New => {
            let session = manager.create_session(false).await?;
            println!("created {}", style(&session.id).bold());
        }
        SessionCommand::Duplicate { id } => {
            let copy = manager.duplicate_session(&id).await?;
            println!("duplicated {} -> {}", id, style(&copy.id).bold());
        }
        SessionCommand::Delete { id } => {
            if manager.delete_session(&id).await? {
                println!("deleted {id}");
            } else {
                println!("no such session: {id}");
            }
        }
    }
    manager.flush().await;
    Ok(())
}

async fn export(file: &Path, store: &Arc<dyn SessionStore>) -> Result<()> {
    let exported = store.export_snapshot().await?;
    tokio::fs::write(file, snapshot::to_json_pretty(&exported))
        .await
        .with_context(|| format!("write {}", file.display()))?;
    println!(
        "exported {} sessions to {}",
        exported.sessions.len(),
        file.display()
    );
    Ok(())
}

async fn import(file: &Path, yes: bool, store: &Arc<dyn SessionStore>) -> Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("read {}", file.display()))?;
    let parsed = snapshot::parse(&raw)?;

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Replace ALL local sessions with the {} sessions from {}?",
                parsed.sessions.len(),
                file.display()
            ))
            .default(false)
            .interact()
            .context("read confirmation")?;
        if !confirmed {
            println!("aborted");
            return Ok(());
        }
    }

    let progress: ProgressFn = Box::new(|phase, batch| {
        let label = match phase {
            RestorePhase::Clearing => "clearing",
            RestorePhase::Sessions => "sessions",
            RestorePhase::Content => "content",
        };
        tracing::info!(batch, "restore: {label}");
    });
    store.restore_snapshot(&parsed, Some(progress)).await?;
    println!(
        "{} restored {} sessions",
        style("✓").green(),
        parsed.sessions.len()
    );
    Ok(())
}

async fn run_sync(quiet: bool, config: &Config, store: Arc<dyn SessionStore>) -> Result<()> {
    let tokens = token_manager(config, Arc::clone(&store)).await?;
    if !tokens.is_connected().await {
        if quiet {
            tracing::info!("cloud not connected, skipping background sync");
            return Ok(());
        }
        bail!("not connected to the cloud store; run `driftvault cloud connect <auth-code>` first");
    }

    let blob = Arc::new(HttpBlobStore::new(config.api_base()?, Arc::clone(&tokens)));
    let orchestrator = SyncOrchestrator::new(store, blob, config.sync_options())
        .with_token_manager(tokens);

    if quiet {
        if let Some(outcome) = orchestrator.sync_quiet().await {
            tracing::info!(%outcome, "background sync finished");
        }
        return Ok(());
    }

    let outcome = orchestrator.sync().await?;
    println!("{} {outcome}", style("✓").green());
    Ok(())
}

async fn recover(store: &Arc<dyn SessionStore>) -> Result<()> {
    let recovered = store.recover_orphans().await?;
    if recovered.is_empty() {
        println!("no orphaned sessions found");
    } else {
        for session in &recovered {
            println!("recovered {}  {}", style(&session.id).dim(), session.title);
        }
        println!("{} repaired {} sessions", style("✓").green(), recovered.len());
    }
    Ok(())
}

async fn cloud(
    command: CloudCommand,
    config: &Config,
    store: Arc<dyn SessionStore>,
) -> Result<()> {
    let tokens = token_manager(config, store).await?;
    match command {
        CloudCommand::Connect { auth_code } => {
            tokens.connect(&auth_code).await?;
            println!("{} connected", style("✓").green());
        }
        CloudCommand::Disconnect => {
            tokens.invalidate_and_clear().await;
            println!("disconnected");
        }
        CloudCommand::Status => {
            if tokens.is_connected().await {
                println!("connected");
            } else {
                println!("not connected");
            }
        }
    }
    Ok(())
}

async fn token_manager(
    config: &Config,
    store: Arc<dyn SessionStore>,
) -> Result<Arc<TokenManager>> {
    let manager = Arc::new(TokenManager::new(
        store,
        config.token_url()?,
        config.cloud.app_key.clone(),
    ));
    manager.load().await?;
    Ok(manager)
}
