use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use curator_core::{
    load_config, validate_config, wait_until_healthy, CatalogService, Config, DownloadAutomation,
    LogFormat, MetadataProvider, Reconciler, SqliteSyncCache, StashBoxClient, StashClient,
    SyncCache, TpdbClient, Watcher, WhisparrClient,
};

use curator_daemon::api::create_router;
use curator_daemon::state::AppState;

/// Metadata reconciliation and download import for a Stash library.
#[derive(Parser)]
#[command(name = "curator", version, about)]
struct Cli {
    /// Configuration file.
    #[arg(
        long,
        short,
        env = "CURATOR_CONFIG",
        default_value = "curator.toml",
        global = true
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile catalog metadata against the providers once, then exit.
    Sync {
        /// Drop every cache entry before running.
        #[arg(long)]
        reset_cache: bool,
        /// Compute merges without writing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Watch the torrent root and import completed downloads.
    Watch,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    validate_config(&config).context("Configuration validation failed")?;

    init_logging(&config);
    info!(path = %cli.config.display(), "Configuration loaded");

    match cli.command {
        Command::Sync {
            reset_cache,
            dry_run,
        } => sync(config, reset_cache, dry_run).await,
        Command::Watch => watch(config).await,
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    let registry = tracing_subscriber::registry().with(filter);

    match config.logging.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Build the catalog client and wait until it answers.
async fn connect_catalog(config: &Config) -> Result<Arc<StashClient>> {
    let mut catalog = StashClient::new(&config.catalog)
        .context("Failed to create catalog client")?
        .with_retry(config.retry.clone());
    if let Some(stashdb) = &config.providers.stashdb {
        catalog = catalog.with_endpoint(&stashdb.url, &stashdb.name);
    }
    if let Some(tpdb) = &config.providers.tpdb {
        catalog = catalog.with_endpoint(&tpdb.endpoint, &tpdb.name);
    }
    let catalog = Arc::new(catalog);

    info!(url = %config.catalog.url, "Waiting for catalog");
    wait_until_healthy(
        catalog.as_ref(),
        Duration::from_secs(config.catalog.health_timeout_secs),
        Duration::from_millis(config.catalog.health_poll_interval_ms),
    )
    .await
    .context("Catalog did not become healthy")?;

    Ok(catalog)
}

async fn sync(config: Config, reset_cache: bool, dry_run: bool) -> Result<()> {
    let catalog = connect_catalog(&config).await?;

    let cache = Arc::new(
        SqliteSyncCache::open(&config.cache, &config.permissions)
            .with_context(|| format!("Failed to open cache at {:?}", config.cache.path))?,
    );
    if reset_cache {
        let removed = cache.reset().context("Failed to reset cache")?;
        info!(removed, "Cache reset");
    }
    if let Ok(stats) = cache.stats() {
        info!(
            total = stats.total_entries,
            fresh = stats.fresh_entries,
            expired = stats.expired_entries,
            "Cache opened"
        );
    }

    let mut reconciler = Reconciler::new(
        catalog as Arc<dyn CatalogService>,
        cache as Arc<dyn SyncCache>,
        config.reconcile.clone(),
    )
    .with_page_size(config.catalog.page_size)
    .with_dry_run(dry_run);

    for provider in build_providers(&config)? {
        info!(provider = provider.name(), "Provider enabled");
        reconciler = reconciler.with_provider(provider);
    }

    if let Some(whisparr) = &config.automation.whisparr {
        let client = WhisparrClient::new(whisparr.clone())
            .context("Failed to create Whisparr client")?
            .with_retry(config.retry.clone());
        info!(url = %whisparr.url, "Download automation enabled");
        reconciler = reconciler.with_automation(Arc::new(client) as Arc<dyn DownloadAutomation>);
    }

    let report = reconciler.run().await.context("Reconciliation failed")?;

    for ambiguous in &report.ambiguous {
        warn!(
            kind = %ambiguous.kind,
            id = %ambiguous.entity_id,
            provider = %ambiguous.provider,
            candidates = ?ambiguous.candidates,
            "Ambiguous match needs review"
        );
    }
    for failed in &report.failed {
        warn!(kind = %failed.kind, id = %failed.entity_id, reason = %failed.reason, "Entity failed");
    }
    info!(
        report = %serde_json::to_string(&report).unwrap_or_default(),
        "Sync complete"
    );
    Ok(())
}

fn build_providers(config: &Config) -> Result<Vec<Arc<dyn MetadataProvider>>> {
    let mut providers: Vec<Arc<dyn MetadataProvider>> = Vec::new();

    if let Some(stashdb) = &config.providers.stashdb {
        let mut client = StashBoxClient::new(stashdb)
            .context("Failed to create stash-box client")?
            .with_retry(config.retry.clone());
        if let Some(tpdb) = &config.providers.tpdb {
            client = client.with_tpdb_name(&tpdb.name);
        }
        providers.push(Arc::new(client));
    }

    if let Some(tpdb) = &config.providers.tpdb {
        let client = TpdbClient::new(tpdb)
            .context("Failed to create ThePornDB client")?
            .with_retry(config.retry.clone());
        providers.push(Arc::new(client));
    }

    if providers.is_empty() {
        warn!("No metadata providers configured; sync will only refresh the cache");
    }
    Ok(providers)
}

async fn watch(config: Config) -> Result<()> {
    let Some(watcher_config) = config.watcher.clone() else {
        bail!("[watcher] section is required for `curator watch`");
    };

    let catalog = connect_catalog(&config).await?;
    let watcher = Arc::new(Watcher::new(
        watcher_config,
        config.permissions.clone(),
        catalog as Arc<dyn CatalogService>,
    ));
    watcher
        .prepare()
        .await
        .context("Failed to prepare watcher directories")?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let watcher_handle = {
        let watcher = Arc::clone(&watcher);
        tokio::spawn(async move { watcher.run(shutdown_rx).await })
    };

    match config.server.clone() {
        Some(server) => {
            let state = Arc::new(AppState::new(config.clone(), Some(Arc::clone(&watcher))));
            let app = create_router(state);

            let addr = SocketAddr::new(server.host, server.port);
            info!("Starting status server on {}", addr);
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind to {}", addr))?;

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("Server error")?;
        }
        None => shutdown_signal().await,
    }

    info!("Shutting down watcher");
    let _ = shutdown_tx.send(());
    watcher_handle
        .await
        .context("Watcher task panicked")?
        .context("Watcher failed")?;

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
