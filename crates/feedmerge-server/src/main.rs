mod cleanup;
mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use feedmerge_api::flows::DbFlowStore;
use feedmerge_api::linker::AccountLinker;
use feedmerge_api::session::TokenVault;
use feedmerge_api::{AppState, AppStateInner, build_router};
use feedmerge_crypto::TokenCipher;
use feedmerge_crypto::keys::{generate_key, key_to_base64};
use feedmerge_db::Database;
use feedmerge_oauth::OAuthBroker;
use feedmerge_oauth::flow::random_token;
use feedmerge_scheduler::{HttpPublisher, PublisherEndpoints, Scheduler};

use crate::config::ServerConfig;

#[derive(Parser)]
#[command(name = "feedmerge", about = "Social account linking and cross-platform post scheduling")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and the publish scheduler (default)
    Serve,
    /// Print a fresh JWT secret and token encryption key for .env
    GenerateKey,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Some(Command::GenerateKey) = cli.command {
        println!("FEEDMERGE_JWT_SECRET={}", random_token());
        println!("FEEDMERGE_TOKEN_ENCRYPTION_KEY={}", key_to_base64(&generate_key()));
        return Ok(());
    }

    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedmerge=debug,tower_http=debug".into()),
        )
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {}.", e);
            eprintln!("       Run `feedmerge generate-key` for fresh secrets, set them in .env and restart.");
            std::process::exit(1);
        }
    };

    let db = Arc::new(Database::open(&config.db_path)?);
    let cipher = TokenCipher::from_base64_key(&config.token_encryption_key)?;

    let enabled = config.broker.enabled_platforms();
    if enabled.is_empty() {
        warn!("No platform credentials configured; OAuth login and linking are disabled");
    } else {
        info!("OAuth enabled for {:?}", enabled);
    }
    let broker = Arc::new(OAuthBroker::new(
        config.broker,
        Arc::new(DbFlowStore(db.clone())),
    )?);

    let publisher = Arc::new(HttpPublisher::new(PublisherEndpoints::default(), config.http_timeout)?);
    let scheduler = Scheduler::new(db.clone(), cipher.clone(), publisher, broker.clone(), config.scheduler);

    if config.storage.is_none() {
        warn!("Object storage not configured; media upload URLs are unavailable");
    }

    let state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        cipher: cipher.clone(),
        vault: TokenVault::new(
            db.clone(),
            &config.jwt_secret,
            config.access_token_ttl,
            config.refresh_token_ttl,
        ),
        linker: AccountLinker::new(db.clone(), cipher),
        broker,
        scheduler: scheduler.clone(),
        storage: config.storage,
    });

    let shutdown = CancellationToken::new();
    let scheduler_task = tokio::spawn(scheduler.run(shutdown.clone()));
    tokio::spawn(cleanup::run_cleanup_loop(
        db,
        config.cleanup_interval_secs,
        shutdown.clone(),
    ));

    let app = build_router(state);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("FeedMerge server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(e) = scheduler_task.await {
        warn!("Scheduler task ended abnormally: {}", e);
    }
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable ({}); listening for Ctrl+C only", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
