/// Storefront Backend Application
///
/// This is the main entry point for the storefront service. It serves the
/// REST API for shoppers, sellers and admins, bridges hosted checkout
/// payments into orders, and hosts the pre-built client bundle.
///
/// # Commands
///
/// - `serve` (default): run the HTTP server until Ctrl+C or SIGTERM
/// - `migrate`: apply the SQL migrations and exit
///
/// # Architecture
///
/// - Repository layer for storage (PostgreSQL or in-memory)
/// - Service layer for business logic
/// - Provider clients for payments, images and mail
/// - HTTP layer with role gates, metrics and static hosting
///
use std::path::PathBuf;

use anyhow::{Context, Result};
use app_config::{AppConfig, StorageBackend};
use clap::{Parser, Subcommand};
use repository::Repositories;
use server::{Server, ServerSettings};
use service::{ServiceSettings, Services};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "storefront", version, about = "Storefront backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Run the HTTP server.
    Serve,
    /// Apply database migrations and exit.
    Migrate,
}

/// Initialize the tracing subscriber for logging
fn init_logger() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {e}"))
}

async fn open_repositories(config: &AppConfig) -> Result<Repositories> {
    match config.storage_backend {
        StorageBackend::Memory => {
            warn!("Using the in-memory store; data is lost on restart");
            Ok(Repositories::in_memory())
        }
        StorageBackend::Postgres => {
            let pool = db::init_db_pool(config)?;
            let applied = db::migrate(&pool, &config.migrations_dir).await?;
            info!(applied, "Database initialized successfully");
            Ok(Repositories::postgres(pool))
        }
    }
}

fn service_settings(config: &AppConfig) -> ServiceSettings {
    ServiceSettings {
        jwt_secret: config.jwt_secret.clone(),
        session_ttl: config.session_ttl,
        reset_token_ttl: config.reset_token_ttl,
        admin_registration_key: config.admin_registration_key.clone(),
        client_url: config.client_url.clone(),
        currency: config.currency.clone(),
    }
}

fn server_settings(config: &AppConfig) -> ServerSettings {
    ServerSettings {
        port: config.http_port,
        static_dir: PathBuf::from(&config.static_dir),
        client_url: config.client_url.clone(),
        cookie_secure: config.cookie_secure,
        session_ttl: config.session_ttl,
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    let repos = open_repositories(&config).await?;
    let ports = providers::build_ports(&config).context("Failed to build provider clients")?;
    let services = Services::new(repos, ports, service_settings(&config));

    let http_server = Server::new(services, server_settings(&config))?;
    http_server.start(config.shutdown_timeout).await
}

async fn migrate(config: AppConfig) -> Result<()> {
    let pool = db::init_db_pool(&config)?;
    let applied = db::migrate(&pool, &config.migrations_dir).await?;
    info!(applied, dir = %config.migrations_dir, "Migrations applied");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger()?;

    let config = AppConfig::load().context("Failed to load configuration")?;
    info!("Storefront backend starting...");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await?,
        Command::Migrate => migrate(config).await?,
    }

    info!("Application stopped");
    Ok(())
}
