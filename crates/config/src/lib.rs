use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Where aggregates are stored.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    /// In-process store; everything is lost on restart.
    Memory,
}

/// `AppConfig` holds all configuration parameters required by the storefront.
///
/// Values come from environment variables (optionally via a `.env` file), with
/// defaults suitable for local development. Provider credentials default to
/// empty strings, which leaves the corresponding provider unusable.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppConfig {
    // --- Database settings ---
    /// Database hostname (e.g. "postgres" in Docker Compose, "localhost" for local runs).
    pub db_host: String,
    /// Database port (default: 5432).
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    /// Maximum number of pooled connections.
    pub db_pool_size: usize,
    pub storage_backend: StorageBackend,
    /// Folder with the `.sql` files applied by `app migrate` and on startup.
    pub migrations_dir: String,

    // --- HTTP server ---
    pub http_port: u16,
    /// Built single-page client served for every non-API path.
    pub static_dir: String,
    /// Origin allowed by CORS, credentials included.
    pub client_url: String,

    // --- Shutdown timeout ---
    /// Graceful shutdown timeout (human-friendly format, e.g. "5s", "1m").
    #[serde(deserialize_with = "deserialize_duration")]
    pub shutdown_timeout: Duration,

    // --- Sessions ---
    /// HS256 signing secret for session and password-reset tokens.
    pub jwt_secret: String,
    #[serde(deserialize_with = "deserialize_duration")]
    pub session_ttl: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub reset_token_ttl: Duration,
    /// Adds `Secure` to the session cookie; enable behind HTTPS.
    pub cookie_secure: bool,
    /// Shared key an admin must present to register.
    pub admin_registration_key: String,

    // --- Payments ---
    /// ISO currency code used for hosted checkout sessions.
    pub currency: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,
    /// Maximum age of a webhook signature timestamp.
    #[serde(deserialize_with = "deserialize_duration")]
    pub webhook_tolerance: Duration,

    // --- Images ---
    pub cloudinary_cloud_name: String,
    pub cloudinary_api_key: String,
    pub cloudinary_api_secret: String,
    pub cloudinary_folder: String,

    // --- Mail ---
    /// HTTP relay accepting `{from, to, subject, text}`; unset means mails are only logged.
    #[serde(default)]
    pub mail_relay_url: Option<String>,
    pub mail_from: String,
}

/// Custom deserializer for durations.
/// Accepts human-readable formats like "5s", "1m", "30days".
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let val = String::deserialize(deserializer)?;
    humantime::parse_duration(&val)
        .map_err(|e| D::Error::custom(format!("Invalid duration '{val}': {e}")))
}

impl AppConfig {
    /// Loads configuration from environment variables (and optionally from `.env` file).
    ///
    /// Fields not set via env are filled with default values.
    ///
    /// # Errors
    /// Returns an error if environment variables are invalid.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            // Database
            .set_default("db_host", "localhost")?
            .set_default("db_port", 5432)?
            .set_default("db_user", "shop_user")?
            .set_default("db_password", "securepassword")?
            .set_default("db_name", "shop_db")?
            .set_default("db_pool_size", 16)?
            .set_default("storage_backend", "postgres")?
            .set_default("migrations_dir", "migrations")?
            // HTTP
            .set_default("http_port", 8081)?
            .set_default("static_dir", "frontend/dist")?
            .set_default("client_url", "http://localhost:5173")?
            // Shutdown
            .set_default("shutdown_timeout", "5s")?
            // Sessions
            .set_default("jwt_secret", "change-me-in-production")?
            .set_default("session_ttl", "30days")?
            .set_default("reset_token_ttl", "15m")?
            .set_default("cookie_secure", false)?
            .set_default("admin_registration_key", "change-me-admin-key")?
            // Payments
            .set_default("currency", "inr")?
            .set_default("stripe_secret_key", "")?
            .set_default("stripe_webhook_secret", "")?
            .set_default("stripe_api_base", "https://api.stripe.com")?
            .set_default("webhook_tolerance", "5m")?
            // Images
            .set_default("cloudinary_cloud_name", "")?
            .set_default("cloudinary_api_key", "")?
            .set_default("cloudinary_api_secret", "")?
            .set_default("cloudinary_folder", "storefront")?
            // Mail
            .set_default("mail_from", "no-reply@storefront.local")?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;

        settings
            .try_deserialize()
            .context("Failed to load configuration")
    }

    /// libpq-style connection string for the configured database.
    pub fn database_dsn(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={} sslmode=disable",
            self.db_host, self.db_port, self.db_user, self.db_password, self.db_name
        )
    }
}
