//! HTTP clients for the external collaborators: Stripe hosted checkout,
//! Cloudinary image storage and an optional mail relay.
//!
//! Every client is built once at startup from [`AppConfig`] and handed to the
//! services as a trait object from [`service::Ports`].

use std::sync::Arc;
use std::time::Duration;

use app_config::AppConfig;
use service::{Ports, ProviderError};
use tracing::{info, warn};

mod cloudinary;
mod mail;
mod stripe;

pub use cloudinary::CloudinaryImageStore;
pub use mail::{HttpMailer, LogMailer};
pub use stripe::StripeGateway;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Builds the shared HTTP client used by every provider.
pub fn http_client() -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("storefront/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProviderError::Transport(e.to_string()))
}

/// Constructs every port from configuration.
pub fn build_ports(config: &AppConfig) -> Result<Ports, ProviderError> {
    let client = http_client()?;
    if config.stripe_secret_key.is_empty() {
        warn!("Stripe secret key is empty; checkout sessions will be rejected");
    }
    if config.cloudinary_api_secret.is_empty() {
        warn!("Cloudinary credentials are empty; image uploads will be rejected");
    }

    let mailer: Arc<dyn service::Mailer> = match &config.mail_relay_url {
        Some(url) => {
            info!(relay = %url, "Sending mail through relay");
            Arc::new(HttpMailer::new(client.clone(), url, &config.mail_from))
        }
        None => {
            info!("No mail relay configured; mail will only be logged");
            Arc::new(LogMailer)
        }
    };

    Ok(Ports {
        images: Arc::new(CloudinaryImageStore::new(
            client.clone(),
            &config.cloudinary_cloud_name,
            &config.cloudinary_api_key,
            &config.cloudinary_api_secret,
            &config.cloudinary_folder,
        )),
        payments: Arc::new(StripeGateway::new(
            client,
            &config.stripe_api_base,
            &config.stripe_secret_key,
            &config.stripe_webhook_secret,
            config.webhook_tolerance,
        )),
        mailer,
    })
}

/// Turns a non-success response into [`ProviderError::Rejected`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(ProviderError::Rejected {
        status: status.as_u16(),
        message,
    })
}

fn transport(err: reqwest::Error) -> ProviderError {
    ProviderError::Transport(err.to_string())
}
