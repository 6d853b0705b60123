use async_trait::async_trait;
use serde::Serialize;
use service::{MailMessage, Mailer, ProviderError};
use tracing::{info, instrument};

use crate::{check_status, transport};

/// Posts each message as JSON to an HTTP mail relay.
pub struct HttpMailer {
    client: reqwest::Client,
    relay_url: String,
    from: String,
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    #[serde(flatten)]
    message: &'a MailMessage,
}

impl HttpMailer {
    pub fn new(client: reqwest::Client, relay_url: &str, from: &str) -> Self {
        Self {
            client,
            relay_url: relay_url.to_string(),
            from: from.to_string(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    #[instrument(skip_all, fields(to = %message.to))]
    async fn send(&self, message: MailMessage) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(&self.relay_url)
            .json(&RelayRequest {
                from: &self.from,
                message: &message,
            })
            .send()
            .await
            .map_err(transport)?;
        check_status(response).await?;
        info!(subject = %message.subject, "Mail handed to relay");
        Ok(())
    }
}

/// Development mailer: writes the message to the log instead of sending it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: MailMessage) -> Result<(), ProviderError> {
        info!(to = %message.to, subject = %message.subject, body = %message.text, "Mail not sent (no relay configured)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_request_flattens_the_message() {
        let message = MailMessage {
            to: "meera@shop.test".into(),
            subject: "Reset your password".into(),
            text: "Follow the link".into(),
        };
        let json = serde_json::to_value(RelayRequest {
            from: "no-reply@storefront.local",
            message: &message,
        })
        .unwrap();
        assert_eq!(json["from"], "no-reply@storefront.local");
        assert_eq!(json["to"], "meera@shop.test");
        assert_eq!(json["subject"], "Reset your password");
    }

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        let message = MailMessage {
            to: "a@b.test".into(),
            subject: "s".into(),
            text: "t".into(),
        };
        assert!(LogMailer.send(message).await.is_ok());
    }
}
