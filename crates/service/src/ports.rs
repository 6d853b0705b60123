//! Collaborator ports: the external services the storefront talks to.
//!
//! Concrete clients live in the `providers` crate and are built once at
//! startup; services only ever see these traits.

use async_trait::async_trait;
use bytes::Bytes;
use model::{Address, ProductImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Failures reported by an external provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The request never produced a usable response (connect, timeout, decode).
    #[error("transport error: {0}")]
    Transport(String),
    /// The provider answered with a non-success status.
    #[error("provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// A webhook signature was missing, malformed, stale or wrong.
    #[error("invalid signature: {0}")]
    Signature(String),
    /// A payload did not have the expected shape.
    #[error("malformed payload: {0}")]
    Payload(String),
}

/// A file received from the client, ready to be stored.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// # ImageStore
///
/// Remote image storage. Every stored image is identified by its `public_id`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn upload(&self, image: ImageUpload) -> Result<ProductImage, ProviderError>;
    async fn destroy(&self, public_id: &str) -> Result<(), ProviderError>;
}

/// One product as the shopper sees it on the hosted checkout page.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutLineItem {
    pub name: String,
    pub image: Option<String>,
    /// Unit price in minor currency units.
    pub unit_amount: i64,
    pub quantity: i32,
}

/// The part of a cart line the order is later rebuilt from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionItem {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_amount: i64,
}

/// Data attached to a checkout session and echoed back on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub user_id: Uuid,
    pub address: Option<Address>,
    pub items: Vec<SessionItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub customer_email: Option<String>,
    pub currency: String,
    pub line_items: Vec<CheckoutLineItem>,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: SessionMetadata,
}

/// A hosted checkout session as reported by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    /// `open`, `complete` or `expired`.
    pub status: String,
    /// `paid`, `unpaid` or `no_payment_required`.
    pub payment_status: String,
    /// Total charged, in minor units.
    pub amount_total: Option<i64>,
    pub metadata: Option<SessionMetadata>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }
}

/// A verified webhook notification.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    CheckoutCompleted(CheckoutSession),
    /// Any event type the storefront does not act on.
    Ignored { kind: String },
}

/// # PaymentGateway
///
/// Hosted checkout provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(&self, request: CheckoutRequest)
    -> Result<CheckoutSession, ProviderError>;
    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, ProviderError>;
    /// Verifies the signature header against the raw body and decodes the event.
    fn parse_webhook(&self, payload: &[u8], signature: &str)
    -> Result<WebhookEvent, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
}

/// # Mailer
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: MailMessage) -> Result<(), ProviderError>;
}
