//! Fixtures shared by the service tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use model::{Actor, Address, Category, Principal, Product, ProductImage, Role};
use repository::Repositories;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::ServiceSettings;
use crate::ports::{
    CheckoutRequest, CheckoutSession, ImageStore, ImageUpload, MailMessage, Mailer,
    PaymentGateway, ProviderError, WebhookEvent,
};

pub(crate) fn settings() -> ServiceSettings {
    ServiceSettings {
        jwt_secret: "test-secret".into(),
        session_ttl: Duration::from_secs(30 * 24 * 3600),
        reset_token_ttl: Duration::from_secs(15 * 60),
        admin_registration_key: "let-me-in".into(),
        client_url: "http://localhost:5173".into(),
        currency: "inr".into(),
    }
}

pub(crate) fn user() -> Actor {
    Actor {
        id: Uuid::new_v4(),
        role: Role::User,
    }
}

pub(crate) fn address() -> Address {
    Address {
        full_name: "Meera Iyer".into(),
        phone: "9876543210".into(),
        street: "12 Lake Road".into(),
        city: "Pune".into(),
        state: "MH".into(),
        postal_code: "411001".into(),
        country: "India".into(),
    }
}

pub(crate) fn upload(name: &str) -> ImageUpload {
    ImageUpload {
        file_name: name.into(),
        content_type: Some("image/jpeg".into()),
        bytes: Bytes::from_static(b"\xff\xd8\xff\xe0"),
    }
}

pub(crate) async fn seed_user(repos: &Repositories) -> Principal {
    let principal = Principal::new(
        Role::User,
        "Shopper".into(),
        format!("user-{}@shop.test", Uuid::new_v4().simple()),
        "unused".into(),
    );
    repos.principals.insert(&principal).await.unwrap();
    principal
}

pub(crate) async fn seed_seller(repos: &Repositories, verified: bool) -> Principal {
    let mut seller = Principal::new(
        Role::Seller,
        "Seller".into(),
        format!("seller-{}@shop.test", Uuid::new_v4().simple()),
        "unused".into(),
    );
    if let Some(profile) = seller.seller.as_mut() {
        profile.shop_name = "Loom & Thread".into();
    }
    if verified {
        seller.verify_seller().unwrap();
    }
    repos.principals.insert(&seller).await.unwrap();
    seller
}

pub(crate) async fn seed_product(
    repos: &Repositories,
    seller_id: Uuid,
    price: Decimal,
    stock: i32,
    images: usize,
) -> Product {
    let id = Uuid::new_v4();
    let now = Utc::now();
    let product = Product {
        id,
        name: format!("Product {}", id.simple()),
        description: "Seeded".into(),
        price,
        category: Category::Women,
        stock,
        images: (0..images)
            .map(|i| ProductImage {
                url: format!("https://img.test/{id}/{i}.jpg"),
                public_id: format!("storefront/{id}-{i}"),
            })
            .collect(),
        seller_id,
        rating: Decimal::ZERO,
        num_reviews: 0,
        created_at: now,
        updated_at: now,
    };
    repos.products.insert(&product).await.unwrap();
    product
}

/// Refuses every upload; for paths that must never reach the store.
pub(crate) struct NoImages;

#[async_trait]
impl ImageStore for NoImages {
    async fn upload(&self, _image: ImageUpload) -> Result<ProductImage, ProviderError> {
        Err(ProviderError::Transport("image store disabled".into()))
    }

    async fn destroy(&self, _public_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingMailer {
    sent: Mutex<Vec<MailMessage>>,
}

impl RecordingMailer {
    pub(crate) fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: MailMessage) -> Result<(), ProviderError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// In-process checkout provider. Webhooks carry `{type, sessionId}` and are
/// accepted only with [`FakeGateway::SIGNATURE`].
#[derive(Default)]
pub(crate) struct FakeGateway {
    sessions: Mutex<HashMap<String, CheckoutSession>>,
    requests: Mutex<Vec<CheckoutRequest>>,
}

impl FakeGateway {
    pub(crate) const SIGNATURE: &'static str = "t=1,v1=trusted";

    pub(crate) fn last_request(&self) -> Option<CheckoutRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    /// Marks the session as completed and paid, as the provider would after capture.
    pub(crate) fn pay(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(session_id).unwrap();
        session.status = "complete".into();
        session.payment_status = "paid".into();
    }

    pub(crate) fn completed_payload(session_id: &str) -> Vec<u8> {
        serde_json::json!({ "type": "checkout.session.completed", "sessionId": session_id })
            .to_string()
            .into_bytes()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let id = format!("cs_test_{}", Uuid::new_v4().simple());
        let amount_total = request
            .line_items
            .iter()
            .map(|l| l.unit_amount * i64::from(l.quantity))
            .sum();
        let session = CheckoutSession {
            id: id.clone(),
            url: Some(format!("https://checkout.test/{id}")),
            status: "open".into(),
            payment_status: "unpaid".into(),
            amount_total: Some(amount_total),
            metadata: Some(request.metadata.clone()),
        };
        self.sessions
            .lock()
            .unwrap()
            .insert(id, session.clone());
        self.requests.lock().unwrap().push(request);
        Ok(session)
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, ProviderError> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or(ProviderError::Rejected {
                status: 404,
                message: format!("No such checkout session: {session_id}"),
            })
    }

    fn parse_webhook(&self, payload: &[u8], signature: &str) -> Result<WebhookEvent, ProviderError> {
        if signature != Self::SIGNATURE {
            return Err(ProviderError::Signature("signature mismatch".into()));
        }
        let event: serde_json::Value =
            serde_json::from_slice(payload).map_err(|e| ProviderError::Payload(e.to_string()))?;
        let kind = event["type"].as_str().unwrap_or_default().to_string();
        if kind != "checkout.session.completed" {
            return Ok(WebhookEvent::Ignored { kind });
        }
        let session_id = event["sessionId"].as_str().unwrap_or_default();
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .map(WebhookEvent::CheckoutCompleted)
            .ok_or_else(|| ProviderError::Payload(format!("unknown session {session_id}")))
    }
}
