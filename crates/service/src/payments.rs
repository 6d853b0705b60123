//! Hosted checkout bridge.
//!
//! A paid session becomes an order through two independent paths: the
//! client's status poll after the redirect, and the provider's webhook. Both
//! call [`PaymentServiceImpl::materialize`], and the storage layer's
//! uniqueness on the session id makes whichever path loses the race return
//! the winner's order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use model::money::{from_minor_units, lines_total, to_minor_units};
use model::{
    Actor, Address, DomainError, LineStatus, Order, OrderDraft, OrderLine, PaymentMethod, Product,
};
use repository::{Materialized, Repositories, RepositoryError};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::cart::CartService;
use crate::ports::{
    CheckoutLineItem, CheckoutRequest, CheckoutSession, PaymentGateway, ProviderError,
    SessionItem, SessionMetadata, WebhookEvent,
};
use crate::{ServiceError, ServiceSettings, not_found};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutInput {
    /// Falls back to the address saved on the profile.
    #[serde(default)]
    pub address: Option<Address>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutStarted {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub status: String,
    pub payment_status: String,
    pub order: Option<Order>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    OrderCreated(Uuid),
    AlreadyProcessed(Uuid),
    Ignored(String),
}

/// # PaymentService
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Opens a hosted checkout for the caller's cart at current catalog prices.
    async fn create_checkout(
        &self,
        actor: Actor,
        input: CheckoutInput,
    ) -> Result<CheckoutStarted, ServiceError>;
    /// Idempotent: returns the existing order for the session, or creates it once paid.
    async fn session_status(
        &self,
        actor: Actor,
        session_id: &str,
    ) -> Result<SessionStatus, ServiceError>;
    async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookOutcome, ServiceError>;
}

pub struct PaymentServiceImpl {
    repos: Repositories,
    gateway: Arc<dyn PaymentGateway>,
    carts: Arc<dyn CartService>,
    settings: ServiceSettings,
}

impl PaymentServiceImpl {
    pub fn new(
        repos: Repositories,
        gateway: Arc<dyn PaymentGateway>,
        carts: Arc<dyn CartService>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            repos,
            gateway,
            carts,
            settings,
        }
    }

    /// Turns a paid session into an order, at most once per session id.
    #[instrument(skip(self, session), fields(session = %session.id))]
    async fn materialize(&self, session: &CheckoutSession) -> Result<Materialized, ServiceError> {
        if let Some(existing) = self.repos.orders.find_by_session(&session.id).await? {
            return Ok(Materialized::Existing(existing));
        }
        let metadata = session.metadata.as_ref().ok_or_else(|| {
            ServiceError::Validation("Checkout session carries no order data".into())
        })?;

        let ids: Vec<Uuid> = metadata.items.iter().map(|i| i.product_id).collect();
        let products: HashMap<Uuid, Product> = self
            .repos
            .products
            .get_many(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut lines = Vec::with_capacity(metadata.items.len());
        for item in &metadata.items {
            let Some(product) = products.get(&item.product_id) else {
                error!(
                    product = %item.product_id,
                    "Paid session references a deleted product; manual refund required"
                );
                return Err(ServiceError::NotFound(format!(
                    "Product {} not found",
                    item.product_id
                )));
            };
            lines.push(OrderLine {
                product_id: product.id,
                seller_id: product.seller_id,
                name: product.name.clone(),
                price: from_minor_units(item.unit_amount),
                image: product.primary_image().map(str::to_string),
                quantity: item.quantity,
                status: LineStatus::Pending,
            });
        }
        let computed = lines_total(lines.iter().map(|l| (l.price, l.quantity)))
            .ok_or(DomainError::AmountOverflow)?;

        let order = Order::new(OrderDraft {
            user_id: metadata.user_id,
            lines,
            address: metadata.address.clone().unwrap_or_default(),
            amount_total: session
                .amount_total
                .map(from_minor_units)
                .unwrap_or(computed),
            payment_method: PaymentMethod::Card,
            payment_session_id: Some(session.id.clone()),
        });

        match self.repos.orders.materialize(&order).await {
            Ok(Materialized::Created(order)) => {
                info!(order = %order.id, "Order materialized from paid session");
                if let Err(e) = self.carts.clear(order.user_id).await {
                    warn!(order = %order.id, error = %e, "Failed to clear cart after payment");
                }
                Ok(Materialized::Created(order))
            }
            Ok(existing) => Ok(existing),
            Err(RepositoryError::InsufficientStock { product_id }) => {
                error!(
                    %product_id,
                    "Payment captured but stock is insufficient; manual refund required"
                );
                Err(ServiceError::InsufficientStock(product_id))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl PaymentService for PaymentServiceImpl {
    #[instrument(skip(self, input), fields(user = %actor.id))]
    async fn create_checkout(
        &self,
        actor: Actor,
        input: CheckoutInput,
    ) -> Result<CheckoutStarted, ServiceError> {
        let principal = self
            .repos
            .principals
            .get_by_id(actor.id)
            .await
            .map_err(not_found("Account"))?;
        let address = input
            .address
            .or(principal.address)
            .ok_or_else(|| ServiceError::Validation("Shipping address is required".into()))?;
        address.validate()?;

        let cart = self
            .repos
            .carts
            .get(actor.id)
            .await?
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ServiceError::Validation("Cart is empty".into()))?;

        let ids: Vec<Uuid> = cart.lines.iter().map(|l| l.product_id).collect();
        let products: HashMap<Uuid, Product> = self
            .repos
            .products
            .get_many(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut line_items = Vec::with_capacity(cart.lines.len());
        let mut items = Vec::with_capacity(cart.lines.len());
        for line in &cart.lines {
            let product = products.get(&line.product_id).ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", line.product_id))
            })?;
            if !product.has_stock_for(line.quantity) {
                return Err(ServiceError::InsufficientStock(product.id));
            }
            let unit_amount = to_minor_units(product.price).ok_or_else(|| {
                ServiceError::Validation(format!("Price of {} is out of range", product.name))
            })?;
            line_items.push(CheckoutLineItem {
                name: product.name.clone(),
                image: product.primary_image().map(str::to_string),
                unit_amount,
                quantity: line.quantity,
            });
            items.push(SessionItem {
                product_id: product.id,
                quantity: line.quantity,
                unit_amount,
            });
        }

        let client = self.settings.client_url.trim_end_matches('/');
        let request = CheckoutRequest {
            customer_email: Some(principal.email),
            currency: self.settings.currency.clone(),
            line_items,
            success_url: format!("{client}/payment-success?session_id={{CHECKOUT_SESSION_ID}}"),
            cancel_url: format!("{client}/cart"),
            metadata: SessionMetadata {
                user_id: actor.id,
                address: Some(address),
                items,
            },
        };
        let session = self.gateway.create_session(request).await?;
        info!(session = %session.id, "Checkout session created");
        Ok(CheckoutStarted {
            id: session.id,
            url: session.url,
        })
    }

    #[instrument(skip(self), fields(user = %actor.id))]
    async fn session_status(
        &self,
        actor: Actor,
        session_id: &str,
    ) -> Result<SessionStatus, ServiceError> {
        if let Some(order) = self.repos.orders.find_by_session(session_id).await? {
            if order.user_id != actor.id && !actor.is_admin() {
                return Err(ServiceError::Forbidden("Session belongs to another user".into()));
            }
            return Ok(SessionStatus {
                status: "complete".into(),
                payment_status: "paid".into(),
                order: Some(order),
            });
        }

        let session = self.gateway.retrieve_session(session_id).await?;
        let owner = session.metadata.as_ref().map(|m| m.user_id);
        if owner != Some(actor.id) && !actor.is_admin() {
            return Err(ServiceError::Forbidden("Session belongs to another user".into()));
        }

        let order = if session.is_paid() {
            Some(self.materialize(&session).await?.into_order())
        } else {
            None
        };
        Ok(SessionStatus {
            status: session.status,
            payment_status: session.payment_status,
            order,
        })
    }

    #[instrument(skip_all)]
    async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookOutcome, ServiceError> {
        let event = self
            .gateway
            .parse_webhook(payload, signature)
            .map_err(|e| match e {
                ProviderError::Signature(msg) | ProviderError::Payload(msg) => {
                    warn!(reason = %msg, "Rejected webhook");
                    ServiceError::Validation(format!("Invalid webhook: {msg}"))
                }
                other => other.into(),
            })?;

        match event {
            WebhookEvent::CheckoutCompleted(session) if session.is_paid() => {
                Ok(match self.materialize(&session).await? {
                    Materialized::Created(order) => WebhookOutcome::OrderCreated(order.id),
                    Materialized::Existing(order) => WebhookOutcome::AlreadyProcessed(order.id),
                })
            }
            WebhookEvent::CheckoutCompleted(session) => {
                info!(session = %session.id, payment_status = %session.payment_status, "Unpaid completion ignored");
                Ok(WebhookOutcome::Ignored("checkout.session.completed".into()))
            }
            WebhookEvent::Ignored { kind } => Ok(WebhookOutcome::Ignored(kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::{CartService, CartServiceImpl};
    use crate::testing::{FakeGateway, address, seed_product, seed_seller, seed_user, settings};
    use rust_decimal_macros::dec;

    struct Fixture {
        repos: Repositories,
        gateway: Arc<FakeGateway>,
        carts: Arc<CartServiceImpl>,
        svc: Arc<PaymentServiceImpl>,
    }

    fn fixture() -> Fixture {
        let repos = Repositories::in_memory();
        let gateway = Arc::new(FakeGateway::default());
        let carts = Arc::new(CartServiceImpl::new(repos.clone()));
        let svc = Arc::new(PaymentServiceImpl::new(
            repos.clone(),
            gateway.clone(),
            carts.clone(),
            settings(),
        ));
        Fixture {
            repos,
            gateway,
            carts,
            svc,
        }
    }

    fn checkout() -> CheckoutInput {
        CheckoutInput {
            address: Some(address()),
        }
    }

    #[tokio::test]
    async fn checkout_uses_server_prices_in_minor_units() {
        let f = fixture();
        let seller = seed_seller(&f.repos, true).await;
        let p = seed_product(&f.repos, seller.id, dec!(499.99), 5, 1).await;
        let buyer = seed_user(&f.repos).await;
        f.carts.add(buyer.id, p.id, 2).await.unwrap();

        let started = f.svc.create_checkout(buyer.actor(), checkout()).await.unwrap();
        let request = f.gateway.last_request().unwrap();
        assert_eq!(request.line_items[0].unit_amount, 49_999);
        assert_eq!(request.line_items[0].quantity, 2);
        assert_eq!(request.metadata.user_id, buyer.id);
        assert!(started.url.is_some());
    }

    #[tokio::test]
    async fn empty_cart_cannot_check_out() {
        let f = fixture();
        let buyer = seed_user(&f.repos).await;
        assert!(matches!(
            f.svc.create_checkout(buyer.actor(), checkout()).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn unpaid_session_creates_nothing() {
        let f = fixture();
        let seller = seed_seller(&f.repos, true).await;
        let p = seed_product(&f.repos, seller.id, dec!(100), 5, 1).await;
        let buyer = seed_user(&f.repos).await;
        f.carts.add(buyer.id, p.id, 1).await.unwrap();
        let started = f.svc.create_checkout(buyer.actor(), checkout()).await.unwrap();

        let status = f.svc.session_status(buyer.actor(), &started.id).await.unwrap();
        assert_eq!(status.payment_status, "unpaid");
        assert!(status.order.is_none());
        assert_eq!(f.repos.products.get_by_id(p.id).await.unwrap().stock, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn poll_and_webhook_racing_create_one_order() {
        let f = fixture();
        let seller = seed_seller(&f.repos, true).await;
        let p = seed_product(&f.repos, seller.id, dec!(250), 10, 1).await;
        let buyer = seed_user(&f.repos).await;
        f.carts.add(buyer.id, p.id, 2).await.unwrap();
        let started = f.svc.create_checkout(buyer.actor(), checkout()).await.unwrap();
        f.gateway.pay(&started.id);

        let mut handles = Vec::new();
        for i in 0..6 {
            let svc = f.svc.clone();
            let session_id = started.id.clone();
            let actor = buyer.actor();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    svc.session_status(actor, &session_id)
                        .await
                        .map(|s| s.order.map(|o| o.id))
                } else {
                    let payload = FakeGateway::completed_payload(&session_id);
                    svc.handle_webhook(&payload, FakeGateway::SIGNATURE)
                        .await
                        .map(|outcome| match outcome {
                            WebhookOutcome::OrderCreated(id)
                            | WebhookOutcome::AlreadyProcessed(id) => Some(id),
                            WebhookOutcome::Ignored(_) => None,
                        })
                }
            }));
        }

        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap().unwrap().unwrap());
        }
        assert!(ids.windows(2).all(|w| w[0] == w[1]));

        let orders = f.repos.orders.list_by_user(buyer.id).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].amount_total, dec!(500));
        assert_eq!(orders[0].lines[0].price, dec!(250));
        assert_eq!(f.repos.products.get_by_id(p.id).await.unwrap().stock, 8);
        assert!(f.carts.get(buyer.id).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn another_users_session_is_forbidden() {
        let f = fixture();
        let seller = seed_seller(&f.repos, true).await;
        let p = seed_product(&f.repos, seller.id, dec!(100), 5, 1).await;
        let buyer = seed_user(&f.repos).await;
        let snoop = seed_user(&f.repos).await;
        f.carts.add(buyer.id, p.id, 1).await.unwrap();
        let started = f.svc.create_checkout(buyer.actor(), checkout()).await.unwrap();
        f.gateway.pay(&started.id);

        assert!(matches!(
            f.svc.session_status(snoop.actor(), &started.id).await,
            Err(ServiceError::Forbidden(_))
        ));
        f.svc.session_status(buyer.actor(), &started.id).await.unwrap();
        assert!(matches!(
            f.svc.session_status(snoop.actor(), &started.id).await,
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn stock_gone_after_payment_is_a_conflict_and_creates_nothing() {
        let f = fixture();
        let seller = seed_seller(&f.repos, true).await;
        let p = seed_product(&f.repos, seller.id, dec!(100), 2, 1).await;
        let buyer = seed_user(&f.repos).await;
        f.carts.add(buyer.id, p.id, 2).await.unwrap();
        let started = f.svc.create_checkout(buyer.actor(), checkout()).await.unwrap();
        f.gateway.pay(&started.id);
        f.repos.products.set_stock(p.id, 1).await.unwrap();

        let payload = FakeGateway::completed_payload(&started.id);
        assert!(matches!(
            f.svc.handle_webhook(&payload, FakeGateway::SIGNATURE).await,
            Err(ServiceError::InsufficientStock(id)) if id == p.id
        ));
        assert!(f.repos.orders.find_by_session(&started.id).await.unwrap().is_none());
        assert_eq!(f.repos.products.get_by_id(p.id).await.unwrap().stock, 1);
    }

    #[tokio::test]
    async fn bad_signature_and_other_events() {
        let f = fixture();
        let payload = FakeGateway::completed_payload("cs_missing");
        assert!(matches!(
            f.svc.handle_webhook(&payload, "forged").await,
            Err(ServiceError::Validation(_))
        ));

        let other = br#"{"type":"payment_intent.created","sessionId":"x"}"#;
        assert_eq!(
            f.svc
                .handle_webhook(other, FakeGateway::SIGNATURE)
                .await
                .unwrap(),
            WebhookOutcome::Ignored("payment_intent.created".into())
        );
    }
}
