//! Order creation, role-scoped views and fulfilment.
//!
//! Orders are created all-or-nothing through
//! [`OrdersRepository::materialize`](repository::OrdersRepository::materialize);
//! afterwards only line statuses, the derived order status and the admin
//! review flag change.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use model::money::{lines_total, totals_match};
use model::{
    Actor, Address, DomainError, LineStatus, Order, OrderDraft, OrderLine, OrderStatus,
    PaymentMethod, Product, Review,
};
use repository::{Repositories, RepositoryError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::cart::CartService;
use crate::{ServiceError, not_found};

/// Optimistic fulfilment writes are retried this many times in total.
const FULFILMENT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineInput {
    pub product_id: Uuid,
    pub quantity: i32,
    /// Seller the client believes owns the product; checked when present.
    #[serde(default)]
    pub seller: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderInput {
    #[serde(alias = "products")]
    #[validate(length(min = 1, max = 50))]
    pub lines: Vec<OrderLineInput>,
    pub address: Address,
    pub amount_total: Decimal,
    #[serde(default)]
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineStatusInput {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub status: LineStatus,
}

/// An order as one caller may see it, with that caller's reviews of its products.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub order: Order,
    pub reviews: Vec<Review>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerStats {
    pub total_products: usize,
    pub total_stock: i64,
    /// Orders containing at least one of the seller's lines, cancelled included.
    pub total_orders: usize,
    pub units_sold: i64,
    pub revenue: Decimal,
    pub pending_lines: usize,
    pub shipped_lines: usize,
    pub delivered_lines: usize,
}

impl SellerStats {
    fn collect(
        seller_id: Uuid,
        products: &[Product],
        orders: &[Order],
    ) -> Result<Self, ServiceError> {
        let mut stats = SellerStats {
            total_products: products.len(),
            total_stock: products.iter().map(|p| i64::from(p.stock)).sum(),
            total_orders: orders.len(),
            ..Default::default()
        };
        for order in orders.iter().filter(|o| o.status != OrderStatus::Cancelled) {
            for line in order.lines.iter().filter(|l| l.seller_id == seller_id) {
                stats.units_sold += i64::from(line.quantity);
                stats.revenue += line.subtotal()?;
                match line.status {
                    LineStatus::Pending => stats.pending_lines += 1,
                    LineStatus::Shipped => stats.shipped_lines += 1,
                    LineStatus::Delivered => stats.delivered_lines += 1,
                }
            }
        }
        Ok(stats)
    }
}

/// # OrderService
#[async_trait]
pub trait OrderService: Send + Sync {
    /// Validates every line and the submitted total, then creates the order and
    /// takes the stock in one step.
    async fn create_order(&self, actor: Actor, input: CreateOrderInput)
    -> Result<Order, ServiceError>;
    async fn my_orders(&self, actor: Actor) -> Result<Vec<Order>, ServiceError>;
    async fn detail(&self, actor: Actor, order_id: Uuid) -> Result<OrderDetail, ServiceError>;
    /// Cancels a pending order of the caller with no shipped lines and puts the
    /// stock back.
    async fn cancel(&self, actor: Actor, order_id: Uuid) -> Result<Order, ServiceError>;
    async fn list_all(&self) -> Result<Vec<Order>, ServiceError>;
    async fn mark_reviewed(&self, order_id: Uuid) -> Result<Order, ServiceError>;
    /// Orders with the seller's lines, each reduced to those lines.
    async fn seller_orders(&self, actor: Actor) -> Result<Vec<Order>, ServiceError>;
    /// Advances one of the seller's lines a single step.
    async fn update_line_status(
        &self,
        actor: Actor,
        input: LineStatusInput,
    ) -> Result<Order, ServiceError>;
    async fn seller_stats(&self, actor: Actor) -> Result<SellerStats, ServiceError>;
}

pub struct OrderServiceImpl {
    repos: Repositories,
    carts: Arc<dyn CartService>,
}

impl OrderServiceImpl {
    pub fn new(repos: Repositories, carts: Arc<dyn CartService>) -> Self {
        Self { repos, carts }
    }

    async fn load(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        self.repos
            .orders
            .get_by_id(order_id)
            .await
            .map_err(not_found("Order"))
    }

    /// Resolves and snapshots every line; any failure rejects the whole order.
    async fn build_lines(&self, input: &[OrderLineInput]) -> Result<Vec<OrderLine>, ServiceError> {
        let mut seen = HashSet::new();
        for line in input {
            if line.quantity < 1 {
                return Err(ServiceError::Validation(format!(
                    "Quantity for product {} must be at least 1",
                    line.product_id
                )));
            }
            if !seen.insert(line.product_id) {
                return Err(ServiceError::Validation(format!(
                    "Product {} appears more than once",
                    line.product_id
                )));
            }
        }

        let ids: Vec<Uuid> = input.iter().map(|l| l.product_id).collect();
        let products: HashMap<Uuid, Product> = self
            .repos
            .products
            .get_many(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        input
            .iter()
            .map(|line| {
                let product = products.get(&line.product_id).ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", line.product_id))
                })?;
                if line.seller.is_some_and(|s| s != product.seller_id) {
                    return Err(ServiceError::Validation(format!(
                        "Seller does not match product {}",
                        product.id
                    )));
                }
                Ok(OrderLine {
                    product_id: product.id,
                    seller_id: product.seller_id,
                    name: product.name.clone(),
                    price: product.price,
                    image: product.primary_image().map(str::to_string),
                    quantity: line.quantity,
                    status: LineStatus::Pending,
                })
            })
            .collect()
    }
}

#[async_trait]
impl OrderService for OrderServiceImpl {
    #[instrument(skip(self, input), fields(user = %actor.id))]
    async fn create_order(
        &self,
        actor: Actor,
        input: CreateOrderInput,
    ) -> Result<Order, ServiceError> {
        input.validate()?;
        input.address.validate()?;

        let lines = self.build_lines(&input.lines).await?;
        let computed = lines_total(lines.iter().map(|l| (l.price, l.quantity)))
            .ok_or(DomainError::AmountOverflow)?;
        if !totals_match(input.amount_total, computed) {
            warn!(submitted = %input.amount_total, %computed, "Order total mismatch");
            return Err(ServiceError::Validation(format!(
                "Order total {} does not match the computed total {}",
                input.amount_total,
                computed.round_dp(2)
            )));
        }

        let order = Order::new(OrderDraft {
            user_id: actor.id,
            lines,
            address: input.address,
            amount_total: computed.round_dp(2),
            payment_method: input.payment_method,
            payment_session_id: None,
        });
        let order = self.repos.orders.materialize(&order).await?.into_order();
        info!(order = %order.id, total = %order.amount_total, "Order created");

        let purchased: Vec<Uuid> = order.lines.iter().map(|l| l.product_id).collect();
        if let Err(e) = self.carts.remove_products(actor.id, &purchased).await {
            warn!(order = %order.id, error = %e, "Failed to remove purchased products from cart");
        }
        Ok(order)
    }

    async fn my_orders(&self, actor: Actor) -> Result<Vec<Order>, ServiceError> {
        Ok(self.repos.orders.list_by_user(actor.id).await?)
    }

    async fn detail(&self, actor: Actor, order_id: Uuid) -> Result<OrderDetail, ServiceError> {
        let order = self.load(order_id).await?;
        let order = if actor.is_admin() || order.user_id == actor.id {
            order
        } else {
            order
                .seller_view(actor.id)
                .ok_or_else(|| ServiceError::Forbidden("Not allowed to view this order".into()))?
        };

        let products: HashSet<Uuid> = order.lines.iter().map(|l| l.product_id).collect();
        let reviews = self
            .repos
            .reviews
            .list_by_user(actor.id)
            .await?
            .into_iter()
            .filter(|r| products.contains(&r.product_id))
            .collect();
        Ok(OrderDetail { order, reviews })
    }

    #[instrument(skip(self), fields(user = %actor.id))]
    async fn cancel(&self, actor: Actor, order_id: Uuid) -> Result<Order, ServiceError> {
        let mut order = self.load(order_id).await?;
        if order.user_id != actor.id {
            return Err(ServiceError::Forbidden(
                "You can only cancel your own orders".into(),
            ));
        }
        order.cancel()?;
        let cancelled = self.repos.orders.cancel(order_id).await?;
        info!(order = %order_id, "Order cancelled and restocked");
        Ok(cancelled)
    }

    async fn list_all(&self) -> Result<Vec<Order>, ServiceError> {
        Ok(self.repos.orders.list_all().await?)
    }

    #[instrument(skip(self))]
    async fn mark_reviewed(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        self.repos
            .orders
            .mark_reviewed(order_id)
            .await
            .map_err(not_found("Order"))
    }

    async fn seller_orders(&self, actor: Actor) -> Result<Vec<Order>, ServiceError> {
        Ok(self
            .repos
            .orders
            .list_by_seller(actor.id)
            .await?
            .iter()
            .filter_map(|o| o.seller_view(actor.id))
            .collect())
    }

    #[instrument(skip(self, input), fields(seller = %actor.id, order = %input.order_id, status = %input.status))]
    async fn update_line_status(
        &self,
        actor: Actor,
        input: LineStatusInput,
    ) -> Result<Order, ServiceError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut order = self.load(input.order_id).await?;
            order.set_line_status(actor.id, input.product_id, input.status)?;
            match self.repos.orders.save_fulfillment(&order).await {
                Ok(saved) => {
                    info!(order_status = %saved.status, "Line status updated");
                    return Ok(saved.seller_view(actor.id).unwrap_or(saved));
                }
                Err(RepositoryError::Conflict(_)) if attempt < FULFILMENT_ATTEMPTS => {
                    debug!(attempt, "Concurrent fulfilment update, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn seller_stats(&self, actor: Actor) -> Result<SellerStats, ServiceError> {
        let products = self.repos.products.list_by_seller(actor.id).await?;
        let orders = self.repos.orders.list_by_seller(actor.id).await?;
        SellerStats::collect(actor.id, &products, &orders)
    }
}
