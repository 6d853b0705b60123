//! Per-user carts.
//!
//! Every mutation ends in [`CartServiceImpl::persist`], the only place a cart
//! is written, so the cached total is always recomputed from the lines.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{Cart, Product};
use repository::Repositories;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{ServiceError, not_found};

/// A cart line joined with the current product record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemView {
    pub product: Product,
    pub quantity: i32,
    /// Price captured when the line was added.
    pub price: Decimal,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub user_id: Uuid,
    pub items: Vec<CartItemView>,
    pub total_price: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// # CartService
#[async_trait]
pub trait CartService: Send + Sync {
    /// The caller's cart; lines for products that no longer exist are dropped.
    async fn get(&self, user_id: Uuid) -> Result<CartView, ServiceError>;
    /// Adds a product; a product already in the cart is a conflict.
    async fn add(&self, user_id: Uuid, product_id: Uuid, quantity: i32)
    -> Result<CartView, ServiceError>;
    async fn remove(&self, user_id: Uuid, product_id: Uuid) -> Result<CartView, ServiceError>;
    async fn update_quantity(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError>;
    async fn clear(&self, user_id: Uuid) -> Result<CartView, ServiceError>;
    /// Drops the given products from the cart, ignoring those not present.
    async fn remove_products(&self, user_id: Uuid, product_ids: &[Uuid])
    -> Result<(), ServiceError>;
}

pub struct CartServiceImpl {
    repos: Repositories,
}

impl CartServiceImpl {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    async fn load(&self, user_id: Uuid) -> Result<Cart, ServiceError> {
        Ok(self
            .repos
            .carts
            .get(user_id)
            .await?
            .unwrap_or_else(|| Cart::new(user_id)))
    }

    /// The single write path for carts.
    async fn persist(&self, mut cart: Cart) -> Result<Cart, ServiceError> {
        cart.recompute_total()?;
        self.repos.carts.save(&cart).await?;
        Ok(cart)
    }

    async fn view(&self, mut cart: Cart) -> Result<CartView, ServiceError> {
        let ids: Vec<Uuid> = cart.lines.iter().map(|l| l.product_id).collect();
        let products: HashMap<Uuid, Product> = self
            .repos
            .products
            .get_many(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let dropped = cart.retain_products(|id| products.contains_key(id));
        if dropped > 0 {
            debug!(user = %cart.user_id, dropped, "Pruned cart lines for deleted products");
            cart = self.persist(cart).await?;
        }

        let items = cart
            .lines
            .iter()
            .filter_map(|line| {
                let product = products.get(&line.product_id)?;
                Some(line.subtotal().map(|subtotal| CartItemView {
                    product: product.clone(),
                    quantity: line.quantity,
                    price: line.price,
                    subtotal,
                }))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CartView {
            user_id: cart.user_id,
            items,
            total_price: cart.total_price,
            updated_at: cart.updated_at,
        })
    }

    async fn in_stock_product(&self, product_id: Uuid, quantity: i32) -> Result<Product, ServiceError> {
        let product = self
            .repos
            .products
            .get_by_id(product_id)
            .await
            .map_err(not_found("Product"))?;
        if !product.has_stock_for(quantity) {
            return Err(ServiceError::InsufficientStock(product_id));
        }
        Ok(product)
    }
}

#[async_trait]
impl CartService for CartServiceImpl {
    async fn get(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = self.load(user_id).await?;
        self.view(cart).await
    }

    #[instrument(skip(self))]
    async fn add(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::Validation("Quantity must be at least 1".into()));
        }
        let product = self.in_stock_product(product_id, quantity).await?;
        let mut cart = self.load(user_id).await?;
        cart.add_line(product.id, quantity, product.price)?;
        let cart = self.persist(cart).await?;
        self.view(cart).await
    }

    #[instrument(skip(self))]
    async fn remove(&self, user_id: Uuid, product_id: Uuid) -> Result<CartView, ServiceError> {
        let mut cart = self.load(user_id).await?;
        cart.remove_line(product_id)?;
        let cart = self.persist(cart).await?;
        self.view(cart).await
    }

    #[instrument(skip(self))]
    async fn update_quantity(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::Validation("Quantity must be at least 1".into()));
        }
        let mut cart = self.load(user_id).await?;
        if !cart.contains(product_id) {
            return Err(ServiceError::NotFound("Product is not in the cart".into()));
        }
        self.in_stock_product(product_id, quantity).await?;
        cart.set_quantity(product_id, quantity)?;
        let cart = self.persist(cart).await?;
        self.view(cart).await
    }

    #[instrument(skip(self))]
    async fn clear(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let mut cart = self.load(user_id).await?;
        cart.clear();
        let cart = self.persist(cart).await?;
        self.view(cart).await
    }

    async fn remove_products(
        &self,
        user_id: Uuid,
        product_ids: &[Uuid],
    ) -> Result<(), ServiceError> {
        let Some(mut cart) = self.repos.carts.get(user_id).await? else {
            return Ok(());
        };
        if cart.retain_products(|id| !product_ids.contains(id)) > 0 {
            self.persist(cart).await?;
        }
        Ok(())
    }
}
