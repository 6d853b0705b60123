//! Product catalog: browsing for everyone, listing management for sellers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use model::{Actor, Category, Product, ProductImage, ProductPage, ProductQuery};
use repository::Repositories;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::ports::{ImageStore, ImageUpload};
use crate::{ServiceError, not_found};

/// Upper bound on images per product.
pub const MAX_IMAGES: usize = 6;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    #[validate(length(min = 2, max = 120))]
    pub name: String,
    #[validate(length(min = 1, max = 2000))]
    pub description: String,
    pub price: Decimal,
    pub category: Category,
    #[validate(range(min = 0))]
    pub stock: i32,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProductUpdate {
    #[validate(length(min = 2, max = 120))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 2000))]
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub category: Option<Category>,
}

/// Exclusive upper bound for a price; the `price` column is `NUMERIC(12, 2)`.
const PRICE_LIMIT: Decimal = Decimal::from_parts(1_410_065_408, 2, 0, false, 0);

fn check_price(price: Decimal) -> Result<(), ServiceError> {
    if price <= Decimal::ZERO {
        return Err(ServiceError::Validation("Price must be positive".into()));
    }
    if price >= PRICE_LIMIT {
        return Err(ServiceError::Validation(format!(
            "Price must be below {PRICE_LIMIT}"
        )));
    }
    if price.scale() > 2 {
        return Err(ServiceError::Validation(
            "Price may have at most two decimal places".into(),
        ));
    }
    Ok(())
}

/// # CatalogService
#[async_trait]
pub trait CatalogService: Send + Sync {
    async fn list(&self, query: ProductQuery) -> Result<ProductPage, ServiceError>;
    async fn get(&self, id: Uuid) -> Result<Product, ServiceError>;
    /// Creates a listing for a verified seller, uploading its images first.
    async fn create(
        &self,
        actor: Actor,
        input: NewProduct,
        images: Vec<ImageUpload>,
    ) -> Result<Product, ServiceError>;
    /// Updates fields; non-empty `images` replace the stored set.
    async fn update(
        &self,
        actor: Actor,
        id: Uuid,
        update: ProductUpdate,
        images: Vec<ImageUpload>,
    ) -> Result<Product, ServiceError>;
    async fn update_stock(&self, actor: Actor, id: Uuid, stock: i32)
    -> Result<Product, ServiceError>;
    /// Deletes the product and releases every stored image.
    async fn remove(&self, actor: Actor, id: Uuid) -> Result<Product, ServiceError>;
    async fn seller_products(&self, actor: Actor) -> Result<Vec<Product>, ServiceError>;
}

pub struct CatalogServiceImpl {
    repos: Repositories,
    images: Arc<dyn ImageStore>,
}

impl CatalogServiceImpl {
    pub fn new(repos: Repositories, images: Arc<dyn ImageStore>) -> Self {
        Self { repos, images }
    }

    async fn owned_product(&self, actor: Actor, id: Uuid) -> Result<Product, ServiceError> {
        let product = self.get(id).await?;
        if !actor.is_admin() && product.seller_id != actor.id {
            return Err(ServiceError::Forbidden(
                "You can only manage your own products".into(),
            ));
        }
        Ok(product)
    }

    /// Uploads every image or none: on failure the ones already stored are released.
    async fn upload_all(&self, uploads: Vec<ImageUpload>) -> Result<Vec<ProductImage>, ServiceError> {
        if uploads.len() > MAX_IMAGES {
            return Err(ServiceError::Validation(format!(
                "At most {MAX_IMAGES} images per product"
            )));
        }
        let mut stored = Vec::with_capacity(uploads.len());
        for upload in uploads {
            match self.images.upload(upload).await {
                Ok(image) => stored.push(image),
                Err(e) => {
                    self.release(&stored).await;
                    return Err(e.into());
                }
            }
        }
        Ok(stored)
    }

    async fn release(&self, images: &[ProductImage]) {
        for image in images {
            if let Err(e) = self.images.destroy(&image.public_id).await {
                warn!(public_id = %image.public_id, error = %e, "Failed to release image");
            }
        }
    }
}

#[async_trait]
impl CatalogService for CatalogServiceImpl {
    async fn list(&self, query: ProductQuery) -> Result<ProductPage, ServiceError> {
        let query = query.normalized();
        if let (Some(min), Some(max)) = (query.min_price, query.max_price) {
            if min > max {
                return Err(ServiceError::Validation(
                    "minPrice cannot exceed maxPrice".into(),
                ));
            }
        }
        Ok(self.repos.products.list(&query).await?)
    }

    async fn get(&self, id: Uuid) -> Result<Product, ServiceError> {
        self.repos
            .products
            .get_by_id(id)
            .await
            .map_err(not_found("Product"))
    }

    #[instrument(skip(self, input, images), fields(seller = %actor.id, name = %input.name))]
    async fn create(
        &self,
        actor: Actor,
        input: NewProduct,
        images: Vec<ImageUpload>,
    ) -> Result<Product, ServiceError> {
        input.validate()?;
        check_price(input.price)?;
        if images.is_empty() {
            return Err(ServiceError::Validation("At least one image is required".into()));
        }
        let seller = self
            .repos
            .principals
            .get_by_id(actor.id)
            .await
            .map_err(not_found("Seller"))?;
        if !seller.can_sell() {
            return Err(ServiceError::Forbidden(
                "Only verified sellers can create products".into(),
            ));
        }

        let stored = self.upload_all(images).await?;
        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            description: input.description,
            price: input.price,
            category: input.category,
            stock: input.stock,
            images: stored,
            seller_id: seller.id,
            rating: Decimal::ZERO,
            num_reviews: 0,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.repos.products.insert(&product).await {
            self.release(&product.images).await;
            return Err(e.into());
        }
        info!(id = %product.id, "Product created");
        Ok(product)
    }

    #[instrument(skip(self, update, images), fields(actor = %actor.id))]
    async fn update(
        &self,
        actor: Actor,
        id: Uuid,
        update: ProductUpdate,
        images: Vec<ImageUpload>,
    ) -> Result<Product, ServiceError> {
        update.validate()?;
        if let Some(price) = update.price {
            check_price(price)?;
        }
        let mut product = self.owned_product(actor, id).await?;

        if let Some(name) = update.name {
            product.name = name.trim().to_string();
        }
        if let Some(description) = update.description {
            product.description = description;
        }
        if let Some(price) = update.price {
            product.price = price;
        }
        if let Some(category) = update.category {
            product.category = category;
        }

        let uploaded = !images.is_empty();
        let replaced = if images.is_empty() {
            Vec::new()
        } else {
            let fresh = self.upload_all(images).await?;
            std::mem::replace(&mut product.images, fresh)
        };
        product.updated_at = Utc::now();

        if let Err(e) = self.repos.products.update(&product).await {
            if uploaded {
                self.release(&product.images).await;
            }
            return Err(e.into());
        }
        self.release(&replaced).await;
        Ok(product)
    }

    #[instrument(skip(self), fields(actor = %actor.id))]
    async fn update_stock(
        &self,
        actor: Actor,
        id: Uuid,
        stock: i32,
    ) -> Result<Product, ServiceError> {
        if stock < 0 {
            return Err(ServiceError::Validation("Stock cannot be negative".into()));
        }
        self.owned_product(actor, id).await?;
        Ok(self.repos.products.set_stock(id, stock).await?)
    }

    #[instrument(skip(self), fields(actor = %actor.id))]
    async fn remove(&self, actor: Actor, id: Uuid) -> Result<Product, ServiceError> {
        self.owned_product(actor, id).await?;
        let removed = self
            .repos
            .products
            .delete(id)
            .await
            .map_err(not_found("Product"))?;
        self.release(&removed.images).await;
        info!(%id, images = removed.images.len(), "Product removed");
        Ok(removed)
    }

    async fn seller_products(&self, actor: Actor) -> Result<Vec<Product>, ServiceError> {
        Ok(self.repos.products.list_by_seller(actor.id).await?)
    }
}
