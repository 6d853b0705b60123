//! # Data Repository Layer
//!
//! Repository traits for every stored aggregate (products, carts, wishlists,
//! orders, reviews, principals) with two implementations: PostgreSQL
//! ([`pg`]) and an in-process store ([`memory`]) used for local runs and tests.
//!
//! Both implementations provide the same atomicity: order materialization is
//! all-or-nothing, unique per payment session, and never drives stock below zero.

use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::{
    Cart, Order, Principal, Product, ProductPage, ProductQuery, RatingSummary, Review, Role,
    Wishlist,
};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod pg;

/// # RepositoryError
///
/// Error types that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database-related errors, wrapping the underlying PostgreSQL error
    #[error("Database error: {0}")]
    Db(#[from] tokio_postgres::Error),
    /// Failed to obtain a connection from the pool.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    /// A stored document could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// No result found.
    #[error("Not found")]
    NotFound,
    /// A uniqueness rule or a conditional update was violated.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// A conditional stock decrement found fewer units than requested.
    #[error("Insufficient stock for product {product_id}")]
    InsufficientStock { product_id: Uuid },
    /// A stored value does not map onto the domain model.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Outcome of [`OrdersRepository::materialize`].
#[derive(Debug, Clone, PartialEq)]
pub enum Materialized {
    /// This call created the order and decremented stock.
    Created(Order),
    /// An order for the same payment session already existed; nothing changed.
    Existing(Order),
}

impl Materialized {
    pub fn was_created(&self) -> bool {
        matches!(self, Materialized::Created(_))
    }

    pub fn into_order(self) -> Order {
        match self {
            Materialized::Created(order) | Materialized::Existing(order) => order,
        }
    }
}

/// # ProductsRepository
///
/// Catalog storage. `name` is unique and `stock` never goes negative.
#[async_trait]
pub trait ProductsRepository: Send + Sync {
    async fn insert(&self, product: &Product) -> Result<(), RepositoryError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Product, RepositoryError>;
    /// Products for the given ids; missing ids are skipped.
    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Product>, RepositoryError>;
    async fn list(&self, query: &ProductQuery) -> Result<ProductPage, RepositoryError>;
    async fn list_by_seller(&self, seller_id: Uuid) -> Result<Vec<Product>, RepositoryError>;
    async fn update(&self, product: &Product) -> Result<(), RepositoryError>;
    async fn set_stock(&self, id: Uuid, stock: i32) -> Result<Product, RepositoryError>;
    async fn set_rating(&self, id: Uuid, summary: RatingSummary) -> Result<(), RepositoryError>;
    /// Removes the product and returns what was stored, images included.
    async fn delete(&self, id: Uuid) -> Result<Product, RepositoryError>;
}

/// # CartsRepository
///
/// One cart document per user.
#[async_trait]
pub trait CartsRepository: Send + Sync {
    async fn get(&self, user_id: Uuid) -> Result<Option<Cart>, RepositoryError>;
    async fn save(&self, cart: &Cart) -> Result<(), RepositoryError>;
    async fn delete(&self, user_id: Uuid) -> Result<(), RepositoryError>;
}

/// # WishlistsRepository
#[async_trait]
pub trait WishlistsRepository: Send + Sync {
    async fn get(&self, user_id: Uuid) -> Result<Option<Wishlist>, RepositoryError>;
    async fn save(&self, wishlist: &Wishlist) -> Result<(), RepositoryError>;
    async fn delete(&self, user_id: Uuid) -> Result<(), RepositoryError>;
}

/// # OrdersRepository
///
/// Orders plus the atomic operations that touch stock.
#[async_trait]
pub trait OrdersRepository: Send + Sync {
    /// Atomically stores the order and decrements stock for every line.
    ///
    /// If another order already holds the same payment session id, nothing is
    /// written and that order is returned as [`Materialized::Existing`]. If any
    /// line lacks stock, nothing is written and
    /// [`RepositoryError::InsufficientStock`] is returned.
    async fn materialize(&self, order: &Order) -> Result<Materialized, RepositoryError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Order, RepositoryError>;
    async fn find_by_session(&self, session_id: &str) -> Result<Option<Order>, RepositoryError>;
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, RepositoryError>;
    /// Orders containing at least one line sold by `seller_id`, newest first.
    async fn list_by_seller(&self, seller_id: Uuid) -> Result<Vec<Order>, RepositoryError>;
    async fn list_all(&self) -> Result<Vec<Order>, RepositoryError>;
    /// Writes line statuses and the derived status if `order.version` is still current.
    ///
    /// Returns the stored order with its new version, or
    /// [`RepositoryError::Conflict`] when someone else wrote first.
    async fn save_fulfillment(&self, order: &Order) -> Result<Order, RepositoryError>;
    /// Moves a pending order with no shipped lines to cancelled and puts its
    /// stock back, atomically.
    async fn cancel(&self, order_id: Uuid) -> Result<Order, RepositoryError>;
    /// Sets the admin review flag; a second call is a conflict.
    async fn mark_reviewed(&self, order_id: Uuid) -> Result<Order, RepositoryError>;
}

/// # ReviewsRepository
#[async_trait]
pub trait ReviewsRepository: Send + Sync {
    /// Inserts, or overwrites the caller's existing review of the same product.
    async fn upsert(&self, review: &Review) -> Result<Review, RepositoryError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Review, RepositoryError>;
    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError>;
    async fn list_by_product(&self, product_id: Uuid) -> Result<Vec<Review>, RepositoryError>;
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Review>, RepositoryError>;
    async fn summary(&self, product_id: Uuid) -> Result<RatingSummary, RepositoryError>;
}

/// # PrincipalsRepository
///
/// Accounts of every role; `(role, email)` is unique.
#[async_trait]
pub trait PrincipalsRepository: Send + Sync {
    async fn insert(&self, principal: &Principal) -> Result<(), RepositoryError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Principal, RepositoryError>;
    async fn find_by_email(
        &self,
        role: Role,
        email: &str,
    ) -> Result<Option<Principal>, RepositoryError>;
    async fn update(&self, principal: &Principal) -> Result<(), RepositoryError>;
    async fn list_by_role(&self, role: Role) -> Result<Vec<Principal>, RepositoryError>;
    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError>;
}

/// The full set of repositories the services are wired with.
#[derive(Clone)]
pub struct Repositories {
    pub products: Arc<dyn ProductsRepository>,
    pub carts: Arc<dyn CartsRepository>,
    pub wishlists: Arc<dyn WishlistsRepository>,
    pub orders: Arc<dyn OrdersRepository>,
    pub reviews: Arc<dyn ReviewsRepository>,
    pub principals: Arc<dyn PrincipalsRepository>,
}

impl Repositories {
    /// PostgreSQL-backed repositories sharing one connection pool.
    pub fn postgres(pool: Pool) -> Self {
        Self {
            products: Arc::new(pg::PgProductsRepository::new(pool.clone())),
            carts: Arc::new(pg::PgCartsRepository::new(pool.clone())),
            wishlists: Arc::new(pg::PgWishlistsRepository::new(pool.clone())),
            orders: Arc::new(pg::PgOrdersRepository::new(pool.clone())),
            reviews: Arc::new(pg::PgReviewsRepository::new(pool.clone())),
            principals: Arc::new(pg::PgPrincipalsRepository::new(pool)),
        }
    }

    /// Repositories over one fresh in-memory store.
    pub fn in_memory() -> Self {
        memory::MemoryStore::new().repositories()
    }
}
