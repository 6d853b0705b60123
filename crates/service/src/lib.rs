//! Business logic layer for the storefront.
//!
//! Each area (identity, catalog, cart, wishlist, orders, payments, reviews) is
//! a trait with one implementation wired over [`Repositories`] and the
//! collaborator [`ports`]. Handlers depend on the traits only.
//!
//! # Features
//! - All-or-nothing order creation with server-side total verification.
//! - Idempotent order materialization from payment sessions (poll and webhook).
//! - Cart totals recomputed in exactly one persist step.
//! - Role-scoped order views and seller-owned fulfilment transitions.
//! - Well-typed error handling via [`ServiceError`].

use std::sync::Arc;
use std::time::Duration;

use model::DomainError;
use repository::{Repositories, RepositoryError};
use thiserror::Error;
use uuid::Uuid;

pub mod cart;
pub mod catalog;
pub mod identity;
pub mod orders;
pub mod payments;
pub mod ports;
pub mod reviews;
pub mod wishlist;

#[cfg(test)]
pub(crate) mod testing;

pub use cart::{CartItemView, CartService, CartServiceImpl, CartView};
pub use catalog::{CatalogService, CatalogServiceImpl, NewProduct, ProductUpdate};
pub use identity::{
    AuthSession, ChangePasswordInput, IdentityService, IdentityServiceImpl, LoginInput,
    ProfileUpdate, RegisterInput, SellerModeration, SessionTokens, TokenPurpose,
};
pub use orders::{
    CreateOrderInput, LineStatusInput, OrderDetail, OrderLineInput, OrderService,
    OrderServiceImpl, SellerStats,
};
pub use payments::{
    CheckoutInput, CheckoutStarted, PaymentService, PaymentServiceImpl, SessionStatus,
    WebhookOutcome,
};
pub use ports::{
    CheckoutLineItem, CheckoutRequest, CheckoutSession, ImageStore, ImageUpload, MailMessage,
    Mailer, PaymentGateway, ProviderError, SessionItem, SessionMetadata, WebhookEvent,
};
pub use reviews::{AddReviewInput, ReviewService, ReviewServiceImpl};
pub use wishlist::{WishlistService, WishlistServiceImpl, WishlistView};

/// The main error type for every service operation.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The input is structurally or semantically invalid.
    #[error("{0}")]
    Validation(String),
    /// No valid session, or wrong credentials.
    #[error("{0}")]
    Unauthorized(String),
    /// The caller is authenticated but may not do this.
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    /// Not enough units left to fulfil a line.
    #[error("Insufficient stock for product {0}")]
    InsufficientStock(Uuid),
    /// An external provider failed.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
    /// A storage operation failed.
    #[error("Database error: {0}")]
    Repository(RepositoryError),
    /// Some unexpected or unhandled error.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => ServiceError::NotFound("Resource not found".into()),
            RepositoryError::Conflict(msg) => ServiceError::Conflict(msg),
            RepositoryError::InsufficientStock { product_id } => {
                ServiceError::InsufficientStock(product_id)
            }
            other => ServiceError::Repository(other),
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        let msg = err.to_string();
        match err {
            DomainError::AlreadyInCart(_)
            | DomainError::AlreadyInWishlist(_)
            | DomainError::AlreadyReviewed
            | DomainError::SellerBlocked
            | DomainError::NotCancellable(_)
            | DomainError::PartiallyFulfilled
            | DomainError::OrderClosed(_) => ServiceError::Conflict(msg),
            DomainError::NotInCart(_)
            | DomainError::NotInWishlist(_)
            | DomainError::LineNotFound(_) => ServiceError::NotFound(msg),
            DomainError::NotLineOwner(_) => ServiceError::Forbidden(msg),
            DomainError::InvalidQuantity(_)
            | DomainError::UnknownCategory(_)
            | DomainError::UnknownStatus(_)
            | DomainError::UnknownRole(_)
            | DomainError::InvalidTransition { .. }
            | DomainError::NotASeller
            | DomainError::InvalidRating(_)
            | DomainError::AmountOverflow => ServiceError::Validation(msg),
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::Validation(err.to_string())
    }
}

/// Maps a repository `NotFound` to a message naming what was missing.
pub(crate) fn not_found(what: &'static str) -> impl Fn(RepositoryError) -> ServiceError {
    move |err| match err {
        RepositoryError::NotFound => ServiceError::NotFound(format!("{what} not found")),
        other => other.into(),
    }
}

/// Settings the services need from the application configuration.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub jwt_secret: String,
    pub session_ttl: Duration,
    pub reset_token_ttl: Duration,
    pub admin_registration_key: String,
    /// Base URL of the storefront client, used for links in mails and checkout redirects.
    pub client_url: String,
    pub currency: String,
}

/// Externally provided collaborators.
#[derive(Clone)]
pub struct Ports {
    pub images: Arc<dyn ImageStore>,
    pub payments: Arc<dyn PaymentGateway>,
    pub mailer: Arc<dyn Mailer>,
}

/// Every service, constructed once and shared by the HTTP layer.
#[derive(Clone)]
pub struct Services {
    pub tokens: Arc<SessionTokens>,
    pub identity: Arc<dyn IdentityService>,
    pub catalog: Arc<dyn CatalogService>,
    pub carts: Arc<dyn CartService>,
    pub wishlists: Arc<dyn WishlistService>,
    pub orders: Arc<dyn OrderService>,
    pub payments: Arc<dyn PaymentService>,
    pub reviews: Arc<dyn ReviewService>,
}

impl Services {
    pub fn new(repos: Repositories, ports: Ports, settings: ServiceSettings) -> Self {
        let tokens = Arc::new(SessionTokens::new(
            &settings.jwt_secret,
            settings.session_ttl,
            settings.reset_token_ttl,
        ));
        let carts = Arc::new(CartServiceImpl::new(repos.clone()));
        Self {
            identity: Arc::new(IdentityServiceImpl::new(
                repos.clone(),
                tokens.clone(),
                ports.mailer.clone(),
                settings.clone(),
            )),
            catalog: Arc::new(CatalogServiceImpl::new(repos.clone(), ports.images.clone())),
            wishlists: Arc::new(WishlistServiceImpl::new(repos.clone())),
            orders: Arc::new(OrderServiceImpl::new(repos.clone(), carts.clone())),
            payments: Arc::new(PaymentServiceImpl::new(
                repos.clone(),
                ports.payments.clone(),
                carts.clone(),
                settings,
            )),
            reviews: Arc::new(ReviewServiceImpl::new(repos)),
            carts,
            tokens,
        }
    }
}
