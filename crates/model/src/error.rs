use thiserror::Error;
use uuid::Uuid;

use crate::order::{LineStatus, OrderStatus};

/// Violations of domain rules that can be detected without touching storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("product {0} is already in the cart")]
    AlreadyInCart(Uuid),
    #[error("product {0} is not in the cart")]
    NotInCart(Uuid),
    #[error("quantity must be at least 1, got {0}")]
    InvalidQuantity(i32),
    #[error("product {0} is already in the wishlist")]
    AlreadyInWishlist(Uuid),
    #[error("product {0} is not in the wishlist")]
    NotInWishlist(Uuid),
    #[error("unknown category '{0}'")]
    UnknownCategory(String),
    #[error("unknown status '{0}'")]
    UnknownStatus(String),
    #[error("unknown role '{0}'")]
    UnknownRole(String),
    #[error("cannot move a line from {from} to {to}")]
    InvalidTransition { from: LineStatus, to: LineStatus },
    #[error("order has no line for product {0}")]
    LineNotFound(Uuid),
    #[error("line for product {0} belongs to another seller")]
    NotLineOwner(Uuid),
    #[error("order is {0} and its lines can no longer change")]
    OrderClosed(OrderStatus),
    #[error("only pending orders can be cancelled, this one is {0}")]
    NotCancellable(OrderStatus),
    #[error("order has lines that were already shipped and can no longer be cancelled")]
    PartiallyFulfilled,
    #[error("order has already been reviewed")]
    AlreadyReviewed,
    #[error("a blocked seller cannot be verified")]
    SellerBlocked,
    #[error("principal is not a seller")]
    NotASeller,
    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(i16),
    #[error("amount is too large")]
    AmountOverflow,
}
