//! Domain model for the storefront backend.
//!
//! Plain data types shared by every layer, plus the rules that do not need
//! storage: cart totals, the money tolerance used when checking submitted
//! totals, the line/order fulfilment state machine and seller moderation.

mod cart;
mod catalog;
mod error;
mod identity;
pub mod money;
mod order;
mod review;
mod wishlist;

pub use cart::{Cart, CartLine};
pub use catalog::{Category, Product, ProductImage, ProductPage, ProductQuery, ProductSort};
pub use error::DomainError;
pub use identity::{Actor, Principal, Role, SellerProfile};
pub use order::{
    derive_order_status, Address, LineStatus, Order, OrderDraft, OrderLine, OrderStatus,
    PaymentMethod,
};
pub use review::{RatingSummary, Review};
pub use wishlist::Wishlist;
