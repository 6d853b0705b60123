//! Route handlers, grouped by area. Each maps one request onto one service call.

pub mod cart;
pub mod catalog;
pub mod identity;
pub mod orders;
pub mod reviews;
