use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::DomainError;
use crate::money::{line_total, lines_total};

/// Fulfilment status of a single order line. Declaration order is the advancement order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStatus {
    Pending,
    Shipped,
    Delivered,
}

impl LineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineStatus::Pending => "pending",
            LineStatus::Shipped => "shipped",
            LineStatus::Delivered => "delivered",
        }
    }

    pub fn next(self) -> Option<LineStatus> {
        match self {
            LineStatus::Pending => Some(LineStatus::Shipped),
            LineStatus::Shipped => Some(LineStatus::Delivered),
            LineStatus::Delivered => None,
        }
    }

    /// Moves exactly one step forward; skipping or reverting is rejected.
    pub fn advance_to(self, target: LineStatus) -> Result<LineStatus, DomainError> {
        if self.next() == Some(target) {
            Ok(target)
        } else {
            Err(DomainError::InvalidTransition {
                from: self,
                to: target,
            })
        }
    }
}

impl fmt::Display for LineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LineStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LineStatus::Pending),
            "shipped" => Ok(LineStatus::Shipped),
            "delivered" => Ok(LineStatus::Delivered),
            _ => Err(DomainError::UnknownStatus(s.to_string())),
        }
    }
}

/// Order-level status; derived from the lines except for `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            _ => Err(DomainError::UnknownStatus(s.to_string())),
        }
    }
}

impl From<LineStatus> for OrderStatus {
    fn from(status: LineStatus) -> Self {
        match status {
            LineStatus::Pending => OrderStatus::Pending,
            LineStatus::Shipped => OrderStatus::Shipped,
            LineStatus::Delivered => OrderStatus::Delivered,
        }
    }
}

/// The order advances only as far as its least advanced line.
///
/// All delivered gives `Delivered`; any pending gives `Pending`; every other
/// mix (shipped and delivered, no pending) gives `Shipped`. No lines counts as pending.
pub fn derive_order_status(lines: impl IntoIterator<Item = LineStatus>) -> OrderStatus {
    lines
        .into_iter()
        .min()
        .map_or(OrderStatus::Pending, OrderStatus::from)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    #[default]
    Card,
    Cod,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Cod => "cod",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(PaymentMethod::Card),
            "cod" => Ok(PaymentMethod::Cod),
            _ => Err(DomainError::UnknownStatus(s.to_string())),
        }
    }
}

/// Shipping address captured with the order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[validate(length(min = 1, max = 120))]
    pub full_name: String,
    #[validate(length(min = 5, max = 20))]
    pub phone: String,
    #[validate(length(min = 1, max = 200))]
    pub street: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[validate(length(min = 2, max = 12))]
    pub postal_code: String,
    #[validate(length(min = 2, max = 60))]
    pub country: String,
}

/// A snapshot of the product taken when the order was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: Uuid,
    pub seller_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub image: Option<String>,
    pub quantity: i32,
    pub status: LineStatus,
}

impl OrderLine {
    pub fn subtotal(&self) -> Result<Decimal, DomainError> {
        line_total(self.price, self.quantity).ok_or(DomainError::AmountOverflow)
    }
}

/// Everything needed to create an order; ids and statuses are assigned by [`Order::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDraft {
    pub user_id: Uuid,
    pub lines: Vec<OrderLine>,
    pub address: Address,
    pub amount_total: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_session_id: Option<String>,
}

/// Immutable apart from line statuses, the derived status and the admin review flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub lines: Vec<OrderLine>,
    pub address: Address,
    pub amount_total: Decimal,
    pub status: OrderStatus,
    pub reviewed_by_admin: bool,
    pub payment_method: PaymentMethod,
    /// Hosted-checkout session this order was materialized from; unique when present.
    pub payment_session_id: Option<String>,
    #[serde(skip)]
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(draft: OrderDraft) -> Self {
        let now = Utc::now();
        let status = derive_order_status(draft.lines.iter().map(|l| l.status));
        Self {
            id: Uuid::new_v4(),
            user_id: draft.user_id,
            lines: draft.lines,
            address: draft.address,
            amount_total: draft.amount_total,
            status,
            reviewed_by_admin: false,
            payment_method: draft.payment_method,
            payment_session_id: draft.payment_session_id,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn computed_total(&self) -> Result<Decimal, DomainError> {
        lines_total(self.lines.iter().map(|l| (l.price, l.quantity)))
            .ok_or(DomainError::AmountOverflow)
    }

    pub fn has_seller(&self, seller_id: Uuid) -> bool {
        self.lines.iter().any(|l| l.seller_id == seller_id)
    }

    /// The order restricted to one seller's lines, or `None` if the seller has none.
    pub fn seller_view(&self, seller_id: Uuid) -> Option<Order> {
        let lines: Vec<OrderLine> = self
            .lines
            .iter()
            .filter(|l| l.seller_id == seller_id)
            .cloned()
            .collect();
        if lines.is_empty() {
            return None;
        }
        Some(Order {
            lines,
            ..self.clone()
        })
    }

    /// Advances one line on behalf of its seller and re-derives the order status.
    pub fn set_line_status(
        &mut self,
        seller_id: Uuid,
        product_id: Uuid,
        target: LineStatus,
    ) -> Result<OrderStatus, DomainError> {
        if self.status == OrderStatus::Cancelled {
            return Err(DomainError::OrderClosed(self.status));
        }
        let line = self
            .lines
            .iter_mut()
            .find(|l| l.product_id == product_id)
            .ok_or(DomainError::LineNotFound(product_id))?;
        if line.seller_id != seller_id {
            return Err(DomainError::NotLineOwner(product_id));
        }
        line.status = line.status.advance_to(target)?;
        self.status = derive_order_status(self.lines.iter().map(|l| l.status));
        self.updated_at = Utc::now();
        Ok(self.status)
    }

    /// Only a pending order whose lines are all still pending can be cancelled.
    pub fn cancel(&mut self) -> Result<(), DomainError> {
        if self.status != OrderStatus::Pending {
            return Err(DomainError::NotCancellable(self.status));
        }
        if self.lines.iter().any(|l| l.status != LineStatus::Pending) {
            return Err(DomainError::PartiallyFulfilled);
        }
        self.status = OrderStatus::Cancelled;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_reviewed(&mut self) -> Result<(), DomainError> {
        if self.reviewed_by_admin {
            return Err(DomainError::AlreadyReviewed);
        }
        self.reviewed_by_admin = true;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use LineStatus::*;

    fn line(seller: Uuid, status: LineStatus) -> OrderLine {
        OrderLine {
            product_id: Uuid::new_v4(),
            seller_id: seller,
            name: "Denim Jacket".into(),
            price: dec!(500),
            image: None,
            quantity: 2,
            status,
        }
    }

    fn order(lines: Vec<OrderLine>) -> Order {
        Order::new(OrderDraft {
            user_id: Uuid::new_v4(),
            lines,
            address: Address::default(),
            amount_total: dec!(1000),
            payment_method: PaymentMethod::Card,
            payment_session_id: None,
        })
    }

    #[test]
    fn order_status_is_the_least_advanced_line() {
        let cases = [
            (vec![Delivered, Delivered], OrderStatus::Delivered),
            (vec![Shipped, Shipped], OrderStatus::Shipped),
            (vec![Shipped, Delivered], OrderStatus::Shipped),
            (vec![Delivered, Shipped, Delivered], OrderStatus::Shipped),
            (vec![Pending, Delivered], OrderStatus::Pending),
            (vec![Pending, Shipped], OrderStatus::Pending),
            (vec![Pending], OrderStatus::Pending),
            (vec![], OrderStatus::Pending),
        ];
        for (lines, expected) in cases {
            assert_eq!(derive_order_status(lines.clone()), expected, "lines: {lines:?}");
        }
    }

    #[test]
    fn line_status_only_moves_one_step_forward() {
        assert_eq!(Pending.advance_to(Shipped), Ok(Shipped));
        assert_eq!(Shipped.advance_to(Delivered), Ok(Delivered));
        assert!(Pending.advance_to(Delivered).is_err());
        assert!(Delivered.advance_to(Pending).is_err());
        assert!(Shipped.advance_to(Shipped).is_err());
    }

    #[test]
    fn seller_cannot_touch_another_sellers_line() {
        let (mine, theirs) = (Uuid::new_v4(), Uuid::new_v4());
        let mut o = order(vec![line(mine, Pending), line(theirs, Pending)]);
        let foreign = o.lines[1].product_id;

        assert_eq!(
            o.set_line_status(mine, foreign, Shipped),
            Err(DomainError::NotLineOwner(foreign))
        );
        assert_eq!(o.lines[1].status, Pending);
    }

    #[test]
    fn mixed_shipped_and_delivered_lines_make_a_shipped_order() {
        let seller = Uuid::new_v4();
        let mut o = order(vec![line(seller, Pending), line(seller, Pending)]);
        let (a, b) = (o.lines[0].product_id, o.lines[1].product_id);

        assert_eq!(o.set_line_status(seller, a, Shipped), Ok(OrderStatus::Pending));
        assert_eq!(o.set_line_status(seller, b, Shipped), Ok(OrderStatus::Shipped));
        assert_eq!(o.set_line_status(seller, a, Delivered), Ok(OrderStatus::Shipped));
        assert_eq!(o.set_line_status(seller, b, Delivered), Ok(OrderStatus::Delivered));
        assert!(o.set_line_status(seller, b, Pending).is_err());
    }

    #[test]
    fn only_pending_orders_cancel() {
        let seller = Uuid::new_v4();
        let mut o = order(vec![line(seller, Pending)]);
        let p = o.lines[0].product_id;
        o.set_line_status(seller, p, Shipped).unwrap();
        assert_eq!(o.cancel(), Err(DomainError::NotCancellable(OrderStatus::Shipped)));

        let mut o = order(vec![line(seller, Pending)]);
        o.cancel().unwrap();
        assert_eq!(o.status, OrderStatus::Cancelled);
        assert!(o.set_line_status(seller, o.lines[0].product_id, Shipped).is_err());
    }

    #[test]
    fn shipping_one_line_blocks_cancel_while_the_order_stays_pending() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut o = order(vec![line(a, Pending), line(b, Pending)]);
        let shipped = o.lines[0].product_id;
        assert_eq!(o.set_line_status(a, shipped, Shipped), Ok(OrderStatus::Pending));

        assert_eq!(o.cancel(), Err(DomainError::PartiallyFulfilled));
        assert_eq!(o.status, OrderStatus::Pending);
    }

    #[test]
    fn admin_review_is_set_once() {
        let mut o = order(vec![line(Uuid::new_v4(), Pending)]);
        o.mark_reviewed().unwrap();
        assert_eq!(o.mark_reviewed(), Err(DomainError::AlreadyReviewed));
    }

    #[test]
    fn seller_view_keeps_only_that_sellers_lines() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let o = order(vec![line(a, Pending), line(b, Pending), line(a, Pending)]);
        let view = o.seller_view(a).unwrap();
        assert_eq!(view.lines.len(), 2);
        assert!(view.lines.iter().all(|l| l.seller_id == a));
        assert!(o.seller_view(Uuid::new_v4()).is_none());
    }

    #[test]
    fn order_line_deserializes_from_stored_json() {
        let json = r#"{
            "productId": "6f1c1f44-2b8e-4d57-9f39-9d8c1b7a0c11",
            "sellerId": "0b7e3a55-3d0f-4a8c-9c71-1e5f7c2d9a10",
            "name": "Kids Hoodie",
            "price": "300.00",
            "image": null,
            "quantity": 1,
            "status": "shipped"
        }"#;
        let line: OrderLine = serde_json::from_str(json).unwrap();
        assert_eq!(line.status, Shipped);
        assert_eq!(line.subtotal(), Ok(dec!(300)));
    }
}
