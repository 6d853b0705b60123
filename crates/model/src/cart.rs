use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::money::{line_total, lines_total};

/// One product in a cart with the price seen when it was added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: Decimal,
}

impl CartLine {
    pub fn subtotal(&self) -> Result<Decimal, DomainError> {
        line_total(self.price, self.quantity).ok_or(DomainError::AmountOverflow)
    }
}

/// Exactly one per user, created lazily.
///
/// `total_price` is a cached value. The mutators below only change the line
/// list; callers persist through a step that calls [`Cart::recompute_total`]
/// so the cached total can never drift from the lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub user_id: Uuid,
    pub lines: Vec<CartLine>,
    pub total_price: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            lines: Vec::new(),
            total_price: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    pub fn computed_total(&self) -> Result<Decimal, DomainError> {
        lines_total(self.lines.iter().map(|l| (l.price, l.quantity)))
            .ok_or(DomainError::AmountOverflow)
    }

    /// Fails without touching the cached total when the lines overflow.
    pub fn recompute_total(&mut self) -> Result<(), DomainError> {
        self.total_price = self.computed_total()?;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn contains(&self, product_id: Uuid) -> bool {
        self.lines.iter().any(|l| l.product_id == product_id)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Adds a new line. A product already present is rejected, never merged.
    pub fn add_line(
        &mut self,
        product_id: Uuid,
        quantity: i32,
        price: Decimal,
    ) -> Result<(), DomainError> {
        if quantity < 1 {
            return Err(DomainError::InvalidQuantity(quantity));
        }
        if self.contains(product_id) {
            return Err(DomainError::AlreadyInCart(product_id));
        }
        self.lines.push(CartLine {
            product_id,
            quantity,
            price,
        });
        Ok(())
    }

    pub fn remove_line(&mut self, product_id: Uuid) -> Result<CartLine, DomainError> {
        let idx = self
            .lines
            .iter()
            .position(|l| l.product_id == product_id)
            .ok_or(DomainError::NotInCart(product_id))?;
        Ok(self.lines.remove(idx))
    }

    pub fn set_quantity(&mut self, product_id: Uuid, quantity: i32) -> Result<(), DomainError> {
        if quantity < 1 {
            return Err(DomainError::InvalidQuantity(quantity));
        }
        let line = self
            .lines
            .iter_mut()
            .find(|l| l.product_id == product_id)
            .ok_or(DomainError::NotInCart(product_id))?;
        line.quantity = quantity;
        Ok(())
    }

    /// Keeps only lines whose product satisfies `keep`; returns how many were dropped.
    pub fn retain_products(&mut self, mut keep: impl FnMut(&Uuid) -> bool) -> usize {
        let before = self.lines.len();
        self.lines.retain(|l| keep(&l.product_id));
        before - self.lines.len()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn two_line_scenario_totals() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut cart = Cart::new(Uuid::new_v4());

        cart.add_line(a, 2, dec!(500)).unwrap();
        cart.add_line(b, 1, dec!(300)).unwrap();
        cart.recompute_total().unwrap();
        assert_eq!(cart.total_price, dec!(1300));

        cart.remove_line(a).unwrap();
        cart.recompute_total().unwrap();
        assert_eq!(cart.total_price, dec!(300));
    }

    #[test]
    fn duplicate_add_is_rejected_and_leaves_lines_alone() {
        let p = Uuid::new_v4();
        let mut cart = Cart::new(Uuid::new_v4());
        cart.add_line(p, 1, dec!(10)).unwrap();

        assert_eq!(cart.add_line(p, 3, dec!(10)), Err(DomainError::AlreadyInCart(p)));
        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.lines[0].quantity, 1);
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let mut cart = Cart::new(Uuid::new_v4());
        assert_eq!(
            cart.add_line(Uuid::new_v4(), 0, dec!(1)),
            Err(DomainError::InvalidQuantity(0))
        );
    }

    #[test]
    fn removing_absent_product_signals_not_in_cart() {
        let mut cart = Cart::new(Uuid::new_v4());
        let p = Uuid::new_v4();
        assert_eq!(cart.remove_line(p), Err(DomainError::NotInCart(p)));
    }

    #[test]
    fn overflowing_total_is_an_error_and_keeps_the_cached_total() {
        let mut cart = Cart::new(Uuid::new_v4());
        cart.add_line(Uuid::new_v4(), 1, dec!(10)).unwrap();
        cart.recompute_total().unwrap();

        cart.add_line(Uuid::new_v4(), i32::MAX, Decimal::MAX).unwrap();
        assert_eq!(cart.recompute_total(), Err(DomainError::AmountOverflow));
        assert_eq!(cart.total_price, dec!(10));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(usize, i32, i64),
        Remove(usize),
        SetQuantity(usize, i32),
        Clear,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0..5usize, 1..10i32, 1..100_000i64).prop_map(|(p, q, c)| Op::Add(p, q, c)),
            2 => (0..5usize).prop_map(Op::Remove),
            2 => (0..5usize, 1..10i32).prop_map(|(p, q)| Op::SetQuantity(p, q)),
            1 => Just(Op::Clear),
        ]
    }

    proptest! {
        #[test]
        fn total_always_matches_lines(ops in proptest::collection::vec(op(), 0..40)) {
            let products: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
            let mut cart = Cart::new(Uuid::new_v4());

            for op in ops {
                let before = cart.lines.len();
                let result = match op {
                    Op::Add(p, q, cents) => cart.add_line(products[p], q, Decimal::new(cents, 2)),
                    Op::Remove(p) => cart.remove_line(products[p]).map(|_| ()),
                    Op::SetQuantity(p, q) => cart.set_quantity(products[p], q),
                    Op::Clear => { cart.clear(); Ok(()) }
                };
                if let Err(DomainError::AlreadyInCart(_)) = result {
                    prop_assert_eq!(cart.lines.len(), before);
                }
                cart.recompute_total().unwrap();

                let expected: Decimal = cart
                    .lines
                    .iter()
                    .map(|l| l.price * Decimal::from(l.quantity))
                    .sum();
                prop_assert_eq!(cart.total_price, expected);
            }
        }
    }
}
