//! Money helpers. Amounts are `Decimal` in major currency units.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Largest tolerated gap between a client-submitted total and the recomputed one (0.01).
pub const TOTAL_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Whether a submitted total agrees with the server-side total.
pub fn totals_match(submitted: Decimal, computed: Decimal) -> bool {
    (submitted - computed).abs() <= TOTAL_EPSILON
}

/// `price * quantity`, or `None` when the product leaves `Decimal`'s range.
pub fn line_total(price: Decimal, quantity: i32) -> Option<Decimal> {
    price.checked_mul(Decimal::from(quantity))
}

/// Checked sum of `(price, quantity)` lines.
pub fn lines_total(lines: impl IntoIterator<Item = (Decimal, i32)>) -> Option<Decimal> {
    lines
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, (price, qty)| {
            acc.checked_add(line_total(price, qty)?)
        })
}

/// Converts to the provider's integer minor units (cents), rounding half away from zero.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}
