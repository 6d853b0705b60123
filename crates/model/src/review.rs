use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// At most one per (user, product); re-submitting overwrites it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub product_id: Uuid,
    pub rating: i16,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Review {
    pub fn check_rating(rating: i16) -> Result<i16, DomainError> {
        if (1..=5).contains(&rating) {
            Ok(rating)
        } else {
            Err(DomainError::InvalidRating(rating))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingSummary {
    pub average_rating: Decimal,
    pub total_reviews: i64,
}

impl RatingSummary {
    /// Averages the ratings, rounded to one decimal place.
    pub fn from_ratings(ratings: impl IntoIterator<Item = i16>) -> Self {
        let (sum, count) = ratings
            .into_iter()
            .fold((0i64, 0i64), |(s, c), r| (s + i64::from(r), c + 1));
        let average_rating = if count == 0 {
            Decimal::ZERO
        } else {
            (Decimal::from(sum) / Decimal::from(count)).round_dp(1)
        };
        Self {
            average_rating,
            total_reviews: count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn average_rounds_to_one_decimal() {
        let s = RatingSummary::from_ratings([5, 4, 4]);
        assert_eq!(s.average_rating, dec!(4.3));
        assert_eq!(s.total_reviews, 3);
    }

    #[test]
    fn no_reviews_average_zero() {
        let s = RatingSummary::from_ratings(std::iter::empty());
        assert_eq!(s.average_rating, Decimal::ZERO);
        assert_eq!(s.total_reviews, 0);
    }

    #[test]
    fn ratings_outside_one_to_five_are_rejected() {
        assert!(Review::check_rating(0).is_err());
        assert!(Review::check_rating(6).is_err());
        assert_eq!(Review::check_rating(5), Ok(5));
    }
}
