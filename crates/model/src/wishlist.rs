use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// A per-user set of product references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wishlist {
    pub user_id: Uuid,
    pub product_ids: Vec<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl Wishlist {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            product_ids: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn contains(&self, product_id: Uuid) -> bool {
        self.product_ids.contains(&product_id)
    }

    pub fn add(&mut self, product_id: Uuid) -> Result<(), DomainError> {
        if self.contains(product_id) {
            return Err(DomainError::AlreadyInWishlist(product_id));
        }
        self.product_ids.push(product_id);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn remove(&mut self, product_id: Uuid) -> Result<(), DomainError> {
        if !self.contains(product_id) {
            return Err(DomainError::NotInWishlist(product_id));
        }
        self.product_ids.retain(|p| *p != product_id);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Adds the product if absent, removes it otherwise. Returns whether it is now present.
    pub fn toggle(&mut self, product_id: Uuid) -> bool {
        let present = if self.contains(product_id) {
            self.product_ids.retain(|p| *p != product_id);
            false
        } else {
            self.product_ids.push(product_id);
            true
        };
        self.updated_at = Utc::now();
        present
    }

    pub fn clear(&mut self) {
        self.product_ids.clear();
        self.updated_at = Utc::now();
    }
}
