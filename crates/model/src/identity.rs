use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::order::Address;

/// The three kinds of principal. Every route is gated on one or more of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Seller,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Seller => "seller",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "seller" => Ok(Role::Seller),
            "admin" => Ok(Role::Admin),
            _ => Err(DomainError::UnknownRole(s.to_string())),
        }
    }
}

/// Seller-only fields. A blocked seller is never verified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerProfile {
    pub shop_name: String,
    pub is_verified: bool,
    pub is_blocked: bool,
}

/// A customer, seller or admin account.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub phone: Option<String>,
    pub address: Option<Address>,
    pub is_active: bool,
    #[serde(flatten)]
    pub seller: Option<SellerProfile>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Principal {
    pub fn new(role: Role, name: String, email: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            role,
            name,
            email,
            password_hash,
            phone: None,
            address: None,
            is_active: true,
            seller: (role == Role::Seller).then(SellerProfile::default),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn actor(&self) -> Actor {
        Actor {
            id: self.id,
            role: self.role,
        }
    }

    /// Deactivated accounts and blocked sellers may not sign in.
    pub fn can_sign_in(&self) -> bool {
        self.is_active && !self.seller.as_ref().is_some_and(|s| s.is_blocked)
    }

    /// Only verified, unblocked sellers may list products.
    pub fn can_sell(&self) -> bool {
        self.is_active
            && self
                .seller
                .as_ref()
                .is_some_and(|s| s.is_verified && !s.is_blocked)
    }

    fn seller_mut(&mut self) -> Result<&mut SellerProfile, DomainError> {
        self.seller.as_mut().ok_or(DomainError::NotASeller)
    }

    pub fn verify_seller(&mut self) -> Result<(), DomainError> {
        let profile = self.seller_mut()?;
        if profile.is_blocked {
            return Err(DomainError::SellerBlocked);
        }
        profile.is_verified = true;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Blocking always revokes verification.
    pub fn block_seller(&mut self) -> Result<(), DomainError> {
        let profile = self.seller_mut()?;
        profile.is_blocked = true;
        profile.is_verified = false;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Unblocking leaves the seller unverified until an admin verifies again.
    pub fn unblock_seller(&mut self) -> Result<(), DomainError> {
        let profile = self.seller_mut()?;
        profile.is_blocked = false;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// The authenticated caller of an operation, as carried by the session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seller() -> Principal {
        Principal::new(
            Role::Seller,
            "Asha".into(),
            "asha@shop.test".into(),
            "hash".into(),
        )
    }

    #[test]
    fn blocking_a_verified_seller_revokes_verification() {
        let mut s = seller();
        s.verify_seller().unwrap();
        s.block_seller().unwrap();

        let profile = s.seller.clone().unwrap();
        assert!(profile.is_blocked);
        assert!(!profile.is_verified);

        s.unblock_seller().unwrap();
        let profile = s.seller.clone().unwrap();
        assert!(!profile.is_blocked);
        assert!(!profile.is_verified, "unblocking must not restore verification");
    }

    #[test]
    fn blocked_seller_cannot_be_verified() {
        let mut s = seller();
        s.block_seller().unwrap();
        assert_eq!(s.verify_seller(), Err(DomainError::SellerBlocked));
        assert!(!s.can_sign_in());
    }

    #[test]
    fn customers_have_no_seller_profile() {
        let mut u = Principal::new(Role::User, "Ravi".into(), "ravi@mail.test".into(), "h".into());
        assert!(u.seller.is_none());
        assert_eq!(u.verify_seller(), Err(DomainError::NotASeller));
        assert!(!u.can_sell());
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let json = serde_json::to_value(seller()).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert_eq!(json["role"], "seller");
        assert_eq!(json["isVerified"], false);
    }
}
