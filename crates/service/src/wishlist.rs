use async_trait::async_trait;
use model::{Product, Wishlist};
use repository::Repositories;
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::{ServiceError, not_found};

/// The wishlist with its products resolved; deleted products are left out.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WishlistView {
    pub user_id: Uuid,
    pub products: Vec<Product>,
}

/// # WishlistService
#[async_trait]
pub trait WishlistService: Send + Sync {
    async fn get(&self, user_id: Uuid) -> Result<WishlistView, ServiceError>;
    async fn add(&self, user_id: Uuid, product_id: Uuid) -> Result<WishlistView, ServiceError>;
    async fn remove(&self, user_id: Uuid, product_id: Uuid)
    -> Result<WishlistView, ServiceError>;
    async fn clear(&self, user_id: Uuid) -> Result<WishlistView, ServiceError>;
    /// Returns whether the product is in the wishlist afterwards.
    async fn toggle(&self, user_id: Uuid, product_id: Uuid) -> Result<bool, ServiceError>;
}

pub struct WishlistServiceImpl {
    repos: Repositories,
}

impl WishlistServiceImpl {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    async fn load(&self, user_id: Uuid) -> Result<Wishlist, ServiceError> {
        Ok(self
            .repos
            .wishlists
            .get(user_id)
            .await?
            .unwrap_or_else(|| Wishlist::new(user_id)))
    }

    async fn ensure_product(&self, product_id: Uuid) -> Result<(), ServiceError> {
        self.repos
            .products
            .get_by_id(product_id)
            .await
            .map(|_| ())
            .map_err(not_found("Product"))
    }

    async fn view(&self, wishlist: &Wishlist) -> Result<WishlistView, ServiceError> {
        let mut products = self.repos.products.get_many(&wishlist.product_ids).await?;
        // Keep the order the products were added in.
        products.sort_by_key(|p| {
            wishlist
                .product_ids
                .iter()
                .position(|id| *id == p.id)
                .unwrap_or(usize::MAX)
        });
        Ok(WishlistView {
            user_id: wishlist.user_id,
            products,
        })
    }
}

#[async_trait]
impl WishlistService for WishlistServiceImpl {
    async fn get(&self, user_id: Uuid) -> Result<WishlistView, ServiceError> {
        let wishlist = self.load(user_id).await?;
        self.view(&wishlist).await
    }

    #[instrument(skip(self))]
    async fn add(&self, user_id: Uuid, product_id: Uuid) -> Result<WishlistView, ServiceError> {
        self.ensure_product(product_id).await?;
        let mut wishlist = self.load(user_id).await?;
        wishlist.add(product_id)?;
        self.repos.wishlists.save(&wishlist).await?;
        self.view(&wishlist).await
    }

    #[instrument(skip(self))]
    async fn remove(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<WishlistView, ServiceError> {
        let mut wishlist = self.load(user_id).await?;
        wishlist.remove(product_id)?;
        self.repos.wishlists.save(&wishlist).await?;
        self.view(&wishlist).await
    }

    #[instrument(skip(self))]
    async fn clear(&self, user_id: Uuid) -> Result<WishlistView, ServiceError> {
        let mut wishlist = self.load(user_id).await?;
        wishlist.clear();
        self.repos.wishlists.save(&wishlist).await?;
        self.view(&wishlist).await
    }

    #[instrument(skip(self))]
    async fn toggle(&self, user_id: Uuid, product_id: Uuid) -> Result<bool, ServiceError> {
        let mut wishlist = self.load(user_id).await?;
        if !wishlist.contains(product_id) {
            self.ensure_product(product_id).await?;
        }
        let present = wishlist.toggle(product_id);
        self.repos.wishlists.save(&wishlist).await?;
        Ok(present)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seed_product, seed_seller};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn add_remove_and_toggle() {
        let repos = Repositories::in_memory();
        let seller = seed_seller(&repos, true).await;
        let a = seed_product(&repos, seller.id, dec!(10), 1, 1).await;
        let b = seed_product(&repos, seller.id, dec!(20), 1, 1).await;
        let svc = WishlistServiceImpl::new(repos);
        let user = Uuid::new_v4();

        svc.add(user, a.id).await.unwrap();
        let view = svc.add(user, b.id).await.unwrap();
        assert_eq!(
            view.products.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![a.id, b.id]
        );
        assert!(matches!(
            svc.add(user, a.id).await,
            Err(ServiceError::Conflict(_))
        ));

        assert!(!svc.toggle(user, a.id).await.unwrap());
        assert!(svc.toggle(user, a.id).await.unwrap());

        let view = svc.remove(user, b.id).await.unwrap();
        assert_eq!(view.products.len(), 1);
        assert!(matches!(
            svc.remove(user, b.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(svc.clear(user).await.unwrap().products.is_empty());
    }

    #[tokio::test]
    async fn toggling_an_unknown_product_is_not_found() {
        let svc = WishlistServiceImpl::new(Repositories::in_memory());
        assert!(matches!(
            svc.toggle(Uuid::new_v4(), Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
