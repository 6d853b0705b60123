//! In-process repositories.
//!
//! All aggregates live behind one `RwLock`, so every multi-record operation
//! (materialize, cancel, fulfilment) runs under a single write guard and gets
//! the same all-or-nothing behaviour as the PostgreSQL transactions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use model::{
    Cart, LineStatus, Order, OrderStatus, Principal, Product, ProductPage, ProductQuery,
    RatingSummary, Review, Role, Wishlist,
};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::{
    CartsRepository, Materialized, OrdersRepository, PrincipalsRepository, ProductsRepository,
    Repositories, RepositoryError, ReviewsRepository, WishlistsRepository,
};

#[derive(Default)]
struct MemoryState {
    products: HashMap<Uuid, Product>,
    carts: HashMap<Uuid, Cart>,
    wishlists: HashMap<Uuid, Wishlist>,
    orders: HashMap<Uuid, Order>,
    sessions: HashMap<String, Uuid>,
    reviews: HashMap<Uuid, Review>,
    principals: HashMap<Uuid, Principal>,
}

/// Shared in-memory storage; cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repositories(&self) -> Repositories {
        Repositories {
            products: Arc::new(MemoryProductsRepository(self.clone())),
            carts: Arc::new(MemoryCartsRepository(self.clone())),
            wishlists: Arc::new(MemoryWishlistsRepository(self.clone())),
            orders: Arc::new(MemoryOrdersRepository(self.clone())),
            reviews: Arc::new(MemoryReviewsRepository(self.clone())),
            principals: Arc::new(MemoryPrincipalsRepository(self.clone())),
        }
    }
}

fn newest_first(orders: &mut [Order]) {
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

pub struct MemoryProductsRepository(MemoryStore);

#[async_trait]
impl ProductsRepository for MemoryProductsRepository {
    async fn insert(&self, product: &Product) -> Result<(), RepositoryError> {
        let mut state = self.0.state.write().await;
        if state.products.values().any(|p| p.name == product.name) {
            return Err(RepositoryError::Conflict(
                "a product with this name already exists".into(),
            ));
        }
        state.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Product, RepositoryError> {
        let state = self.0.state.read().await;
        state.products.get(&id).cloned().ok_or(RepositoryError::NotFound)
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Product>, RepositoryError> {
        let state = self.0.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.products.get(id).cloned())
            .collect())
    }

    async fn list(&self, query: &ProductQuery) -> Result<ProductPage, RepositoryError> {
        let state = self.0.state.read().await;
        let mut matching: Vec<Product> = state
            .products
            .values()
            .filter(|p| query.matches(p))
            .cloned()
            .collect();
        query.sort_products(&mut matching);
        let total = matching.len() as u64;
        let products = matching
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(query.limit as usize)
            .collect();
        Ok(ProductPage::new(products, total, query))
    }

    async fn list_by_seller(&self, seller_id: Uuid) -> Result<Vec<Product>, RepositoryError> {
        let state = self.0.state.read().await;
        let mut products: Vec<Product> = state
            .products
            .values()
            .filter(|p| p.seller_id == seller_id)
            .cloned()
            .collect();
        products.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(products)
    }

    async fn update(&self, product: &Product) -> Result<(), RepositoryError> {
        let mut state = self.0.state.write().await;
        if state
            .products
            .values()
            .any(|p| p.id != product.id && p.name == product.name)
        {
            return Err(RepositoryError::Conflict(
                "a product with this name already exists".into(),
            ));
        }
        let stored = state
            .products
            .get_mut(&product.id)
            .ok_or(RepositoryError::NotFound)?;
        // Stock and rating have their own writers.
        *stored = Product {
            stock: stored.stock,
            rating: stored.rating,
            num_reviews: stored.num_reviews,
            ..product.clone()
        };
        Ok(())
    }

    async fn set_stock(&self, id: Uuid, stock: i32) -> Result<Product, RepositoryError> {
        let mut state = self.0.state.write().await;
        let product = state.products.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        product.stock = stock;
        product.updated_at = Utc::now();
        Ok(product.clone())
    }

    async fn set_rating(&self, id: Uuid, summary: RatingSummary) -> Result<(), RepositoryError> {
        let mut state = self.0.state.write().await;
        if let Some(product) = state.products.get_mut(&id) {
            product.rating = summary.average_rating;
            product.num_reviews = i32::try_from(summary.total_reviews).unwrap_or(i32::MAX);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<Product, RepositoryError> {
        let mut state = self.0.state.write().await;
        state.products.remove(&id).ok_or(RepositoryError::NotFound)
    }
}

pub struct MemoryCartsRepository(MemoryStore);

#[async_trait]
impl CartsRepository for MemoryCartsRepository {
    async fn get(&self, user_id: Uuid) -> Result<Option<Cart>, RepositoryError> {
        Ok(self.0.state.read().await.carts.get(&user_id).cloned())
    }

    async fn save(&self, cart: &Cart) -> Result<(), RepositoryError> {
        let mut state = self.0.state.write().await;
        state.carts.insert(cart.user_id, cart.clone());
        Ok(())
    }

    async fn delete(&self, user_id: Uuid) -> Result<(), RepositoryError> {
        self.0.state.write().await.carts.remove(&user_id);
        Ok(())
    }
}

pub struct MemoryWishlistsRepository(MemoryStore);

#[async_trait]
impl WishlistsRepository for MemoryWishlistsRepository {
    async fn get(&self, user_id: Uuid) -> Result<Option<Wishlist>, RepositoryError> {
        Ok(self.0.state.read().await.wishlists.get(&user_id).cloned())
    }

    async fn save(&self, wishlist: &Wishlist) -> Result<(), RepositoryError> {
        let mut state = self.0.state.write().await;
        state.wishlists.insert(wishlist.user_id, wishlist.clone());
        Ok(())
    }

    async fn delete(&self, user_id: Uuid) -> Result<(), RepositoryError> {
        self.0.state.write().await.wishlists.remove(&user_id);
        Ok(())
    }
}

pub struct MemoryOrdersRepository(MemoryStore);

#[async_trait]
impl OrdersRepository for MemoryOrdersRepository {
    async fn materialize(&self, order: &Order) -> Result<Materialized, RepositoryError> {
        let mut state = self.0.state.write().await;

        if let Some(session) = &order.payment_session_id {
            if let Some(existing) = state.sessions.get(session).and_then(|id| state.orders.get(id)) {
                debug!(session, "Order for payment session already exists");
                return Ok(Materialized::Existing(existing.clone()));
            }
        }

        let mut wanted: HashMap<Uuid, i32> = HashMap::new();
        for line in &order.lines {
            *wanted.entry(line.product_id).or_default() += line.quantity;
        }
        for (product_id, quantity) in &wanted {
            let available = state.products.get(product_id).map_or(0, |p| p.stock);
            if available < *quantity {
                return Err(RepositoryError::InsufficientStock {
                    product_id: *product_id,
                });
            }
        }

        let now = Utc::now();
        for (product_id, quantity) in wanted {
            if let Some(product) = state.products.get_mut(&product_id) {
                product.stock -= quantity;
                product.updated_at = now;
            }
        }
        if let Some(session) = &order.payment_session_id {
            state.sessions.insert(session.clone(), order.id);
        }
        state.orders.insert(order.id, order.clone());
        Ok(Materialized::Created(order.clone()))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Order, RepositoryError> {
        let state = self.0.state.read().await;
        state.orders.get(&id).cloned().ok_or(RepositoryError::NotFound)
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Option<Order>, RepositoryError> {
        let state = self.0.state.read().await;
        Ok(state
            .sessions
            .get(session_id)
            .and_then(|id| state.orders.get(id))
            .cloned())
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, RepositoryError> {
        let state = self.0.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut orders);
        Ok(orders)
    }

    async fn list_by_seller(&self, seller_id: Uuid) -> Result<Vec<Order>, RepositoryError> {
        let state = self.0.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.has_seller(seller_id))
            .cloned()
            .collect();
        newest_first(&mut orders);
        Ok(orders)
    }

    async fn list_all(&self) -> Result<Vec<Order>, RepositoryError> {
        let state = self.0.state.read().await;
        let mut orders: Vec<Order> = state.orders.values().cloned().collect();
        newest_first(&mut orders);
        Ok(orders)
    }

    async fn save_fulfillment(&self, order: &Order) -> Result<Order, RepositoryError> {
        let mut state = self.0.state.write().await;
        let stored = state
            .orders
            .get_mut(&order.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.version != order.version {
            return Err(RepositoryError::Conflict(format!(
                "order {} was modified concurrently",
                order.id
            )));
        }
        stored.lines = order.lines.clone();
        stored.status = order.status;
        stored.updated_at = order.updated_at;
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn cancel(&self, order_id: Uuid) -> Result<Order, RepositoryError> {
        let mut state = self.0.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(RepositoryError::NotFound)?;
        if order.status != OrderStatus::Pending
            || order.lines.iter().any(|l| l.status != LineStatus::Pending)
        {
            return Err(RepositoryError::Conflict(format!(
                "order {order_id} is no longer pending"
            )));
        }
        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        order.version += 1;
        let cancelled = order.clone();

        for line in &cancelled.lines {
            if let Some(product) = state.products.get_mut(&line.product_id) {
                product.stock += line.quantity;
            }
        }
        Ok(cancelled)
    }

    async fn mark_reviewed(&self, order_id: Uuid) -> Result<Order, RepositoryError> {
        let mut state = self.0.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(RepositoryError::NotFound)?;
        if order.reviewed_by_admin {
            return Err(RepositoryError::Conflict(format!(
                "order {order_id} has already been reviewed"
            )));
        }
        order.reviewed_by_admin = true;
        order.updated_at = Utc::now();
        order.version += 1;
        Ok(order.clone())
    }
}

pub struct MemoryReviewsRepository(MemoryStore);

#[async_trait]
impl ReviewsRepository for MemoryReviewsRepository {
    async fn upsert(&self, review: &Review) -> Result<Review, RepositoryError> {
        let mut state = self.0.state.write().await;
        let existing = state
            .reviews
            .values()
            .find(|r| r.user_id == review.user_id && r.product_id == review.product_id)
            .map(|r| r.id);
        let stored = match existing.and_then(|id| state.reviews.get_mut(&id)) {
            Some(r) => {
                r.rating = review.rating;
                r.comment = review.comment.clone();
                r.user_name = review.user_name.clone();
                r.updated_at = review.updated_at;
                r.clone()
            }
            None => {
                state.reviews.insert(review.id, review.clone());
                review.clone()
            }
        };
        Ok(stored)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Review, RepositoryError> {
        let state = self.0.state.read().await;
        state.reviews.get(&id).cloned().ok_or(RepositoryError::NotFound)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        let mut state = self.0.state.write().await;
        state
            .reviews
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    async fn list_by_product(&self, product_id: Uuid) -> Result<Vec<Review>, RepositoryError> {
        let state = self.0.state.read().await;
        let mut reviews: Vec<Review> = state
            .reviews
            .values()
            .filter(|r| r.product_id == product_id)
            .cloned()
            .collect();
        reviews.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(reviews)
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Review>, RepositoryError> {
        let state = self.0.state.read().await;
        let mut reviews: Vec<Review> = state
            .reviews
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        reviews.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(reviews)
    }

    async fn summary(&self, product_id: Uuid) -> Result<RatingSummary, RepositoryError> {
        let state = self.0.state.read().await;
        Ok(RatingSummary::from_ratings(
            state
                .reviews
                .values()
                .filter(|r| r.product_id == product_id)
                .map(|r| r.rating),
        ))
    }
}

pub struct MemoryPrincipalsRepository(MemoryStore);

#[async_trait]
impl PrincipalsRepository for MemoryPrincipalsRepository {
    async fn insert(&self, principal: &Principal) -> Result<(), RepositoryError> {
        let mut state = self.0.state.write().await;
        if state
            .principals
            .values()
            .any(|p| p.role == principal.role && p.email == principal.email)
        {
            return Err(RepositoryError::Conflict(
                "an account with this email already exists".into(),
            ));
        }
        state.principals.insert(principal.id, principal.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Principal, RepositoryError> {
        let state = self.0.state.read().await;
        state.principals.get(&id).cloned().ok_or(RepositoryError::NotFound)
    }

    async fn find_by_email(
        &self,
        role: Role,
        email: &str,
    ) -> Result<Option<Principal>, RepositoryError> {
        let state = self.0.state.read().await;
        Ok(state
            .principals
            .values()
            .find(|p| p.role == role && p.email == email)
            .cloned())
    }

    async fn update(&self, principal: &Principal) -> Result<(), RepositoryError> {
        let mut state = self.0.state.write().await;
        if state.principals.values().any(|p| {
            p.id != principal.id && p.role == principal.role && p.email == principal.email
        }) {
            return Err(RepositoryError::Conflict(
                "an account with this email already exists".into(),
            ));
        }
        let stored = state
            .principals
            .get_mut(&principal.id)
            .ok_or(RepositoryError::NotFound)?;
        *stored = principal.clone();
        Ok(())
    }

    async fn list_by_role(&self, role: Role) -> Result<Vec<Principal>, RepositoryError> {
        let state = self.0.state.read().await;
        let mut principals: Vec<Principal> = state
            .principals
            .values()
            .filter(|p| p.role == role)
            .cloned()
            .collect();
        principals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(principals)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        let mut state = self.0.state.write().await;
        state
            .principals
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{Address, Category, OrderDraft, OrderLine, PaymentMethod};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn product(stock: i32) -> Product {
        let now = Utc::now();
        Product {
            id: Uuid::new_v4(),
            name: format!("Linen Shirt {}", Uuid::new_v4()),
            description: "breathable".into(),
            price: dec!(450),
            category: Category::Men,
            stock,
            images: Vec::new(),
            seller_id: Uuid::new_v4(),
            rating: Decimal::ZERO,
            num_reviews: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn order_for(product: &Product, quantity: i32, session: Option<&str>) -> Order {
        Order::new(OrderDraft {
            user_id: Uuid::new_v4(),
            lines: vec![OrderLine {
                product_id: product.id,
                seller_id: product.seller_id,
                name: product.name.clone(),
                price: product.price,
                image: None,
                quantity,
                status: LineStatus::Pending,
            }],
            address: Address::default(),
            amount_total: product.price * Decimal::from(quantity),
            payment_method: PaymentMethod::Card,
            payment_session_id: session.map(str::to_string),
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_materializations_of_one_session_create_one_order() {
        let repos = MemoryStore::new().repositories();
        let p = product(20);
        repos.products.insert(&p).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let orders = repos.orders.clone();
            let order = order_for(&p, 2, Some("cs_test_race"));
            handles.push(tokio::spawn(async move { orders.materialize(&order).await }));
        }

        let mut created = 0;
        let mut ids = Vec::new();
        for h in handles {
            let outcome = h.await.unwrap().unwrap();
            if outcome.was_created() {
                created += 1;
            }
            ids.push(outcome.into_order().id);
        }

        assert_eq!(created, 1);
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(repos.products.get_by_id(p.id).await.unwrap().stock, 18);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_buyers_never_oversell() {
        let repos = MemoryStore::new().repositories();
        let p = product(5);
        repos.products.insert(&p).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let orders = repos.orders.clone();
            let order = order_for(&p, 1, Some(&format!("cs_buyer_{i}")));
            handles.push(tokio::spawn(async move { orders.materialize(&order).await }));
        }

        let (mut ok, mut short) = (0, 0);
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(RepositoryError::InsufficientStock { product_id }) => {
                    assert_eq!(product_id, p.id);
                    short += 1;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!((ok, short), (5, 3));
        assert_eq!(repos.products.get_by_id(p.id).await.unwrap().stock, 0);
    }

    #[tokio::test]
    async fn failed_materialization_leaves_no_trace() {
        let repos = MemoryStore::new().repositories();
        let p = product(1);
        repos.products.insert(&p).await.unwrap();

        let err = repos
            .orders
            .materialize(&order_for(&p, 2, Some("cs_short")))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InsufficientStock { .. }));
        assert!(repos.orders.find_by_session("cs_short").await.unwrap().is_none());
        assert_eq!(repos.products.get_by_id(p.id).await.unwrap().stock, 1);
    }

    #[tokio::test]
    async fn cancel_restocks_and_only_once() {
        let repos = MemoryStore::new().repositories();
        let p = product(4);
        repos.products.insert(&p).await.unwrap();
        let order = repos
            .orders
            .materialize(&order_for(&p, 3, None))
            .await
            .unwrap()
            .into_order();
        assert_eq!(repos.products.get_by_id(p.id).await.unwrap().stock, 1);

        let cancelled = repos.orders.cancel(order.id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(repos.products.get_by_id(p.id).await.unwrap().stock, 4);

        assert!(matches!(
            repos.orders.cancel(order.id).await,
            Err(RepositoryError::Conflict(_))
        ));
        assert_eq!(repos.products.get_by_id(p.id).await.unwrap().stock, 4);
    }

    #[tokio::test]
    async fn cancel_refuses_orders_with_a_shipped_line() {
        let repos = MemoryStore::new().repositories();
        let p = product(4);
        repos.products.insert(&p).await.unwrap();
        let mut order = repos
            .orders
            .materialize(&order_for(&p, 3, None))
            .await
            .unwrap()
            .into_order();
        order.lines[0].status = LineStatus::Shipped;
        repos.orders.save_fulfillment(&order).await.unwrap();

        assert!(matches!(
            repos.orders.cancel(order.id).await,
            Err(RepositoryError::Conflict(_))
        ));
        assert_eq!(repos.products.get_by_id(p.id).await.unwrap().stock, 1);
        let stored = repos.orders.get_by_id(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn stale_fulfilment_write_is_rejected() {
        let repos = MemoryStore::new().repositories();
        let p = product(4);
        repos.products.insert(&p).await.unwrap();
        let order = repos
            .orders
            .materialize(&order_for(&p, 1, None))
            .await
            .unwrap()
            .into_order();

        let mut first = order.clone();
        first
            .set_line_status(p.seller_id, p.id, LineStatus::Shipped)
            .unwrap();
        let saved = repos.orders.save_fulfillment(&first).await.unwrap();
        assert_eq!(saved.version, order.version + 1);

        let mut stale = order.clone();
        stale
            .set_line_status(p.seller_id, p.id, LineStatus::Shipped)
            .unwrap();
        assert!(matches!(
            repos.orders.save_fulfillment(&stale).await,
            Err(RepositoryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn listing_pages_and_filters() {
        let repos = MemoryStore::new().repositories();
        for stock in [0, 3, 7] {
            repos.products.insert(&product(stock)).await.unwrap();
        }
        let query = ProductQuery {
            in_stock: true,
            limit: 1,
            ..Default::default()
        }
        .normalized();

        let page = repos.products.list(&query).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.pages, 2);
        assert_eq!(page.products.len(), 1);
    }

    #[tokio::test]
    async fn paging_past_the_end_is_empty() {
        let repos = MemoryStore::new().repositories();
        for stock in [1, 2, 3] {
            repos.products.insert(&product(stock)).await.unwrap();
        }
        for page in [2, u32::MAX] {
            let query = ProductQuery {
                page,
                limit: 3,
                ..Default::default()
            }
            .normalized();
            let listed = repos.products.list(&query).await.unwrap();
            assert_eq!(listed.total, 3);
            assert!(listed.products.is_empty());
        }
    }
}
