//! PostgreSQL implementations of the repository traits.
//!
//! Each repository holds the shared `deadpool` pool. Line lists, addresses and
//! image sets are stored as JSONB documents; everything that needs atomicity
//! (stock, payment-session uniqueness, fulfilment versions) is a plain column.

use std::str::FromStr;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::{
    Address, Cart, CartLine, Category, Order, OrderLine, OrderStatus, PaymentMethod, Principal,
    Product, ProductImage, ProductPage, ProductQuery, ProductSort, RatingSummary, Review, Role,
    SellerProfile, Wishlist,
};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    CartsRepository, Materialized, OrdersRepository, PrincipalsRepository, ProductsRepository,
    RepositoryError, ReviewsRepository, WishlistsRepository,
};

fn conflict_on_unique(err: tokio_postgres::Error, what: &str) -> RepositoryError {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        RepositoryError::Conflict(format!("{what} already exists"))
    } else {
        RepositoryError::Db(err)
    }
}

fn parse_column<T>(row: &Row, column: &str) -> Result<T, RepositoryError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.get(column);
    raw.parse()
        .map_err(|e: T::Err| RepositoryError::Corrupt(format!("{column}: {e}")))
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

const PRODUCT_COLUMNS: &str = "id, name, description, price, category, stock, images, \
     seller_id, rating, num_reviews, created_at, updated_at";

fn product_from_row(row: &Row) -> Result<Product, RepositoryError> {
    let images: serde_json::Value = row.get("images");
    Ok(Product {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        price: row.get("price"),
        category: parse_column::<Category>(row, "category")?,
        stock: row.get("stock"),
        images: serde_json::from_value::<Vec<ProductImage>>(images)?,
        seller_id: row.get("seller_id"),
        rating: row.get("rating"),
        num_reviews: row.get("num_reviews"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// PostgreSQL implementation of the ProductsRepository trait.
pub struct PgProductsRepository {
    pool: Pool,
}

impl PgProductsRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductsRepository for PgProductsRepository {
    async fn insert(&self, product: &Product) -> Result<(), RepositoryError> {
        let query = r#"
            INSERT INTO products (
                id, name, description, price, category, stock, images,
                seller_id, rating, num_reviews, created_at, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
        "#;
        let client = self.pool.get().await?;
        let images = serde_json::to_value(&product.images)?;
        client
            .execute(
                query,
                &[
                    &product.id,
                    &product.name,
                    &product.description,
                    &product.price,
                    &product.category.as_str(),
                    &product.stock,
                    &images,
                    &product.seller_id,
                    &product.rating,
                    &product.num_reviews,
                    &product.created_at,
                    &product.updated_at,
                ],
            )
            .await
            .map_err(|e| conflict_on_unique(e, "a product with this name"))?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Product, RepositoryError> {
        let query = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        let client = self.pool.get().await?;
        match client.query_opt(&query, &[&id]).await? {
            Some(row) => product_from_row(&row),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Product>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1)");
        let client = self.pool.get().await?;
        let ids = ids.to_vec();
        let rows = client.query(&query, &[&ids]).await?;
        rows.iter().map(product_from_row).collect()
    }

    async fn list(&self, query: &ProductQuery) -> Result<ProductPage, RepositoryError> {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();

        if let Some(category) = query.category {
            params.push(Box::new(category.as_str().to_string()));
            clauses.push(format!("category = ${}", params.len()));
        }
        if let Some(term) = &query.search {
            let escaped = term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
            params.push(Box::new(format!("%{escaped}%")));
            let n = params.len();
            clauses.push(format!("(name ILIKE ${n} OR description ILIKE ${n})"));
        }
        if let Some(min) = query.min_price {
            params.push(Box::new(min));
            clauses.push(format!("price >= ${}", params.len()));
        }
        if let Some(max) = query.max_price {
            params.push(Box::new(max));
            clauses.push(format!("price <= ${}", params.len()));
        }
        if let Some(min) = query.min_rating {
            params.push(Box::new(min));
            clauses.push(format!("rating >= ${}", params.len()));
        }
        if query.in_stock {
            clauses.push("stock > 0".to_string());
        }
        if let Some(seller_id) = query.seller_id {
            params.push(Box::new(seller_id));
            clauses.push(format!("seller_id = ${}", params.len()));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let order_sql = match query.sort {
            ProductSort::Newest => "created_at DESC",
            ProductSort::PriceAsc => "price ASC",
            ProductSort::PriceDesc => "price DESC",
            ProductSort::Rating => "rating DESC, num_reviews DESC",
        };
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let client = self.pool.get().await?;
        let count_sql = format!("SELECT COUNT(*) AS total FROM products {where_sql}");
        let total: i64 = client.query_one(&count_sql, &refs).await?.get("total");

        let list_sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products {where_sql} ORDER BY {order_sql} LIMIT {} OFFSET {}",
            query.limit,
            query.offset()
        );
        debug!(sql = %list_sql, "Listing products");
        let rows = client.query(&list_sql, &refs).await?;
        let products = rows
            .iter()
            .map(product_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ProductPage::new(
            products,
            u64::try_from(total).unwrap_or_default(),
            query,
        ))
    }

    async fn list_by_seller(&self, seller_id: Uuid) -> Result<Vec<Product>, RepositoryError> {
        let query = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE seller_id = $1 ORDER BY created_at DESC"
        );
        let client = self.pool.get().await?;
        let rows = client.query(&query, &[&seller_id]).await?;
        rows.iter().map(product_from_row).collect()
    }

    async fn update(&self, product: &Product) -> Result<(), RepositoryError> {
        let query = r#"
            UPDATE products
            SET name = $2, description = $3, price = $4, category = $5, images = $6, updated_at = $7
            WHERE id = $1
        "#;
        let client = self.pool.get().await?;
        let images = serde_json::to_value(&product.images)?;
        let updated = client
            .execute(
                query,
                &[
                    &product.id,
                    &product.name,
                    &product.description,
                    &product.price,
                    &product.category.as_str(),
                    &images,
                    &product.updated_at,
                ],
            )
            .await
            .map_err(|e| conflict_on_unique(e, "a product with this name"))?;
        if updated == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn set_stock(&self, id: Uuid, stock: i32) -> Result<Product, RepositoryError> {
        let query = format!(
            "UPDATE products SET stock = $2, updated_at = now() WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
        );
        let client = self.pool.get().await?;
        match client.query_opt(&query, &[&id, &stock]).await? {
            Some(row) => product_from_row(&row),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn set_rating(&self, id: Uuid, summary: RatingSummary) -> Result<(), RepositoryError> {
        let query = "UPDATE products SET rating = $2, num_reviews = $3 WHERE id = $1";
        let client = self.pool.get().await?;
        let count = i32::try_from(summary.total_reviews).unwrap_or(i32::MAX);
        client
            .execute(query, &[&id, &summary.average_rating, &count])
            .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<Product, RepositoryError> {
        let query = format!("DELETE FROM products WHERE id = $1 RETURNING {PRODUCT_COLUMNS}");
        let client = self.pool.get().await?;
        match client.query_opt(&query, &[&id]).await? {
            Some(row) => product_from_row(&row),
            None => Err(RepositoryError::NotFound),
        }
    }
}

// ---------------------------------------------------------------------------
// Carts & wishlists
// ---------------------------------------------------------------------------

/// PostgreSQL implementation of the CartsRepository trait.
pub struct PgCartsRepository {
    pool: Pool,
}

impl PgCartsRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CartsRepository for PgCartsRepository {
    async fn get(&self, user_id: Uuid) -> Result<Option<Cart>, RepositoryError> {
        let query = "SELECT user_id, lines, total_price, updated_at FROM carts WHERE user_id = $1";
        let client = self.pool.get().await?;
        let Some(row) = client.query_opt(query, &[&user_id]).await? else {
            return Ok(None);
        };
        let lines: serde_json::Value = row.get("lines");
        Ok(Some(Cart {
            user_id: row.get("user_id"),
            lines: serde_json::from_value::<Vec<CartLine>>(lines)?,
            total_price: row.get("total_price"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn save(&self, cart: &Cart) -> Result<(), RepositoryError> {
        let query = r#"
            INSERT INTO carts (user_id, lines, total_price, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET lines = EXCLUDED.lines, total_price = EXCLUDED.total_price, updated_at = EXCLUDED.updated_at
        "#;
        let client = self.pool.get().await?;
        let lines = serde_json::to_value(&cart.lines)?;
        client
            .execute(
                query,
                &[&cart.user_id, &lines, &cart.total_price, &cart.updated_at],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, user_id: Uuid) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        client
            .execute("DELETE FROM carts WHERE user_id = $1", &[&user_id])
            .await?;
        Ok(())
    }
}

/// PostgreSQL implementation of the WishlistsRepository trait.
pub struct PgWishlistsRepository {
    pool: Pool,
}

impl PgWishlistsRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WishlistsRepository for PgWishlistsRepository {
    async fn get(&self, user_id: Uuid) -> Result<Option<Wishlist>, RepositoryError> {
        let query = "SELECT user_id, product_ids, updated_at FROM wishlists WHERE user_id = $1";
        let client = self.pool.get().await?;
        Ok(client
            .query_opt(query, &[&user_id])
            .await?
            .map(|row| Wishlist {
                user_id: row.get("user_id"),
                product_ids: row.get("product_ids"),
                updated_at: row.get("updated_at"),
            }))
    }

    async fn save(&self, wishlist: &Wishlist) -> Result<(), RepositoryError> {
        let query = r#"
            INSERT INTO wishlists (user_id, product_ids, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE
            SET product_ids = EXCLUDED.product_ids, updated_at = EXCLUDED.updated_at
        "#;
        let client = self.pool.get().await?;
        client
            .execute(
                query,
                &[&wishlist.user_id, &wishlist.product_ids, &wishlist.updated_at],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, user_id: Uuid) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        client
            .execute("DELETE FROM wishlists WHERE user_id = $1", &[&user_id])
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

const ORDER_COLUMNS: &str = "id, user_id, lines, address, amount_total, status, \
     reviewed_by_admin, payment_method, payment_session_id, version, created_at, updated_at";

fn order_from_row(row: &Row) -> Result<Order, RepositoryError> {
    let lines: serde_json::Value = row.get("lines");
    let address: serde_json::Value = row.get("address");
    Ok(Order {
        id: row.get("id"),
        user_id: row.get("user_id"),
        lines: serde_json::from_value::<Vec<OrderLine>>(lines)?,
        address: serde_json::from_value::<Address>(address)?,
        amount_total: row.get("amount_total"),
        status: parse_column::<OrderStatus>(row, "status")?,
        reviewed_by_admin: row.get("reviewed_by_admin"),
        payment_method: parse_column::<PaymentMethod>(row, "payment_method")?,
        payment_session_id: row.get("payment_session_id"),
        version: row.get("version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Per-product quantities of an order, sorted by product id so concurrent
/// transactions always lock product rows in the same order.
fn stock_moves(order: &Order) -> Vec<(Uuid, i32)> {
    let mut moves: Vec<(Uuid, i32)> = Vec::new();
    for line in &order.lines {
        match moves.iter_mut().find(|(id, _)| *id == line.product_id) {
            Some((_, qty)) => *qty += line.quantity,
            None => moves.push((line.product_id, line.quantity)),
        }
    }
    moves.sort_by_key(|(id, _)| *id);
    moves
}

/// PostgreSQL implementation of the OrdersRepository trait.
pub struct PgOrdersRepository {
    pool: Pool,
}

impl PgOrdersRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn list_where(
        &self,
        clause: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Order>, RepositoryError> {
        let query =
            format!("SELECT {ORDER_COLUMNS} FROM orders {clause} ORDER BY created_at DESC");
        let client = self.pool.get().await?;
        let rows = client.query(&query, params).await?;
        rows.iter().map(order_from_row).collect()
    }
}

#[async_trait]
impl OrdersRepository for PgOrdersRepository {
    async fn materialize(&self, order: &Order) -> Result<Materialized, RepositoryError> {
        let insert = r#"
            INSERT INTO orders (
                id, user_id, lines, address, amount_total, status, reviewed_by_admin,
                payment_method, payment_session_id, version, created_at, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            ON CONFLICT (payment_session_id) DO NOTHING
            RETURNING id
        "#;
        let decrement = r#"
            UPDATE products SET stock = stock - $2, updated_at = now()
            WHERE id = $1 AND stock >= $2
        "#;

        let lines = serde_json::to_value(&order.lines)?;
        let address = serde_json::to_value(&order.address)?;

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let inserted = tx
            .query_opt(
                insert,
                &[
                    &order.id,
                    &order.user_id,
                    &lines,
                    &address,
                    &order.amount_total,
                    &order.status.as_str(),
                    &order.reviewed_by_admin,
                    &order.payment_method.as_str(),
                    &order.payment_session_id,
                    &order.version,
                    &order.created_at,
                    &order.updated_at,
                ],
            )
            .await?;

        if inserted.is_none() {
            tx.rollback().await?;
            let session = order.payment_session_id.as_deref().ok_or_else(|| {
                RepositoryError::Conflict("order insert skipped without a session id".into())
            })?;
            debug!(session, "Order for payment session already exists");
            return match self.find_by_session(session).await? {
                Some(existing) => Ok(Materialized::Existing(existing)),
                None => Err(RepositoryError::Conflict(format!(
                    "order for session {session} vanished"
                ))),
            };
        }

        for (product_id, quantity) in stock_moves(order) {
            let updated = tx.execute(decrement, &[&product_id, &quantity]).await?;
            if updated == 0 {
                tx.rollback().await?;
                warn!(%product_id, quantity, "Stock decrement refused");
                return Err(RepositoryError::InsufficientStock { product_id });
            }
        }

        tx.commit().await?;
        Ok(Materialized::Created(order.clone()))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Order, RepositoryError> {
        let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let client = self.pool.get().await?;
        match client.query_opt(&query, &[&id]).await? {
            Some(row) => order_from_row(&row),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Option<Order>, RepositoryError> {
        let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE payment_session_id = $1");
        let client = self.pool.get().await?;
        client
            .query_opt(&query, &[&session_id])
            .await?
            .map(|row| order_from_row(&row))
            .transpose()
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, RepositoryError> {
        self.list_where("WHERE user_id = $1", &[&user_id]).await
    }

    async fn list_by_seller(&self, seller_id: Uuid) -> Result<Vec<Order>, RepositoryError> {
        let probe = serde_json::json!([{ "sellerId": seller_id }]);
        self.list_where("WHERE lines @> $1", &[&probe]).await
    }

    async fn list_all(&self) -> Result<Vec<Order>, RepositoryError> {
        self.list_where("", &[]).await
    }

    async fn save_fulfillment(&self, order: &Order) -> Result<Order, RepositoryError> {
        let query = format!(
            "UPDATE orders SET lines = $2, status = $3, version = version + 1, updated_at = $4 \
             WHERE id = $1 AND version = $5 RETURNING {ORDER_COLUMNS}"
        );
        let lines = serde_json::to_value(&order.lines)?;
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &query,
                &[
                    &order.id,
                    &lines,
                    &order.status.as_str(),
                    &order.updated_at,
                    &order.version,
                ],
            )
            .await?;
        match row {
            Some(row) => order_from_row(&row),
            None => Err(RepositoryError::Conflict(format!(
                "order {} was modified concurrently",
                order.id
            ))),
        }
    }

    async fn cancel(&self, order_id: Uuid) -> Result<Order, RepositoryError> {
        let cancel = format!(
            "UPDATE orders SET status = 'cancelled', version = version + 1, updated_at = now() \
             WHERE id = $1 AND status = 'pending' \
             AND NOT EXISTS (SELECT 1 FROM jsonb_array_elements(lines) l \
                             WHERE l->>'status' <> 'pending') \
             RETURNING {ORDER_COLUMNS}"
        );
        let restock = "UPDATE products SET stock = stock + $2, updated_at = now() WHERE id = $1";

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let Some(row) = tx.query_opt(&cancel, &[&order_id]).await? else {
            tx.rollback().await?;
            return Err(RepositoryError::Conflict(format!(
                "order {order_id} is no longer pending"
            )));
        };
        let order = order_from_row(&row)?;
        for (product_id, quantity) in stock_moves(&order) {
            tx.execute(restock, &[&product_id, &quantity]).await?;
        }
        tx.commit().await?;
        Ok(order)
    }

    async fn mark_reviewed(&self, order_id: Uuid) -> Result<Order, RepositoryError> {
        let query = format!(
            "UPDATE orders SET reviewed_by_admin = TRUE, version = version + 1, updated_at = now() \
             WHERE id = $1 AND NOT reviewed_by_admin RETURNING {ORDER_COLUMNS}"
        );
        let client = self.pool.get().await?;
        if let Some(row) = client.query_opt(&query, &[&order_id]).await? {
            return order_from_row(&row);
        }
        let exists = client
            .query_opt("SELECT 1 FROM orders WHERE id = $1", &[&order_id])
            .await?
            .is_some();
        if exists {
            Err(RepositoryError::Conflict(format!(
                "order {order_id} has already been reviewed"
            )))
        } else {
            Err(RepositoryError::NotFound)
        }
    }
}

// ---------------------------------------------------------------------------
// Reviews
// ---------------------------------------------------------------------------

const REVIEW_COLUMNS: &str =
    "id, user_id, user_name, product_id, rating, comment, created_at, updated_at";

fn review_from_row(row: &Row) -> Review {
    Review {
        id: row.get("id"),
        user_id: row.get("user_id"),
        user_name: row.get("user_name"),
        product_id: row.get("product_id"),
        rating: row.get("rating"),
        comment: row.get("comment"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// PostgreSQL implementation of the ReviewsRepository trait.
pub struct PgReviewsRepository {
    pool: Pool,
}

impl PgReviewsRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReviewsRepository for PgReviewsRepository {
    async fn upsert(&self, review: &Review) -> Result<Review, RepositoryError> {
        let query = format!(
            r#"
            INSERT INTO reviews (id, user_id, user_name, product_id, rating, comment, created_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            ON CONFLICT (user_id, product_id) DO UPDATE
            SET rating = EXCLUDED.rating, comment = EXCLUDED.comment,
                user_name = EXCLUDED.user_name, updated_at = EXCLUDED.updated_at
            RETURNING {REVIEW_COLUMNS}
        "#
        );
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &query,
                &[
                    &review.id,
                    &review.user_id,
                    &review.user_name,
                    &review.product_id,
                    &review.rating,
                    &review.comment,
                    &review.created_at,
                    &review.updated_at,
                ],
            )
            .await?;
        Ok(review_from_row(&row))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Review, RepositoryError> {
        let query = format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = $1");
        let client = self.pool.get().await?;
        client
            .query_opt(&query, &[&id])
            .await?
            .map(|row| review_from_row(&row))
            .ok_or(RepositoryError::NotFound)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM reviews WHERE id = $1", &[&id])
            .await?;
        if deleted == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_by_product(&self, product_id: Uuid) -> Result<Vec<Review>, RepositoryError> {
        let query = format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE product_id = $1 ORDER BY updated_at DESC"
        );
        let client = self.pool.get().await?;
        let rows = client.query(&query, &[&product_id]).await?;
        Ok(rows.iter().map(review_from_row).collect())
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Review>, RepositoryError> {
        let query = format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE user_id = $1 ORDER BY updated_at DESC"
        );
        let client = self.pool.get().await?;
        let rows = client.query(&query, &[&user_id]).await?;
        Ok(rows.iter().map(review_from_row).collect())
    }

    async fn summary(&self, product_id: Uuid) -> Result<RatingSummary, RepositoryError> {
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT rating FROM reviews WHERE product_id = $1", &[&product_id])
            .await?;
        Ok(RatingSummary::from_ratings(
            rows.iter().map(|r| r.get::<_, i16>("rating")),
        ))
    }
}

// ---------------------------------------------------------------------------
// Principals
// ---------------------------------------------------------------------------

const PRINCIPAL_COLUMNS: &str = "id, role, name, email, password_hash, phone, address, \
     is_active, shop_name, is_verified, is_blocked, created_at, updated_at";

fn principal_from_row(row: &Row) -> Result<Principal, RepositoryError> {
    let role = parse_column::<Role>(row, "role")?;
    let address: Option<serde_json::Value> = row.get("address");
    let seller = (role == Role::Seller).then(|| SellerProfile {
        shop_name: row
            .get::<_, Option<String>>("shop_name")
            .unwrap_or_default(),
        is_verified: row.get("is_verified"),
        is_blocked: row.get("is_blocked"),
    });
    Ok(Principal {
        id: row.get("id"),
        role,
        name: row.get("name"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        phone: row.get("phone"),
        address: address.map(serde_json::from_value::<Address>).transpose()?,
        is_active: row.get("is_active"),
        seller,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// PostgreSQL implementation of the PrincipalsRepository trait.
pub struct PgPrincipalsRepository {
    pool: Pool,
}

impl PgPrincipalsRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PrincipalsRepository for PgPrincipalsRepository {
    async fn insert(&self, principal: &Principal) -> Result<(), RepositoryError> {
        let query = r#"
            INSERT INTO principals (
                id, role, name, email, password_hash, phone, address, is_active,
                shop_name, is_verified, is_blocked, created_at, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
        "#;
        let address = principal
            .address
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let seller = principal.seller.clone().unwrap_or_default();
        let shop_name = principal.seller.as_ref().map(|s| s.shop_name.clone());
        let client = self.pool.get().await?;
        client
            .execute(
                query,
                &[
                    &principal.id,
                    &principal.role.as_str(),
                    &principal.name,
                    &principal.email,
                    &principal.password_hash,
                    &principal.phone,
                    &address,
                    &principal.is_active,
                    &shop_name,
                    &seller.is_verified,
                    &seller.is_blocked,
                    &principal.created_at,
                    &principal.updated_at,
                ],
            )
            .await
            .map_err(|e| conflict_on_unique(e, "an account with this email"))?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Principal, RepositoryError> {
        let query = format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE id = $1");
        let client = self.pool.get().await?;
        match client.query_opt(&query, &[&id]).await? {
            Some(row) => principal_from_row(&row),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn find_by_email(
        &self,
        role: Role,
        email: &str,
    ) -> Result<Option<Principal>, RepositoryError> {
        let query =
            format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE role = $1 AND email = $2");
        let client = self.pool.get().await?;
        client
            .query_opt(&query, &[&role.as_str(), &email])
            .await?
            .map(|row| principal_from_row(&row))
            .transpose()
    }

    async fn update(&self, principal: &Principal) -> Result<(), RepositoryError> {
        let query = r#"
            UPDATE principals
            SET name = $2, email = $3, password_hash = $4, phone = $5, address = $6,
                is_active = $7, shop_name = $8, is_verified = $9, is_blocked = $10, updated_at = $11
            WHERE id = $1
        "#;
        let address = principal
            .address
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let seller = principal.seller.clone().unwrap_or_default();
        let shop_name = principal.seller.as_ref().map(|s| s.shop_name.clone());
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                query,
                &[
                    &principal.id,
                    &principal.name,
                    &principal.email,
                    &principal.password_hash,
                    &principal.phone,
                    &address,
                    &principal.is_active,
                    &shop_name,
                    &seller.is_verified,
                    &seller.is_blocked,
                    &principal.updated_at,
                ],
            )
            .await
            .map_err(|e| conflict_on_unique(e, "an account with this email"))?;
        if updated == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_by_role(&self, role: Role) -> Result<Vec<Principal>, RepositoryError> {
        let query = format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE role = $1 ORDER BY created_at DESC"
        );
        let client = self.pool.get().await?;
        let rows = client.query(&query, &[&role.as_str()]).await?;
        rows.iter().map(principal_from_row).collect()
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM principals WHERE id = $1", &[&id])
            .await?;
        if deleted == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
