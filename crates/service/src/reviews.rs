use async_trait::async_trait;
use chrono::Utc;
use model::{Actor, RatingSummary, Review};
use repository::Repositories;
use serde::Deserialize;
use tracing::{debug, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{ServiceError, not_found};

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddReviewInput {
    pub product_id: Uuid,
    pub rating: i16,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub comment: String,
}

/// # ReviewService
#[async_trait]
pub trait ReviewService: Send + Sync {
    /// Creates or overwrites the caller's review of a product.
    async fn add(&self, actor: Actor, input: AddReviewInput) -> Result<Review, ServiceError>;
    /// Deletes a review; only its author or an admin may.
    async fn delete(&self, actor: Actor, review_id: Uuid) -> Result<(), ServiceError>;
    /// Newest first.
    async fn list_by_product(&self, product_id: Uuid) -> Result<Vec<Review>, ServiceError>;
    async fn summary(&self, product_id: Uuid) -> Result<RatingSummary, ServiceError>;
}

pub struct ReviewServiceImpl {
    repos: Repositories,
}

impl ReviewServiceImpl {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// Writes the cached rating aggregate back onto the product.
    async fn refresh_rating(&self, product_id: Uuid) -> Result<RatingSummary, ServiceError> {
        let summary = self.repos.reviews.summary(product_id).await?;
        self.repos.products.set_rating(product_id, summary).await?;
        debug!(product = %product_id, average = %summary.average_rating, "Product rating refreshed");
        Ok(summary)
    }
}

#[async_trait]
impl ReviewService for ReviewServiceImpl {
    #[instrument(skip(self, input), fields(user = %actor.id, product = %input.product_id))]
    async fn add(&self, actor: Actor, input: AddReviewInput) -> Result<Review, ServiceError> {
        input.validate()?;
        let rating = Review::check_rating(input.rating)?;
        self.repos
            .products
            .get_by_id(input.product_id)
            .await
            .map_err(not_found("Product"))?;
        let author = self
            .repos
            .principals
            .get_by_id(actor.id)
            .await
            .map_err(not_found("Account"))?;

        let now = Utc::now();
        let review = self
            .repos
            .reviews
            .upsert(&Review {
                id: Uuid::new_v4(),
                user_id: actor.id,
                user_name: author.name,
                product_id: input.product_id,
                rating,
                comment: input.comment.trim().to_string(),
                created_at: now,
                updated_at: now,
            })
            .await?;
        self.refresh_rating(review.product_id).await?;
        Ok(review)
    }

    #[instrument(skip(self), fields(user = %actor.id))]
    async fn delete(&self, actor: Actor, review_id: Uuid) -> Result<(), ServiceError> {
        let review = self
            .repos
            .reviews
            .get_by_id(review_id)
            .await
            .map_err(not_found("Review"))?;
        if review.user_id != actor.id && !actor.is_admin() {
            return Err(ServiceError::Forbidden(
                "Only the author may delete this review".into(),
            ));
        }
        self.repos.reviews.delete(review_id).await?;
        self.refresh_rating(review.product_id).await?;
        Ok(())
    }

    async fn list_by_product(&self, product_id: Uuid) -> Result<Vec<Review>, ServiceError> {
        Ok(self.repos.reviews.list_by_product(product_id).await?)
    }

    async fn summary(&self, product_id: Uuid) -> Result<RatingSummary, ServiceError> {
        Ok(self.repos.reviews.summary(product_id).await?)
    }
}
