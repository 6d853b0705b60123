use axum::extract::{Extension, State};
use model::{Actor, RatingSummary, Review};
use service::AddReviewInput;
use uuid::Uuid;

use crate::AppState;
use crate::error::{ApiResult, AppJson, AppPath, ok};

pub async fn add(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    AppJson(input): AppJson<AddReviewInput>,
) -> ApiResult<Review> {
    let review = state.services.reviews.add(actor, input).await?;
    Ok(ok(review, "Review saved"))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    AppPath(id): AppPath<Uuid>,
) -> ApiResult<()> {
    state.services.reviews.delete(actor, id).await?;
    Ok(ok((), "Review deleted"))
}

pub async fn by_product(
    State(state): State<AppState>,
    AppPath(product_id): AppPath<Uuid>,
) -> ApiResult<Vec<Review>> {
    let reviews = state.services.reviews.list_by_product(product_id).await?;
    Ok(ok(reviews, "Reviews fetched"))
}

pub async fn average(
    State(state): State<AppState>,
    AppPath(product_id): AppPath<Uuid>,
) -> ApiResult<RatingSummary> {
    let summary = state.services.reviews.summary(product_id).await?;
    Ok(ok(summary, "Average rating fetched"))
}
