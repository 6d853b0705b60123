use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use model::{Actor, Order};
use serde::Deserialize;
use service::{
    CheckoutInput, CheckoutStarted, CreateOrderInput, LineStatusInput, OrderDetail, SellerStats,
    SessionStatus, WebhookOutcome,
};
use tracing::info;
use uuid::Uuid;

use crate::AppState;
use crate::error::{ApiError, ApiResult, AppJson, AppPath, AppQuery, ok};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

pub async fn create_order(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    AppJson(input): AppJson<CreateOrderInput>,
) -> Result<Response, ApiError> {
    let order = state.services.orders.create_order(actor, input).await?;
    Ok((StatusCode::CREATED, ok(order, "Order placed")).into_response())
}

pub async fn my_orders(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Vec<Order>> {
    let orders = state.services.orders.my_orders(actor).await?;
    Ok(ok(orders, "Orders fetched"))
}

pub async fn detail(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    AppPath(id): AppPath<Uuid>,
) -> ApiResult<OrderDetail> {
    let detail = state.services.orders.detail(actor, id).await?;
    Ok(ok(detail, "Order fetched"))
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    AppPath(id): AppPath<Uuid>,
) -> ApiResult<Order> {
    let order = state.services.orders.cancel(actor, id).await?;
    Ok(ok(order, "Order cancelled"))
}

pub async fn list_all(State(state): State<AppState>) -> ApiResult<Vec<Order>> {
    let orders = state.services.orders.list_all().await?;
    Ok(ok(orders, "Orders fetched"))
}

pub async fn mark_reviewed(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> ApiResult<Order> {
    let order = state.services.orders.mark_reviewed(id).await?;
    Ok(ok(order, "Order marked as reviewed"))
}

pub async fn seller_orders(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Vec<Order>> {
    let orders = state.services.orders.seller_orders(actor).await?;
    Ok(ok(orders, "Seller orders fetched"))
}

pub async fn update_line_status(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    AppJson(input): AppJson<LineStatusInput>,
) -> ApiResult<Order> {
    let order = state
        .services
        .orders
        .update_line_status(actor, input)
        .await?;
    Ok(ok(order, "Product status updated"))
}

pub async fn seller_stats(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<SellerStats> {
    let stats = state.services.orders.seller_stats(actor).await?;
    Ok(ok(stats, "Seller stats fetched"))
}

pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    body: Option<AppJson<CheckoutInput>>,
) -> ApiResult<CheckoutStarted> {
    let input = body.map(|AppJson(input)| input).unwrap_or_default();
    let started = state
        .services
        .payments
        .create_checkout(actor, input)
        .await?;
    Ok(ok(started, "Checkout session created"))
}

#[derive(Deserialize)]
pub struct SessionQuery {
    session_id: String,
}

pub async fn session_status(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    AppQuery(query): AppQuery<SessionQuery>,
) -> ApiResult<SessionStatus> {
    let status = state
        .services
        .payments
        .session_status(actor, &query.session_id)
        .await?;
    Ok(ok(status, "Session status fetched"))
}

/// Provider callback. Takes the raw body, which the signature covers.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<()> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let outcome = state
        .services
        .payments
        .handle_webhook(&body, signature)
        .await?;
    let message = match outcome {
        WebhookOutcome::OrderCreated(id) => {
            info!(order = %id, "Webhook created order");
            "Order created"
        }
        WebhookOutcome::AlreadyProcessed(_) => "Already processed",
        WebhookOutcome::Ignored(kind) => {
            info!(%kind, "Webhook event ignored");
            "Event ignored"
        }
    };
    Ok(ok((), message))
}
