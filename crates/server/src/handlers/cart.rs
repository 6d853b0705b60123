use axum::extract::{Extension, State};
use model::Actor;
use serde::{Deserialize, Serialize};
use service::{CartView, WishlistView};
use uuid::Uuid;

use crate::AppState;
use crate::error::{ApiResult, AppJson, AppPath, ok};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineInput {
    product_id: Uuid,
    #[serde(default = "one")]
    quantity: i32,
}

fn one() -> i32 {
    1
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRef {
    product_id: Uuid,
}

pub async fn get_cart(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<CartView> {
    let cart = state.services.carts.get(actor.id).await?;
    Ok(ok(cart, "Cart fetched"))
}

pub async fn add_to_cart(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    AppJson(input): AppJson<CartLineInput>,
) -> ApiResult<CartView> {
    let cart = state
        .services
        .carts
        .add(actor.id, input.product_id, input.quantity)
        .await?;
    Ok(ok(cart, "Product added to cart"))
}

pub async fn remove_from_cart(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    AppJson(input): AppJson<ProductRef>,
) -> ApiResult<CartView> {
    let cart = state
        .services
        .carts
        .remove(actor.id, input.product_id)
        .await?;
    Ok(ok(cart, "Product removed from cart"))
}

pub async fn update_quantity(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    AppJson(input): AppJson<CartLineInput>,
) -> ApiResult<CartView> {
    let cart = state
        .services
        .carts
        .update_quantity(actor.id, input.product_id, input.quantity)
        .await?;
    Ok(ok(cart, "Quantity updated"))
}

pub async fn clear_cart(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<CartView> {
    let cart = state.services.carts.clear(actor.id).await?;
    Ok(ok(cart, "Cart cleared"))
}

pub async fn get_wishlist(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<WishlistView> {
    let wishlist = state.services.wishlists.get(actor.id).await?;
    Ok(ok(wishlist, "Wishlist fetched"))
}

pub async fn add_to_wishlist(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    AppJson(input): AppJson<ProductRef>,
) -> ApiResult<WishlistView> {
    let wishlist = state
        .services
        .wishlists
        .add(actor.id, input.product_id)
        .await?;
    Ok(ok(wishlist, "Product added to wishlist"))
}

pub async fn remove_from_wishlist(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    AppPath(product_id): AppPath<Uuid>,
) -> ApiResult<WishlistView> {
    let wishlist = state
        .services
        .wishlists
        .remove(actor.id, product_id)
        .await?;
    Ok(ok(wishlist, "Product removed from wishlist"))
}

pub async fn clear_wishlist(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<WishlistView> {
    let wishlist = state.services.wishlists.clear(actor.id).await?;
    Ok(ok(wishlist, "Wishlist cleared"))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Toggled {
    product_id: Uuid,
    in_wishlist: bool,
}

pub async fn toggle_wishlist(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    AppPath(product_id): AppPath<Uuid>,
) -> ApiResult<Toggled> {
    let in_wishlist = state
        .services
        .wishlists
        .toggle(actor.id, product_id)
        .await?;
    let message = if in_wishlist {
        "Added to wishlist"
    } else {
        "Removed from wishlist"
    };
    Ok(ok(
        Toggled {
            product_id,
            in_wishlist,
        },
        message,
    ))
}
