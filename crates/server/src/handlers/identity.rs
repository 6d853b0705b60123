//! Registration, sign-in and profile handlers shared by the three roles.

use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::http::header::SET_COOKIE;
use axum::response::{IntoResponse, Response};
use model::{Actor, Principal, Role};
use serde::{Deserialize, Serialize};
use service::{AuthSession, ChangePasswordInput, LoginInput, ProfileUpdate, RegisterInput, SellerModeration};
use uuid::Uuid;

use crate::AppState;
use crate::error::{ApiError, ApiResult, AppJson, AppPath, ok};

#[derive(Serialize)]
struct SignedIn {
    user: Principal,
    token: String,
}

fn signed_in(state: &AppState, session: AuthSession, status: StatusCode, message: &str) -> Response {
    let cookie = state.cookies.session(&session.token);
    (
        status,
        [(SET_COOKIE, cookie)],
        ok(
            SignedIn {
                user: session.principal,
                token: session.token,
            },
            message,
        ),
    )
        .into_response()
}

async fn register(state: AppState, role: Role, input: RegisterInput) -> Result<Response, ApiError> {
    let session = state.services.identity.register(role, input).await?;
    Ok(signed_in(&state, session, StatusCode::CREATED, "Registered successfully"))
}

async fn login(state: AppState, role: Role, input: LoginInput) -> Result<Response, ApiError> {
    let session = state.services.identity.login(role, input).await?;
    Ok(signed_in(&state, session, StatusCode::OK, "Logged in successfully"))
}

pub async fn register_user(
    State(state): State<AppState>,
    AppJson(input): AppJson<RegisterInput>,
) -> Result<Response, ApiError> {
    register(state, Role::User, input).await
}

pub async fn register_seller(
    State(state): State<AppState>,
    AppJson(input): AppJson<RegisterInput>,
) -> Result<Response, ApiError> {
    register(state, Role::Seller, input).await
}

pub async fn register_admin(
    State(state): State<AppState>,
    AppJson(input): AppJson<RegisterInput>,
) -> Result<Response, ApiError> {
    register(state, Role::Admin, input).await
}

pub async fn login_user(
    State(state): State<AppState>,
    AppJson(input): AppJson<LoginInput>,
) -> Result<Response, ApiError> {
    login(state, Role::User, input).await
}

pub async fn login_seller(
    State(state): State<AppState>,
    AppJson(input): AppJson<LoginInput>,
) -> Result<Response, ApiError> {
    login(state, Role::Seller, input).await
}

pub async fn login_admin(
    State(state): State<AppState>,
    AppJson(input): AppJson<LoginInput>,
) -> Result<Response, ApiError> {
    login(state, Role::Admin, input).await
}

pub async fn logout(State(state): State<AppState>) -> Response {
    (
        [(SET_COOKIE, state.cookies.expired())],
        ok((), "Logged out successfully"),
    )
        .into_response()
}

pub async fn profile(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Principal> {
    let principal = state.services.identity.profile(actor).await?;
    Ok(ok(principal, "Profile fetched"))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    AppJson(update): AppJson<ProfileUpdate>,
) -> ApiResult<Principal> {
    let principal = state.services.identity.update_profile(actor, update).await?;
    Ok(ok(principal, "Profile updated"))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    AppJson(input): AppJson<ChangePasswordInput>,
) -> ApiResult<()> {
    state.services.identity.change_password(actor, input).await?;
    Ok(ok((), "Password changed"))
}

#[derive(Deserialize)]
pub struct ForgotPassword {
    email: String,
}

pub async fn forgot_password(
    State(state): State<AppState>,
    AppJson(input): AppJson<ForgotPassword>,
) -> ApiResult<()> {
    state.services.identity.forgot_password(&input.email).await?;
    Ok(ok(
        (),
        "If the address is registered, a reset link has been sent",
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPassword {
    token: String,
    #[serde(alias = "password")]
    new_password: String,
}

pub async fn reset_password(
    State(state): State<AppState>,
    AppJson(input): AppJson<ResetPassword>,
) -> ApiResult<()> {
    state
        .services
        .identity
        .reset_password(&input.token, &input.new_password)
        .await?;
    Ok(ok((), "Password has been reset"))
}

/// The caller's identity as carried by the session.
#[derive(Serialize)]
pub struct Me {
    id: Uuid,
    role: Role,
}

pub async fn me(Extension(actor): Extension<Actor>) -> ApiResult<Me> {
    Ok(ok(
        Me {
            id: actor.id,
            role: actor.role,
        },
        "Session is valid",
    ))
}

pub async fn list_users(State(state): State<AppState>) -> ApiResult<Vec<Principal>> {
    let users = state.services.identity.list_principals(Role::User).await?;
    Ok(ok(users, "Users fetched"))
}

pub async fn list_sellers(State(state): State<AppState>) -> ApiResult<Vec<Principal>> {
    let sellers = state.services.identity.list_principals(Role::Seller).await?;
    Ok(ok(sellers, "Sellers fetched"))
}

pub async fn deactivate(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> ApiResult<Principal> {
    let principal = state.services.identity.set_active(id, false).await?;
    Ok(ok(principal, "Account deactivated"))
}

pub async fn activate(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> ApiResult<Principal> {
    let principal = state.services.identity.set_active(id, true).await?;
    Ok(ok(principal, "Account activated"))
}

pub async fn delete_user(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> ApiResult<()> {
    state.services.identity.delete_user(id).await?;
    Ok(ok((), "User deleted"))
}

async fn moderate(
    state: AppState,
    id: Uuid,
    action: SellerModeration,
    message: &str,
) -> ApiResult<Principal> {
    let seller = state.services.identity.moderate_seller(id, action).await?;
    Ok(ok(seller, message))
}

pub async fn verify_seller(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> ApiResult<Principal> {
    moderate(state, id, SellerModeration::Verify, "Seller verified").await
}

pub async fn block_seller(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> ApiResult<Principal> {
    moderate(state, id, SellerModeration::Block, "Seller blocked").await
}

pub async fn unblock_seller(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> ApiResult<Principal> {
    moderate(state, id, SellerModeration::Unblock, "Seller unblocked").await
}
