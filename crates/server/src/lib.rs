//! Server crate provides the HTTP surface of the storefront.
//!
//! Routes are grouped by the roles allowed to call them; each group sits
//! behind a gate that resolves the session and rejects other roles. The
//! server also exposes `/health` and `/metrics` and serves the client bundle
//! from `static_dir` with an `index.html` fallback for client-side routes.

use std::future::IntoFuture;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, FromRef, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, StatusCode, Uri};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::Router;
use model::Role;
use service::Services;
use service::catalog::MAX_IMAGES;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;

use auth::{CookiePolicy, Gate, require_role};
use error::ApiError;
use handlers::{cart, catalog, identity, orders, reviews};
pub use metrics::Metrics;

const USER: &[Role] = &[Role::User];
const SELLER: &[Role] = &[Role::Seller];
const ADMIN: &[Role] = &[Role::Admin];
const STAFF: &[Role] = &[Role::Seller, Role::Admin];
const ANY: &[Role] = &[Role::User, Role::Seller, Role::Admin];

/// Multipart product forms carry up to `MAX_IMAGES` files plus text fields.
const PRODUCT_BODY_LIMIT: usize = MAX_IMAGES * catalog::MAX_IMAGE_BYTES + 1024 * 1024;

/// Application state shared between request handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub metrics: Arc<Metrics>,
    pub cookies: CookiePolicy,
    pub static_dir: PathBuf,
}

impl FromRef<AppState> for Arc<Metrics> {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}

/// Settings the HTTP layer takes from the application configuration.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub port: u16,
    pub static_dir: PathBuf,
    /// Origin allowed by CORS, with credentials.
    pub client_url: String,
    pub cookie_secure: bool,
    pub session_ttl: Duration,
}

/// Server represents the HTTP server of the storefront.
pub struct Server {
    state: AppState,
    port: u16,
    cors: CorsLayer,
}

impl Server {
    /// Creates a new Server instance.
    ///
    /// Fails when the client origin is not a valid header value or the
    /// metrics registry cannot be built.
    pub fn new(services: Services, settings: ServerSettings) -> Result<Self> {
        info!(port = settings.port, "Initializing HTTP server");
        let origin = HeaderValue::from_str(settings.client_url.trim_end_matches('/'))
            .with_context(|| format!("Invalid client url: {}", settings.client_url))?;
        let cors = CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([CONTENT_TYPE, AUTHORIZATION]);
        let metrics = Metrics::new().context("Failed to create metrics registry")?;

        Ok(Self {
            state: AppState {
                services,
                metrics: Arc::new(metrics),
                cookies: CookiePolicy {
                    secure: settings.cookie_secure,
                    max_age: settings.session_ttl,
                },
                static_dir: settings.static_dir,
            },
            port: settings.port,
            cors,
        })
    }

    /// Binds the port and serves until Ctrl+C or SIGTERM. In-flight requests
    /// get `shutdown_timeout` to finish once the signal arrives.
    pub async fn start(&self, shutdown_timeout: Duration) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .await
            .context("Failed to bind to port")?;
        info!(port = self.port, "HTTP server listening");

        let (signalled, on_signal) = oneshot::channel::<()>();
        let serve = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                let _ = signalled.send(());
            })
            .into_future();
        let deadline = async move {
            match on_signal.await {
                Ok(()) => tokio::time::sleep(shutdown_timeout).await,
                Err(_) => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = serve => {
                result.context("Server error")?;
                info!("HTTP server shut down gracefully");
            }
            _ = deadline => {
                warn!(timeout = ?shutdown_timeout, "Shutdown timed out, dropping open connections");
            }
        }
        Ok(())
    }

    /// The complete router, with state applied.
    pub fn router(&self) -> Router {
        let state = self.state.clone();

        Router::new()
            .merge(public_routes())
            .merge(gated(&state, USER, user_routes()))
            .merge(gated(&state, SELLER, seller_routes()))
            .merge(gated(&state, STAFF, staff_routes()))
            .merge(gated(&state, ADMIN, admin_routes()))
            .merge(gated(&state, ANY, shared_routes()))
            .route("/health", get(handle_health))
            .route("/metrics", get(metrics::handle_metrics))
            .route_layer(from_fn_with_state(
                state.metrics.clone(),
                metrics::track,
            ))
            .fallback(handle_static)
            .layer(self.cors.clone())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Puts every route of `routes` behind a session gate for `roles`.
fn gated(state: &AppState, roles: &'static [Role], routes: Router<AppState>) -> Router<AppState> {
    routes.route_layer(from_fn_with_state(
        Gate {
            state: state.clone(),
            roles,
        },
        require_role,
    ))
}

fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/api/user/register", post(identity::register_user))
        .route("/api/user/login", post(identity::login_user))
        .route("/api/user/logout", post(identity::logout))
        .route("/api/user/forgot-password", post(identity::forgot_password))
        .route("/api/user/reset-password", post(identity::reset_password))
        .route("/api/seller/signup", post(identity::register_seller))
        .route("/api/seller/login", post(identity::login_seller))
        .route("/api/seller/logout", post(identity::logout))
        .route("/api/admin/register", post(identity::register_admin))
        .route("/api/admin/login", post(identity::login_admin))
        .route("/api/admin/logout", post(identity::logout))
        .route("/api/product/productList", get(catalog::list))
        .route("/api/product/productDetails/{id}", get(catalog::details))
        .route("/api/review/product/{id}", get(reviews::by_product))
        .route("/api/review/avg-rating/{id}", get(reviews::average))
        .route("/api/payment/webhook", post(orders::webhook))
}

fn user_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/user/profile",
            get(identity::profile).put(identity::update_profile),
        )
        .route("/api/user/change-password", put(identity::change_password))
        .route("/api/cart/getCart", get(cart::get_cart))
        .route("/api/cart/addToCart", post(cart::add_to_cart))
        .route("/api/cart/removeFromCart", put(cart::remove_from_cart))
        .route("/api/cart/updateQuantity", put(cart::update_quantity))
        .route("/api/cart/clearCart", delete(cart::clear_cart))
        .route("/api/wishlist", get(cart::get_wishlist))
        .route("/api/wishlist/add", post(cart::add_to_wishlist))
        .route("/api/wishlist/remove/{id}", delete(cart::remove_from_wishlist))
        .route("/api/wishlist/clear", delete(cart::clear_wishlist))
        .route("/api/wishlist/toggle/{id}", put(cart::toggle_wishlist))
        .route("/api/order/create-order", post(orders::create_order))
        .route("/api/order/my-orders", get(orders::my_orders))
        .route("/api/order/{id}/cancel", put(orders::cancel))
        .route(
            "/api/payment/create-checkout-session",
            post(orders::create_checkout),
        )
        .route("/api/payment/session-status", get(orders::session_status))
        .route("/api/review/add-review", post(reviews::add))
}

fn seller_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/seller/profile",
            get(identity::profile).put(identity::update_profile),
        )
        .route("/api/seller/change-password", put(identity::change_password))
        .route("/api/seller/me", get(identity::me))
        .route("/api/seller/stats", get(orders::seller_stats))
        .route(
            "/api/product/create-product",
            post(catalog::create).layer(DefaultBodyLimit::max(PRODUCT_BODY_LIMIT)),
        )
        .route("/api/product/seller-products", get(catalog::seller_products))
        .route("/api/order/sellerorders", get(orders::seller_orders))
        .route(
            "/api/order/seller-product-status",
            put(orders::update_line_status),
        )
}

fn staff_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/product/update-product/{id}",
            put(catalog::update).layer(DefaultBodyLimit::max(PRODUCT_BODY_LIMIT)),
        )
        .route("/api/product/update-stock/{id}", put(catalog::update_stock))
        .route("/api/product/remove-product/{id}", delete(catalog::remove))
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/profile", get(identity::profile))
        .route("/api/admin/users", get(identity::list_users))
        .route("/api/admin/sellers", get(identity::list_sellers))
        .route("/api/admin/deactivate/{id}", put(identity::deactivate))
        .route("/api/admin/activate/{id}", put(identity::activate))
        .route("/api/admin/delete/{id}", delete(identity::delete_user))
        .route("/api/admin/sellers/{id}/verify", put(identity::verify_seller))
        .route("/api/admin/sellers/{id}/block", put(identity::block_seller))
        .route(
            "/api/admin/sellers/{id}/unblock",
            put(identity::unblock_seller),
        )
        .route("/api/order", get(orders::list_all))
        .route("/api/order/", get(orders::list_all))
        .route("/api/order/{id}/review", put(orders::mark_reviewed))
}

fn shared_routes() -> Router<AppState> {
    Router::new()
        .route("/api/order/{id}", get(orders::detail))
        .route("/api/review/delete-review/{id}", delete(reviews::delete))
}

async fn handle_health() -> &'static str {
    "OK"
}

/// Maps a request path onto a file below `root`, refusing anything that
/// would leave it.
fn static_path(root: &Path, uri_path: &str) -> Option<PathBuf> {
    let relative = Path::new(uri_path.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    if relative.as_os_str().is_empty() {
        return Some(root.join("index.html"));
    }
    Some(root.join(relative))
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "application/javascript",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

async fn serve_file(path: &Path) -> Option<Response> {
    let bytes = tokio::fs::read(path).await.ok()?;
    Some(([(CONTENT_TYPE, content_type(path))], bytes).into_response())
}

/// Serves the client bundle. Unknown extensionless paths get `index.html` so
/// the client router can take over; unknown `/api` paths get a JSON 404.
async fn handle_static(State(state): State<AppState>, uri: Uri) -> Response {
    let path = uri.path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::NotFound.into_response();
    }
    let Some(file) = static_path(&state.static_dir, path) else {
        warn!(path, "Rejected static path");
        return ApiError::NotFound.into_response();
    };
    debug!(file = ?file, "Serving static file");
    if let Some(response) = serve_file(&file).await {
        return response;
    }
    if file.extension().is_none() {
        if let Some(response) = serve_file(&state.static_dir.join("index.html")).await {
            return response;
        }
    }
    (StatusCode::NOT_FOUND, "File not found").into_response()
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_paths_stay_inside_the_root() {
        let root = Path::new("/srv/static");
        assert_eq!(
            static_path(root, "/"),
            Some(PathBuf::from("/srv/static/index.html"))
        );
        assert_eq!(
            static_path(root, "/assets/app.js"),
            Some(PathBuf::from("/srv/static/assets/app.js"))
        );
        assert_eq!(static_path(root, "/../etc/passwd"), None);
        assert_eq!(static_path(root, "/assets/../../secret"), None);
    }

    #[test]
    fn content_types_follow_the_extension() {
        assert_eq!(content_type(Path::new("a/index.html")), "text/html; charset=utf-8");
        assert_eq!(content_type(Path::new("app.js")), "application/javascript");
        assert_eq!(content_type(Path::new("blob")), "application/octet-stream");
    }

    #[test]
    fn product_forms_fit_every_image() {
        assert!(PRODUCT_BODY_LIMIT > MAX_IMAGES * catalog::MAX_IMAGE_BYTES);
    }
}
