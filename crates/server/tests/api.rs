//! End-to-end checks of the HTTP surface over the in-memory backend.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{Request, StatusCode};
use chrono::Utc;
use model::{Category, Principal, Product, ProductImage, Role};
use repository::Repositories;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use server::{Server, ServerSettings};
use service::{
    CheckoutRequest, CheckoutSession, ImageStore, ImageUpload, MailMessage, Mailer,
    PaymentGateway, Ports, ProviderError, ServiceSettings, Services, WebhookEvent,
};
use tower::ServiceExt;
use uuid::Uuid;

struct OfflineImages;

#[async_trait]
impl ImageStore for OfflineImages {
    async fn upload(&self, _image: ImageUpload) -> Result<ProductImage, ProviderError> {
        Err(ProviderError::Transport("offline".into()))
    }

    async fn destroy(&self, _public_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

struct OfflineGateway;

#[async_trait]
impl PaymentGateway for OfflineGateway {
    async fn create_session(
        &self,
        _request: CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        Err(ProviderError::Transport("offline".into()))
    }

    async fn retrieve_session(&self, _session_id: &str) -> Result<CheckoutSession, ProviderError> {
        Err(ProviderError::Transport("offline".into()))
    }

    fn parse_webhook(&self, _payload: &[u8], _signature: &str) -> Result<WebhookEvent, ProviderError> {
        Err(ProviderError::Signature("no matching signature".into()))
    }
}

struct SilentMailer;

#[async_trait]
impl Mailer for SilentMailer {
    async fn send(&self, _message: MailMessage) -> Result<(), ProviderError> {
        Ok(())
    }
}

fn app(repos: Repositories, static_dir: &Path) -> Router {
    let ports = Ports {
        images: Arc::new(OfflineImages),
        payments: Arc::new(OfflineGateway),
        mailer: Arc::new(SilentMailer),
    };
    let settings = ServiceSettings {
        jwt_secret: "api-test-secret".into(),
        session_ttl: Duration::from_secs(30 * 24 * 3600),
        reset_token_ttl: Duration::from_secs(15 * 60),
        admin_registration_key: "admin-key".into(),
        client_url: "http://localhost:5173".into(),
        currency: "inr".into(),
    };
    let server = Server::new(
        Services::new(repos, ports, settings),
        ServerSettings {
            port: 0,
            static_dir: static_dir.to_path_buf(),
            client_url: "http://localhost:5173".into(),
            cookie_secure: false,
            session_ttl: Duration::from_secs(30 * 24 * 3600),
        },
    )
    .unwrap();
    server.router()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<String>, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let cookie = response
        .headers()
        .get(SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, cookie, body.to_vec())
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Option<String>, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    let request = match body {
        Some(body) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let (status, set_cookie, bytes) = send(app, request).await;
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, set_cookie, json)
}

async fn register_user(app: &Router) -> String {
    let (status, cookie, json) = call(
        app,
        "POST",
        "/api/user/register",
        None,
        Some(json!({
            "name": "Meera",
            "email": format!("meera-{}@shop.test", Uuid::new_v4().simple()),
            "password": "correct-horse",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    cookie.unwrap()
}

async fn seed_product(repos: &Repositories, price: Decimal, stock: i32) -> Product {
    let mut seller = Principal::new(
        Role::Seller,
        "Seller".into(),
        format!("seller-{}@shop.test", Uuid::new_v4().simple()),
        "unused".into(),
    );
    seller.verify_seller().unwrap();
    repos.principals.insert(&seller).await.unwrap();

    let id = Uuid::new_v4();
    let now = Utc::now();
    let product = Product {
        id,
        name: format!("Kurta {}", id.simple()),
        description: "Cotton".into(),
        price,
        category: Category::Women,
        stock,
        images: vec![ProductImage {
            url: format!("https://img.test/{id}.jpg"),
            public_id: format!("storefront/{id}"),
        }],
        seller_id: seller.id,
        rating: Decimal::ZERO,
        num_reviews: 0,
        created_at: now,
        updated_at: now,
    };
    repos.products.insert(&product).await.unwrap();
    product
}

fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().unwrap(),
        other => other.to_string().parse().unwrap(),
    }
}

#[tokio::test]
async fn health_and_metrics_are_public() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(Repositories::in_memory(), dir.path());

    let (status, _, body) = send(
        &app,
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");

    let (status, _, body) = send(
        &app,
        Request::get("/metrics").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains(r#"endpoint="/health""#), "{text}");
}

#[tokio::test]
async fn register_sets_a_session_cookie_that_unlocks_the_profile() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(Repositories::in_memory(), dir.path());

    let cookie = register_user(&app).await;
    assert!(cookie.starts_with("token="));

    let (status, _, json) = call(&app, "GET", "/api/user/profile", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["data"]["name"], "Meera");
    assert!(json["data"].get("passwordHash").is_none());

    let (status, expired, _) = call(&app, "POST", "/api/user/logout", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(expired.as_deref(), Some("token="));
}

#[tokio::test]
async fn gates_reject_missing_sessions_and_wrong_roles() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(Repositories::in_memory(), dir.path());

    let (status, _, json) = call(&app, "GET", "/api/cart/getCart", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "unauthorized");

    let (status, seller, json) = call(
        &app,
        "POST",
        "/api/seller/signup",
        None,
        Some(json!({
            "name": "Asha",
            "email": "asha@shop.test",
            "password": "correct-horse",
            "shopName": "Loom",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{json}");

    let (status, _, json) = call(&app, "GET", "/api/cart/getCart", seller.as_deref(), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"], "forbidden");

    let (status, _, _) = call(&app, "GET", "/api/admin/users", seller.as_deref(), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn cart_total_follows_adds_and_removals() {
    let dir = tempfile::tempdir().unwrap();
    let repos = Repositories::in_memory();
    let first = seed_product(&repos, dec!(500), 10).await;
    let second = seed_product(&repos, dec!(300), 10).await;
    let app = app(repos, dir.path());
    let cookie = register_user(&app).await;

    let (status, _, _) = call(
        &app,
        "POST",
        "/api/cart/addToCart",
        Some(&cookie),
        Some(json!({ "productId": first.id, "quantity": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, _, json) = call(
        &app,
        "POST",
        "/api/cart/addToCart",
        Some(&cookie),
        Some(json!({ "productId": second.id, "quantity": 1 })),
    )
    .await;
    assert_eq!(decimal(&json["data"]["totalPrice"]), dec!(1300));

    let (status, _, json) = call(
        &app,
        "PUT",
        "/api/cart/removeFromCart",
        Some(&cookie),
        Some(json!({ "productId": first.id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&json["data"]["totalPrice"]), dec!(300));
    assert_eq!(json["data"]["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn order_with_a_wrong_total_is_rejected_without_touching_stock() {
    let dir = tempfile::tempdir().unwrap();
    let repos = Repositories::in_memory();
    let product = seed_product(&repos, dec!(300), 4).await;
    let app = app(repos, dir.path());
    let cookie = register_user(&app).await;

    let (status, _, json) = call(
        &app,
        "POST",
        "/api/order/create-order",
        Some(&cookie),
        Some(json!({
            "lines": [{ "productId": product.id, "quantity": 1 }],
            "address": {
                "fullName": "Meera Iyer",
                "phone": "9876543210",
                "street": "12 Lake Road",
                "city": "Pune",
                "postalCode": "411001",
                "country": "India",
            },
            "amountTotal": 310,
            "paymentMethod": "cod",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{json}");
    assert_eq!(json["error"], "validation");

    let uri = format!("/api/product/productDetails/{}", product.id);
    let (status, _, json) = call(&app, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["stock"], 4);
}

#[tokio::test]
async fn webhook_with_a_bad_signature_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(Repositories::in_memory(), dir.path());

    let request = Request::post("/api/payment/webhook")
        .header("Stripe-Signature", "t=1,v1=forged")
        .body(Body::from(r#"{"type":"checkout.session.completed"}"#))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "validation");
}

#[tokio::test]
async fn malformed_json_gets_the_failure_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(Repositories::in_memory(), dir.path());

    let request = Request::post("/api/user/login")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "bad_request");
    assert!(json["message"].as_str().is_some_and(|m| !m.is_empty()));
}

#[tokio::test]
async fn malformed_path_ids_get_the_failure_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(Repositories::in_memory(), dir.path());
    let cookie = register_user(&app).await;

    for (uri, cookie) in [
        ("/api/product/productDetails/not-a-uuid", None),
        ("/api/review/product/not-a-uuid", None),
        ("/api/order/not-a-uuid", Some(cookie.as_str())),
    ] {
        let (status, _, json) = call(&app, "GET", uri, cookie, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(json["error"], "bad_request", "{uri}");
        assert!(json["message"].as_str().is_some_and(|m| !m.is_empty()));
    }
}

#[tokio::test]
async fn listing_past_the_last_page_is_empty_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let repos = Repositories::in_memory();
    seed_product(&repos, dec!(100), 3).await;
    seed_product(&repos, dec!(200), 3).await;
    let app = app(repos, dir.path());

    for page in ["5", "4294967295"] {
        let uri = format!("/api/product/productList?page={page}&limit=100");
        let (status, _, json) = call(&app, "GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::OK, "{json}");
        assert_eq!(json["data"]["total"], 2);
        assert_eq!(json["data"]["pages"], 1);
        assert!(json["data"]["products"].as_array().unwrap().is_empty());
    }

    let (status, _, json) = call(
        &app,
        "GET",
        "/api/product/productList?page=99999999999",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "bad_request");
}

#[tokio::test]
async fn checkout_accepts_a_bare_post() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(Repositories::in_memory(), dir.path());
    let cookie = register_user(&app).await;
    let uri = "/api/payment/create-checkout-session";

    // Without a body or a saved address the service itself refuses.
    let (status, _, json) = call(&app, "POST", uri, Some(&cookie), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation");

    let request = Request::post(uri)
        .header(COOKIE, &cookie)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "bad_request");
}

#[tokio::test]
async fn client_routes_fall_back_to_index_but_api_paths_do_not() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<html>storefront</html>").unwrap();
    std::fs::write(dir.path().join("app.css"), "body{}").unwrap();
    let app = app(Repositories::in_memory(), dir.path());

    let (status, _, body) = send(
        &app,
        Request::get("/orders/42").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"<html>storefront</html>");

    let response = app
        .clone()
        .oneshot(Request::get("/app.css").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.headers()[CONTENT_TYPE], "text/css");

    let (status, _, json) = call(&app, "GET", "/api/unknown", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");

    let (status, _, _) = call(&app, "GET", "/missing.js", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
