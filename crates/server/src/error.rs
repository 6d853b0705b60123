//! Response envelopes and the mapping from service errors to HTTP.

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, OptionalFromRequest, Request};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde::de::DeserializeOwned;
use service::ServiceError;
use tracing::{error, warn};

/// Success body: `{ data, message }`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub data: T,
    pub message: String,
}

/// Failure body: `{ message, error }`, where `error` is a stable code.
#[derive(Debug, Serialize)]
pub struct Failure {
    pub message: String,
    pub error: &'static str,
}

pub type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

pub fn ok<T: Serialize>(data: T, message: impl Into<String>) -> Json<Envelope<T>> {
    Json(Envelope {
        data,
        message: message.into(),
    })
}

/// Error returned by every handler.
#[derive(Debug)]
pub enum ApiError {
    Service(ServiceError),
    /// The request could not be decoded.
    BadRequest(String),
    NotFound,
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Service(err) => match err {
                ServiceError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
                ServiceError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
                ServiceError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
                ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                ServiceError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
                ServiceError::InsufficientStock(_) => (StatusCode::CONFLICT, "insufficient_stock"),
                ServiceError::Provider(_) => (StatusCode::BAD_GATEWAY, "provider"),
                ServiceError::Repository(_) | ServiceError::Unexpected(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal")
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        // Server-side failures are logged in full and answered generically.
        let message = if status.is_server_error() {
            error!(status = status.as_u16(), error = ?self, "Request failed");
            match status {
                StatusCode::BAD_GATEWAY => "An upstream service is unavailable".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            match self {
                ApiError::Service(err) => err.to_string(),
                ApiError::BadRequest(msg) => msg,
                ApiError::NotFound => "Resource not found".to_string(),
            }
        };
        (status, Json(Failure { message, error: code })).into_response()
    }
}

/// `Json` whose rejections use the failure envelope.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match <Json<T> as FromRequest<S>>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => {
                warn!(reason = %rejection.body_text(), "Rejected JSON body");
                Err(json_rejection(rejection))
            }
        }
    }
}

/// An empty body is `None`; anything else must be valid JSON.
impl<S, T> OptionalFromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Option<Self>, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|r| ApiError::BadRequest(r.body_text()))?;
        if bytes.is_empty() {
            return Ok(None);
        }
        match Json::<T>::from_bytes(&bytes) {
            Ok(Json(value)) => Ok(Some(AppJson(value))),
            Err(rejection) => {
                warn!(reason = %rejection.body_text(), "Rejected JSON body");
                Err(json_rejection(rejection))
            }
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(rejection.body_text())
}

/// `Query` whose rejections use the failure envelope.
pub struct AppQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for AppQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        axum::extract::Query::<T>::from_request_parts(parts, state)
            .await
            .map(|q| AppQuery(q.0))
            .map_err(|r: QueryRejection| ApiError::BadRequest(r.body_text()))
    }
}

/// `Path` whose rejections use the failure envelope.
pub struct AppPath<T>(pub T);

impl<S, T> FromRequestParts<S> for AppPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        axum::extract::Path::<T>::from_request_parts(parts, state)
            .await
            .map(|p| AppPath(p.0))
            .map_err(|r: PathRejection| {
                warn!(reason = %r.body_text(), "Rejected path parameters");
                ApiError::BadRequest(r.body_text())
            })
    }
}
