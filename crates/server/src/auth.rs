//! Session cookies and role gates.

use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::middleware::Next;
use axum::response::Response;
use model::Role;
use service::ServiceError;
use tracing::debug;

use crate::AppState;
use crate::error::ApiError;

pub const SESSION_COOKIE: &str = "token";

/// Cookie attributes shared by login and logout.
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    pub secure: bool,
    pub max_age: Duration,
}

impl CookiePolicy {
    fn attributes(&self) -> &'static str {
        // Cross-site SPA hosting needs SameSite=None, which browsers only accept with Secure.
        if self.secure {
            "HttpOnly; Path=/; SameSite=None; Secure"
        } else {
            "HttpOnly; Path=/; SameSite=Lax"
        }
    }

    pub fn session(&self, token: &str) -> String {
        format!(
            "{SESSION_COOKIE}={token}; Max-Age={}; {}",
            self.max_age.as_secs(),
            self.attributes()
        )
    }

    pub fn expired(&self) -> String {
        format!("{SESSION_COOKIE}=; Max-Age=0; {}", self.attributes())
    }
}

/// The session token from `Authorization: Bearer …` or the `token` cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// State of a role gate: the app plus the roles it lets through.
#[derive(Clone)]
pub(crate) struct Gate {
    pub state: AppState,
    pub roles: &'static [Role],
}

/// Resolves the session and inserts the caller's [`model::Actor`] into the
/// request, or rejects with 401 (no valid session) or 403 (wrong role).
pub(crate) async fn require_role(
    State(gate): State<Gate>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = session_token(req.headers())
        .ok_or_else(|| ServiceError::Unauthorized("Not authenticated".into()))?;
    let actor = gate.state.services.identity.authenticate(&token).await?;
    if !gate.roles.contains(&actor.role) {
        debug!(role = %actor.role, path = %req.uri().path(), "Role not allowed");
        return Err(ServiceError::Forbidden("Access denied for this role".into()).into());
    }
    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}
