//! Authentication middleware and the request principal.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Cookie carrying a login token for browser clients.
pub const TOKEN_COOKIE: &str = "trove_token";

/// Paths served without looking at presented credentials, so a stale cookie
/// never blocks a health probe or a fresh login.
const ANONYMOUS_PATHS: &[&str] = &["/v1/health", "/v1/auth/login"];

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    /// The value is truncated to MAX_TRACE_ID_LEN characters and non-printable characters removed.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    /// Get the trace ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The authenticated caller. Handlers take it as an explicit parameter.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: Uuid,
    pub username: String,
    pub is_admin: bool,
    /// Token that authenticated this request.
    pub token_id: Uuid,
}

impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))
    }
}

/// A principal with administrator rights.
#[derive(Clone, Debug)]
pub struct AdminPrincipal(pub Principal);

impl<S: Send + Sync> FromRequestParts<S> for AdminPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let principal = Principal::from_request_parts(parts, state).await?;
        if !principal.is_admin {
            return Err(ApiError::Forbidden("administrator required".to_string()));
        }
        Ok(Self(principal))
    }
}

/// Extract bearer token from Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        })
}

/// Find a cookie value by name.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// The presented token: the Authorization header wins over the cookie.
pub fn presented_token(headers: &HeaderMap) -> Option<&str> {
    extract_bearer_token(headers)
        .or_else(|| cookie_value(headers, TOKEN_COOKIE))
        .filter(|t| !t.is_empty())
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(headers: &HeaderMap) -> TraceId {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Hash a token for storage lookup.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Generate a fresh random bearer token.
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Resolve a presented token to a principal.
async fn authenticate(state: &AppState, token: &str) -> ApiResult<Principal> {
    let token_row = state
        .metadata
        .get_token_by_hash(&hash_token(token))
        .await?
        .ok_or_else(|| ApiError::Unauthorized("invalid token".to_string()))?;

    let now = OffsetDateTime::now_utc();
    if !token_row.is_usable(now) {
        return Err(ApiError::Unauthorized(
            "token expired or revoked".to_string(),
        ));
    }

    let user = state
        .metadata
        .get_user(token_row.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("token owner no longer exists".to_string()))?;

    // Update last used time (fire and forget)
    let metadata = state.metadata.clone();
    let token_id = token_row.token_id;
    tokio::spawn(async move {
        let _ = metadata.touch_token(token_id, now).await;
    });

    Ok(Principal {
        user_id: user.user_id,
        username: user.username,
        is_admin: user.is_admin,
        token_id,
    })
}

/// Authentication middleware that validates tokens and sets up trace context.
///
/// Requests without a token pass through anonymously; handlers that need a
/// caller reject them through the [`Principal`] extractor.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = extract_or_generate_trace_id(req.headers());
    let trace_id_str = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    let anonymous = ANONYMOUS_PATHS.contains(&req.uri().path());
    if !anonymous && let Some(token) = presented_token(req.headers()) {
        let principal = authenticate(&state, token).await?;
        req.extensions_mut().insert(principal);
    }

    let response = next
        .run(req)
        .instrument(tracing::info_span!("request", trace_id = %trace_id_str))
        .await;

    Ok(response)
}
