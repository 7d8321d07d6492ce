use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

type HmacSha256 = Hmac<Sha256>;

const ADMIN_KEY_CONTEXT: &[u8] = b"bullion-ledger admin key";

/// Bearer key guarding the operator routes.
///
/// Only a MAC of the key is kept; presented tokens are checked with `verify_slice`,
/// which compares in constant time.
#[derive(Clone)]
pub struct AdminKey {
    tag: Arc<[u8]>,
}

impl AdminKey {
    pub fn new(key: &str) -> Self {
        let tag = Self::mac(key)
            .map(|mac| mac.finalize().into_bytes().to_vec())
            .unwrap_or_default();
        Self { tag: Arc::from(tag) }
    }

    fn mac(key: &str) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).ok()?;
        mac.update(ADMIN_KEY_CONTEXT);
        Some(mac)
    }

    fn matches(&self, header: &str) -> bool {
        header
            .strip_prefix("Bearer ")
            .and_then(|token| Self::mac(token.trim()))
            .map_or(false, |mac| mac.verify_slice(&self.tag).is_ok())
    }
}

pub async fn admin_auth(
    State(key): State<AdminKey>,
    req: Request<Body>,
    next: Next<Body>,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    match auth_header {
        Some(auth) if key.matches(auth) => Ok(next.run(req).await),
        _ => {
            tracing::warn!(uri = %req.uri(), "Rejected admin request");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Authenticated user, as asserted by the gateway in `x-user-id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester(pub Uuid);

#[derive(Debug)]
pub enum RequesterRejection {
    Missing,
    Malformed,
}

impl IntoResponse for RequesterRejection {
    fn into_response(self) -> Response {
        let message = match self {
            RequesterRejection::Missing => "missing x-user-id header",
            RequesterRejection::Malformed => "x-user-id header is not a valid UUID",
        };
        let status = StatusCode::UNAUTHORIZED;
        (
            status,
            Json(json!({ "error": message, "status": status.as_u16(), "retryable": false })),
        )
            .into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Requester
where
    S: Send + Sync,
{
    type Rejection = RequesterRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or(RequesterRejection::Missing)?
            .to_str()
            .map_err(|_| RequesterRejection::Malformed)?;
        Uuid::parse_str(raw.trim())
            .map(Requester)
            .map_err(|_| RequesterRejection::Malformed)
    }
}
