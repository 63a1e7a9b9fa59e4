//! The signed-request pipeline.
//!
//! Every gateway route passes through this chain in order: API-key
//! resolution, merchant status, IP allow-list, timestamp window, nonce
//! uniqueness, HMAC verification, rate limit. The first failure aborts
//! with its specific code. Cheap checks run first; the HMAC is last among
//! the auth checks so replay and expiry rejections never spend CPU on it,
//! and the rate limiter runs after auth so 429s cannot shadow auth errors.

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::net::SocketAddr;

use crate::auth::{keys, signature};
use crate::db::models::Env;
use crate::db::queries;
use crate::error::ApiError;
use crate::middleware::ip_filter;
use crate::AppState;

const API_KEY_HEADER: &str = "x-api-key";
const TIMESTAMP_HEADER: &str = "x-timestamp";
const NONCE_HEADER: &str = "x-nonce";
const SIGNATURE_HEADER: &str = "x-signature";

/// Request bodies are canonicalized for signing; anything past this is not
/// a legitimate gateway call.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Identity resolved by the pipeline, attached to the request for handlers.
#[derive(Debug, Clone)]
pub struct AuthedMerchant {
    pub merchant_id: String,
    pub env: Env,
}

pub async fn require_signed_request(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let now = Utc::now().timestamp();
    let (mut parts, body) = request.into_parts();

    // 1. API key presence and resolution.
    let api_key = header_value(&parts.headers, API_KEY_HEADER).ok_or(ApiError::MissingApiKey)?;
    let (merchant_id, env) = queries::lookup_by_key_hash(&state.db, &keys::fingerprint(&api_key))
        .await?
        .ok_or(ApiError::InvalidApiKey)?;

    // 2. Merchant must be active.
    let merchant = queries::get_merchant(&state.db, &merchant_id)
        .await?
        .ok_or(ApiError::InvalidApiKey)?;
    if !merchant.is_active() {
        return Err(ApiError::NotApproved);
    }

    // 3. IP allow-list, only when the merchant enabled it.
    if merchant.ip_whitelist_enabled {
        let peer = connect_info.map(|ConnectInfo(addr)| addr);
        let ip = ip_filter::client_ip(&parts.headers, peer).ok_or(ApiError::IpNotAllowed)?;
        let entries = ip_filter::parse_entries(merchant.ip_whitelist.as_deref());
        if !ip_filter::is_allowed(ip, &entries) {
            return Err(ApiError::IpNotAllowed);
        }
    }

    // 4. Timestamp window.
    let timestamp_raw = header_value(&parts.headers, TIMESTAMP_HEADER)
        .ok_or(ApiError::MissingSignatureHeaders)?;
    let nonce =
        header_value(&parts.headers, NONCE_HEADER).ok_or(ApiError::MissingSignatureHeaders)?;
    let signature_hex =
        header_value(&parts.headers, SIGNATURE_HEADER).ok_or(ApiError::MissingSignatureHeaders)?;

    let timestamp: i64 = timestamp_raw
        .parse()
        .map_err(|_| ApiError::InvalidTimestamp)?;
    if !within_window(now, timestamp, state.config.sign_window_secs) {
        return Err(ApiError::RequestExpired);
    }

    // 5. Nonce uniqueness inside the signing window.
    if nonce.trim().is_empty() {
        return Err(ApiError::MissingSignatureHeaders);
    }
    let fresh =
        queries::try_mark_nonce(&state.db, &merchant_id, &nonce, now, state.config.nonce_ttl_secs)
            .await?;
    if !fresh {
        return Err(ApiError::ReplayDetected);
    }

    // 6. Signature over the canonical request.
    let credentials = queries::get_credentials(&state.db, &merchant_id)
        .await?
        .ok_or(ApiError::NoSigningSecret)?;
    let signing_secret = credentials
        .api_secret(env)
        .ok_or(ApiError::NoSigningSecret)?;

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let body_bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| ApiError::Internal)?;

    let canonical = signature::canonical_request(
        parts.method.as_str(),
        &path_and_query,
        timestamp,
        &nonce,
        &body_bytes,
    );
    if !signature::verify(signing_secret, &canonical, &signature_hex) {
        return Err(ApiError::InvalidSignature);
    }

    // 7. Rate limit, last so a 429 never masks an auth failure.
    if let Err(retry_after_secs) = state.rate_limiter.check(&merchant_id) {
        return Err(ApiError::RateLimit { retry_after_secs });
    }

    tracing::debug!(merchant_id = %merchant_id, env = env.as_str(), "request authenticated");

    parts.extensions.insert(AuthedMerchant { merchant_id, env });
    let request = Request::from_parts(parts, Body::from(body_bytes));
    Ok(next.run(request).await)
}

/// `±window` around server time, both edges inclusive.
fn within_window(now: i64, timestamp: i64, window_secs: i64) -> bool {
    (now - timestamp).abs() <= window_secs
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
