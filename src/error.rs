use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Gateway error taxonomy. Every variant maps to a stable wire code in the
/// `{success: false, error: {code, message}}` envelope.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication
    #[error("API key header is missing")]
    MissingApiKey,
    #[error("API key is not recognized")]
    InvalidApiKey,
    #[error("merchant is not approved for gateway access")]
    NotApproved,
    #[error("no signing secret is configured for this environment")]
    NoSigningSecret,
    #[error("one or more signature headers are missing")]
    MissingSignatureHeaders,
    #[error("timestamp header is not an integer")]
    InvalidTimestamp,
    #[error("request timestamp is outside the signing window")]
    RequestExpired,
    #[error("nonce was already used")]
    ReplayDetected,
    #[error("request signature does not match")]
    InvalidSignature,

    // Authorization
    #[error("client address is not on the allow-list")]
    IpNotAllowed,
    #[error("forbidden")]
    Forbidden,

    // Validation
    #[error("missing required parameter: {0}")]
    MissingParams(String),
    #[error("amount must be a positive integer")]
    InvalidAmount,
    #[error("QRIS payload is malformed or fails its checksum")]
    InvalidQris,
    #[error("URL is not valid")]
    InvalidUrl,

    // State / availability
    #[error("not found")]
    NotFound,
    #[error("conflicting concurrent update")]
    Conflict,
    #[error("no unique suffix is available for this principal")]
    NoSuffixAvailable,
    #[error("rate limit exceeded")]
    RateLimit { retry_after_secs: u64 },
    #[error("upstream provider is unavailable")]
    UpstreamUnavailable,

    // Internal
    #[error("internal error")]
    Internal,
}

impl ApiError {
    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MissingApiKey => "MissingApiKey",
            ApiError::InvalidApiKey => "InvalidApiKey",
            ApiError::NotApproved => "NotApproved",
            ApiError::NoSigningSecret => "NoSigningSecret",
            ApiError::MissingSignatureHeaders => "MissingSignatureHeaders",
            ApiError::InvalidTimestamp => "InvalidTimestamp",
            ApiError::RequestExpired => "RequestExpired",
            ApiError::ReplayDetected => "ReplayDetected",
            ApiError::InvalidSignature => "InvalidSignature",
            ApiError::IpNotAllowed => "IpNotAllowed",
            ApiError::Forbidden => "Forbidden",
            ApiError::MissingParams(_) => "MissingParams",
            ApiError::InvalidAmount => "InvalidAmount",
            ApiError::InvalidQris => "InvalidQris",
            ApiError::InvalidUrl => "InvalidUrl",
            ApiError::NotFound => "NotFound",
            ApiError::Conflict => "Conflict",
            ApiError::NoSuffixAvailable => "NoSuffixAvailable",
            ApiError::RateLimit { .. } => "RateLimit",
            ApiError::UpstreamUnavailable => "UpstreamUnavailable",
            ApiError::Internal => "Internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingApiKey
            | ApiError::InvalidApiKey
            | ApiError::NoSigningSecret
            | ApiError::MissingSignatureHeaders
            | ApiError::InvalidTimestamp
            | ApiError::RequestExpired
            | ApiError::InvalidSignature => StatusCode::UNAUTHORIZED,
            ApiError::NotApproved | ApiError::IpNotAllowed | ApiError::Forbidden => {
                StatusCode::FORBIDDEN
            }
            ApiError::MissingParams(_)
            | ApiError::InvalidAmount
            | ApiError::InvalidQris
            | ApiError::InvalidUrl => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::ReplayDetected | ApiError::Conflict | ApiError::NoSuffixAvailable => {
                StatusCode::CONFLICT
            }
            ApiError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            other => {
                tracing::error!("store failure: {}", other);
                ApiError::Internal
            }
        }
    }
}

impl From<crate::qris::QrisError> for ApiError {
    fn from(err: crate::qris::QrisError) -> Self {
        tracing::debug!("qris rejection: {}", err);
        ApiError::InvalidQris
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));

        match self {
            ApiError::RateLimit { retry_after_secs } => (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}
