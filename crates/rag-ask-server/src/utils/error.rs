use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Which rate-limit scope tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitScope {
    Ip,
    User,
    Tenant,
}

impl std::fmt::Display for LimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitScope::Ip => write!(f, "ip"),
            LimitScope::User => write!(f, "user"),
            LimitScope::Tenant => write!(f, "tenant"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Schema invalid: {0}")]
    SchemaInvalid(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded for {scope}")]
    RateLimited { scope: LimitScope, retry_after: u64 },

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("No documents provided for synthesis")]
    NoDocuments,

    #[error("Invalid user context: {0}")]
    InvalidUserContext(String),

    #[error("Invalid citations: {0}")]
    InvalidCitations(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMedia(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_type: Option<LimitScope>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::SchemaInvalid(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::LlmProvider(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NoDocuments => StatusCode::BAD_REQUEST,
            ApiError::InvalidUserContext(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidCitations(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind name used in the JSON body and SSE error events.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::SchemaInvalid(_) => "SchemaInvalid",
            ApiError::Unauthorized(_) => "Unauthorized",
            ApiError::RateLimited { .. } => "RateLimited",
            ApiError::UpstreamUnavailable(_) => "UpstreamUnavailable",
            ApiError::PayloadTooLarge(_) => "PayloadTooLarge",
            ApiError::LlmProvider(_) => "LLMProviderError",
            ApiError::NoDocuments => "NoDocuments",
            ApiError::InvalidUserContext(_) => "InvalidUserContext",
            ApiError::InvalidCitations(_) => "InvalidCitations",
            ApiError::Timeout(_) => "Timeout",
            ApiError::UnsupportedMedia(_) => "UnsupportedMedia",
            ApiError::Internal(_) => "InternalError",
        }
    }

    pub fn body(&self) -> ErrorBody {
        let (retry_after, limit_type) = match self {
            ApiError::RateLimited { scope, retry_after } => (Some(*retry_after), Some(*scope)),
            _ => (None, None),
        };
        ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
            code: self.status().as_u16(),
            retry_after,
            limit_type,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Internal(msg) | ApiError::InvalidCitations(msg) => {
                tracing::error!("{}: {}", self.kind(), msg)
            }
            ApiError::UpstreamUnavailable(msg) | ApiError::LlmProvider(msg) => {
                tracing::error!("{}: {}", self.kind(), msg)
            }
            other => tracing::warn!("{}: {}", other.kind(), other),
        }

        let body = self.body();
        let mut response = (status, Json(&body)).into_response();

        if let ApiError::RateLimited { retry_after, .. } = self {
            let now = chrono::Utc::now().timestamp() as u64;
            let headers = response.headers_mut();
            if let Ok(v) = header::HeaderValue::from_str(&retry_after.to_string()) {
                headers.insert(header::RETRY_AFTER, v);
            }
            if let Ok(v) = header::HeaderValue::from_str(&(now + retry_after).to_string()) {
                headers.insert("X-RateLimit-Reset", v);
            }
        }

        response
    }
}
