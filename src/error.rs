use axum::http::StatusCode;

/// Seconds a blacklisted sender is told to wait. Recovery needs an operator unblock.
pub const BLACKLIST_RETRY_AFTER_SECS: u64 = 3600;

/// Why a signature check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No signature header on the request.
    Missing,
    /// Header present but malformed or not matching the body.
    Invalid,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => f.write_str("missing"),
            Self::Invalid => f.write_str("invalid"),
        }
    }
}

/// Terminal failures of the ingestion pipeline.
///
/// Every variant maps onto one HTTP status and a stable machine-readable code.
#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("webhook signature {0}")]
    Authentication(AuthFailure),

    #[error("invalid webhook payload: {0}")]
    Validation(String),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64, reset_at: i64 },

    #[error("sender is blacklisted")]
    Blacklisted,

    #[error("webhook ingestion is disabled")]
    Unavailable,

    #[error("internal error: {0}")]
    Internal(String),
}

impl IngressError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } | Self::Blacklisted => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Authentication(AuthFailure::Missing) => "missing_signature",
            Self::Authentication(AuthFailure::Invalid) => "invalid_signature",
            Self::Validation(_) => "invalid_payload",
            Self::RateLimited { .. } => "rate_limited",
            Self::Blacklisted => "blacklisted",
            Self::Unavailable => "service_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Seconds the caller should wait before retrying, for 429-class errors.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            Self::Blacklisted => Some(BLACKLIST_RETRY_AFTER_SECS),
            _ => None,
        }
    }
}
