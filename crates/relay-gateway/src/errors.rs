//! Maps internal result/error kinds onto HTTP responses in one place.

use axum::{http::StatusCode, response::IntoResponse, Json};

pub type ApiResult<T> = Result<T, RelayError>;

/// One variant per error-routing disposition: auth, gate, rate limit, cross-worker violation,
/// input validation, apex unreachable/error, capacity, not found.
#[derive(Debug)]
pub enum RelayError {
    AuthFailure,
    GateDenied,
    RateLimited,
    CrossAgentViolation,
    InvalidInput(String),
    ApexUnreachable(String),
    /// Upstream apex 4xx/5xx, passed through verbatim with its status code.
    ApexError(StatusCode, String),
    Capacity(String),
    NotFound,
    Internal(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::AuthFailure => StatusCode::UNAUTHORIZED,
            RelayError::GateDenied => StatusCode::FORBIDDEN,
            RelayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RelayError::CrossAgentViolation => StatusCode::FORBIDDEN,
            RelayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RelayError::ApexUnreachable(_) => StatusCode::BAD_GATEWAY,
            RelayError::ApexError(status, _) => *status,
            RelayError::Capacity(_) => StatusCode::CONFLICT,
            RelayError::NotFound => StatusCode::NOT_FOUND,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            RelayError::AuthFailure => "unauthorized".to_string(),
            RelayError::GateDenied => "gate denied".to_string(),
            RelayError::RateLimited => "rate limited".to_string(),
            RelayError::CrossAgentViolation => "cross-agent action denied".to_string(),
            RelayError::InvalidInput(msg) => msg.clone(),
            RelayError::ApexUnreachable(msg) => msg.clone(),
            RelayError::ApexError(_, msg) => msg.clone(),
            RelayError::Capacity(msg) => msg.clone(),
            RelayError::NotFound => "not found".to_string(),
            RelayError::Internal(_) => "internal error".to_string(),
        }
    }
}

/// Maps an apex-client error to the apex-specific dispositions: a real upstream status/body is
/// passed through verbatim as `ApexError`; a transport/decode failure (no upstream response at
/// all) is `ApexUnreachable`.
pub fn apex_error(err: relay_core::Error) -> RelayError {
    match err.as_apex_status() {
        Some((status, body)) => RelayError::ApexError(
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            body.to_string(),
        ),
        None => RelayError::ApexUnreachable(err.to_string()),
    }
}

impl From<relay_core::Error> for RelayError {
    fn from(err: relay_core::Error) -> Self {
        apex_error(err)
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        if let RelayError::Internal(detail) = &self {
            tracing::error!(event = "relay.gateway.internal_error", error = %detail);
        }
        let status = self.status();
        let body = Json(serde_json::json!({ "error": self.message() }));
        (status, body).into_response()
    }
}
