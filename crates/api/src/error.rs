use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use foliolink_core::TradeError;
use uuid::Uuid;

/// A service error plus the correlation id of the request that hit it.
#[derive(Debug)]
pub struct ApiError {
    pub error: TradeError,
    pub correlation_id: Uuid,
}

impl ApiError {
    pub fn new(error: TradeError, correlation_id: Uuid) -> Self {
        Self {
            error,
            correlation_id,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.error {
            TradeError::NotFound(_) | TradeError::AccountNotConnected(_) => StatusCode::NOT_FOUND,
            TradeError::Validation(_) => StatusCode::BAD_REQUEST,
            TradeError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            TradeError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            TradeError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TradeError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        tracing::warn!(
            correlation_id = %self.correlation_id,
            code = self.error.code(),
            error = %self.error,
            "Request failed"
        );
        (
            status,
            Json(serde_json::json!({
                "error": self.error.to_string(),
                "code": self.error.code(),
                "correlation_id": self.correlation_id,
            })),
        )
            .into_response()
    }
}
