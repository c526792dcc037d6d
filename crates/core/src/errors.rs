use crate::traits::{GatewayError, StoreError};

/// Service-level error taxonomy shared by the preview, confirm, and read
/// paths. The balance cache is the one deliberate exception: it degrades to
/// a tagged [`crate::CacheRead`] instead of surfacing these.
#[derive(Debug, thiserror::Error)]
pub enum TradeError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Account not connected: {0}")]
    AccountNotConnected(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Rate limited on {0}")]
    RateLimited(String),
    #[error("Authentication failed upstream: {0}")]
    AuthFailed(String),
    /// Upstream refused the placement; the detail is preserved verbatim.
    #[error("Order rejected upstream: {0}")]
    Rejected(String),
    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl TradeError {
    /// Stable machine-readable code for logs and API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            TradeError::NotFound(_) => "NOT_FOUND",
            TradeError::AccountNotConnected(_) => "ACCOUNT_NOT_CONNECTED",
            TradeError::Validation(_) => "VALIDATION",
            TradeError::RateLimited(_) => "RATE_LIMITED",
            TradeError::AuthFailed(_) => "AUTH_FAILED",
            TradeError::Rejected(_) => "UPSTREAM_REJECTED",
            TradeError::Upstream(_) => "UPSTREAM_ERROR",
        }
    }
}

impl From<GatewayError> for TradeError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(msg) => TradeError::NotFound(msg),
            GatewayError::AuthFailed(msg) => TradeError::AuthFailed(msg),
            GatewayError::RateLimited { resource } => TradeError::RateLimited(resource),
            GatewayError::Rejected(detail) => TradeError::Rejected(detail),
            GatewayError::Transport(msg) | GatewayError::Upstream(msg) => {
                TradeError::Upstream(msg)
            }
        }
    }
}

impl From<StoreError> for TradeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => TradeError::NotFound(msg),
            StoreError::Database(msg) => TradeError::Upstream(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_error_mapping_preserves_detail() {
        let err: TradeError =
            GatewayError::Rejected("insufficient funds for order".to_string()).into();
        assert_eq!(err.code(), "UPSTREAM_REJECTED");
        assert!(err.to_string().contains("insufficient funds for order"));
    }

    #[test]
    fn test_rate_limited_carries_resource_key() {
        let err: TradeError = GatewayError::RateLimited {
            resource: "balances:acct-1".to_string(),
        }
        .into();
        assert_eq!(err.code(), "RATE_LIMITED");
        assert!(err.to_string().contains("balances:acct-1"));
    }
}
