use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Brokerage Gateway Trait
// ---------------------------------------------------------------------------

/// Errors that can occur talking to the aggregation gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Authentication failed: {0}")]
    AuthFailed(String),
    #[error("Rate limited on {resource}")]
    RateLimited { resource: String },
    #[error("Rejected upstream: {0}")]
    Rejected(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Upstream error: {0}")]
    Upstream(String),
}

/// The single dependency that talks to upstream brokerage and crypto-exchange
/// APIs. Every network suspension point in the trading core goes through here.
#[async_trait]
pub trait BrokerageGateway: Send + Sync {
    /// List the accounts reachable with the given credentials.
    async fn list_accounts(
        &self,
        creds: &GatewayCredentials,
    ) -> Result<Vec<UpstreamAccount>, GatewayError>;

    /// Fetch the raw balance payload for an account.
    ///
    /// Returned as untyped JSON: upstream brokerages expose different shapes
    /// for the same concept, extraction happens on the caller's side.
    async fn get_balances(
        &self,
        creds: &GatewayCredentials,
        account_id: &str,
    ) -> Result<serde_json::Value, GatewayError>;

    /// Fetch all positions held in an account.
    async fn get_positions(
        &self,
        creds: &GatewayCredentials,
        account_id: &str,
    ) -> Result<Vec<UpstreamPosition>, GatewayError>;

    /// Search tradable equity instruments visible to an account.
    async fn search_symbols(
        &self,
        creds: &GatewayCredentials,
        account_id: &str,
        query: &str,
    ) -> Result<Vec<SymbolMatch>, GatewayError>;

    /// Search crypto trading pairs by base and quote currency.
    async fn search_crypto_pairs(
        &self,
        creds: &GatewayCredentials,
        account_id: &str,
        base: &str,
        quote: &str,
    ) -> Result<Vec<CryptoPair>, GatewayError>;

    /// Best-effort quote for a crypto pair.
    async fn get_quote(
        &self,
        creds: &GatewayCredentials,
        account_id: &str,
        pair_symbol: &str,
    ) -> Result<PairQuote, GatewayError>;

    /// Upstream impact computation for an equity order.
    async fn get_order_impact(
        &self,
        creds: &GatewayCredentials,
        params: &EquityOrderParams,
    ) -> Result<OrderImpact, GatewayError>;

    /// Upstream fee preview for a crypto order.
    async fn preview_crypto_order(
        &self,
        creds: &GatewayCredentials,
        params: &CryptoOrderParams,
    ) -> Result<CryptoOrderPreview, GatewayError>;

    /// Place an equity order. The gateway honors the idempotency key for its
    /// own internal retries; this layer never retries placement itself.
    async fn place_order(
        &self,
        creds: &GatewayCredentials,
        params: &EquityOrderParams,
        idempotency_key: &str,
    ) -> Result<PlacedOrder, GatewayError>;

    /// Place a crypto order through the exchange-specific placement path.
    async fn place_crypto_order(
        &self,
        creds: &GatewayCredentials,
        params: &CryptoOrderParams,
    ) -> Result<PlacedOrder, GatewayError>;
}

// ---------------------------------------------------------------------------
// Persistence Traits
// ---------------------------------------------------------------------------

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Row not found: {0}")]
    NotFound(String),
    #[error("Database error: {0}")]
    Database(String),
}

/// Persisted balance-snapshot rows. Owned exclusively by the balance cache;
/// no other component writes them.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Read the row for an account regardless of age.
    async fn select_row(&self, account_id: &str) -> Result<Option<BalanceSnapshot>, StoreError>;

    /// Read the row only if `last_updated` is at or after the threshold.
    async fn select_fresh(
        &self,
        account_id: &str,
        threshold: DateTime<Utc>,
    ) -> Result<Option<BalanceSnapshot>, StoreError>;

    /// Insert the row if absent, else overwrite all fields.
    async fn upsert(&self, snapshot: &BalanceSnapshot) -> Result<(), StoreError>;

    /// Delete the row so the next read bypasses the TTL.
    async fn delete(&self, account_id: &str) -> Result<(), StoreError>;
}

/// Registry of linked accounts and their gateway credentials.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Look up a linked account; `None` means the account was never connected
    /// or its connection was removed.
    async fn get(&self, account_id: &str) -> Result<Option<LinkedAccount>, StoreError>;

    /// Record a new link. The asset capability is resolved by the caller
    /// before this point and stored as-is.
    async fn record_link(&self, account: &LinkedAccount) -> Result<(), StoreError>;

    /// List all linked accounts.
    async fn list(&self) -> Result<Vec<LinkedAccount>, StoreError>;
}
