use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Linked accounts & credentials
// ---------------------------------------------------------------------------

/// What kind of instruments a linked account can trade.
///
/// Resolved once when the account is linked and stored alongside it, so the
/// order path never has to re-derive it from institution names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetCapability {
    Equities,
    Crypto,
}

impl AssetCapability {
    /// Classify an institution by name. Only used at link time; the result is
    /// persisted on the [`LinkedAccount`].
    pub fn from_institution(name: &str) -> Self {
        const CRYPTO_EXCHANGES: &[&str] = &[
            "coinbase", "binance", "kraken", "gemini", "crypto.com", "bitstamp", "okx", "bitfinex",
        ];
        let lower = name.to_lowercase();
        if CRYPTO_EXCHANGES.iter().any(|ex| lower.contains(ex)) {
            AssetCapability::Crypto
        } else {
            AssetCapability::Equities
        }
    }
}

/// Credentials for talking to the aggregation gateway on behalf of one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayCredentials {
    pub credential_id: Uuid,
    pub user_id: String,
    pub user_secret: String,
}

/// A brokerage or exchange account the user has linked through the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedAccount {
    pub account_id: String,
    /// Institution display name as reported by the gateway (e.g. "Questrade").
    pub institution: String,
    pub capability: AssetCapability,
    pub currency: String,
    pub credentials: GatewayCredentials,
    pub linked_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Balance snapshots
// ---------------------------------------------------------------------------

/// Cached per-account balance snapshot.
///
/// All three amounts are optional: upstream brokerages disagree on which of
/// them they report. `last_updated` is monotonically non-decreasing per
/// account; freshness is decided against it, rows are never purged by age.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub account_id: String,
    pub cash: Option<Decimal>,
    pub total_equity: Option<Decimal>,
    pub buying_power: Option<Decimal>,
    pub currency: String,
    pub last_updated: DateTime<Utc>,
}

/// Result of a cache read, tagged so each caller can pick its own degradation
/// policy instead of collapsing "miss" and "upstream down" into one value.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheRead {
    /// Row was within TTL, or was just fetched.
    Fresh(BalanceSnapshot),
    /// Upstream fetch failed but an older row exists.
    Stale(BalanceSnapshot),
    /// No row and no reachable upstream.
    Unavailable,
}

impl CacheRead {
    pub fn snapshot(&self) -> Option<&BalanceSnapshot> {
        match self {
            CacheRead::Fresh(s) | CacheRead::Stale(s) => Some(s),
            CacheRead::Unavailable => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction {
    Buy,
    Sell,
}

/// The type of order. Only market and limit orders are supported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

/// Time in force for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    Day,
    GoodTillCancelled,
    ImmediateOrCancel,
    FillOrKill,
}

/// Normalized placement status. This fixed vocabulary is the contract the
/// rest of the system depends on, whatever wording the upstream uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Submitted,
    Filled,
    PartialFilled,
    Rejected,
    Replaced,
}

/// The resolved, upstream-specific handle identifying a tradable instrument.
///
/// Resolved during preview and carried through to confirm unchanged; the two
/// variants correspond to the two structurally different placement paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "asset_class", rename_all = "snake_case")]
pub enum InstrumentHandle {
    Equity { universal_symbol_id: String },
    Crypto { pair_symbol: String },
}

impl InstrumentHandle {
    pub fn asset_class(&self) -> &'static str {
        match self {
            InstrumentHandle::Equity { .. } => "equity",
            InstrumentHandle::Crypto { .. } => "crypto",
        }
    }
}

/// Everything a preview call computes for the user to approve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPreviewResult {
    /// Opaque correlation id, locally unique per process.
    pub preview_id: Uuid,
    pub symbol: String,
    #[serde(flatten)]
    pub instrument: InstrumentHandle,
    pub action: OrderAction,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub current_price: Decimal,
    pub execution_price: Decimal,
    pub estimated_cost: Decimal,
    pub estimated_fees: Decimal,
    pub estimated_total: Decimal,
    pub warnings: Vec<String>,
    pub can_proceed: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of placing a previewed order. Immutable once created; post-placement
/// status changes are the gateway's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order_id: String,
    pub status: OrderStatus,
    pub placed_at: DateTime<Utc>,
    /// Set for equity placements only.
    pub idempotency_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Gateway DTOs
// ---------------------------------------------------------------------------

/// An account as listed by the aggregation gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamAccount {
    pub id: String,
    pub name: String,
    pub institution: String,
    pub currency: Option<String>,
}

/// A single position held in an upstream account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamPosition {
    pub symbol: String,
    pub quantity: Decimal,
    /// Last known unit price; some brokerages omit it for stale holdings.
    pub price: Option<Decimal>,
}

/// One hit from an equity symbol search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolMatch {
    pub symbol: String,
    pub description: String,
    /// Gateway-wide instrument id; absent when the instrument is not tradable
    /// on the queried account.
    pub universal_symbol_id: Option<String>,
}

/// A crypto trading pair (e.g. BTC-USD).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoPair {
    pub symbol: String,
    pub base: String,
    pub quote: String,
}

/// Best-effort quote for a crypto pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairQuote {
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub last: Option<Decimal>,
}

impl PairQuote {
    /// Best available price: last trade, then ask, then bid.
    pub fn best_price(&self) -> Option<Decimal> {
        self.last.or(self.ask).or(self.bid)
    }
}

/// Upstream-computed impact of a not-yet-placed equity order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderImpact {
    pub execution_price: Option<Decimal>,
    pub estimated_fees: Option<Decimal>,
    pub buying_power_required: Option<Decimal>,
    pub buying_power_after: Option<Decimal>,
}

/// Upstream-computed fee preview for a crypto order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CryptoOrderPreview {
    pub estimated_fees: Option<Decimal>,
}

/// Raw placement acknowledgement from the gateway, status not yet normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order_id: String,
    pub status: String,
}

/// Parameters for placing or sizing an equity order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityOrderParams {
    pub account_id: String,
    pub universal_symbol_id: String,
    pub action: OrderAction,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
}

/// Parameters for placing or sizing a crypto order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoOrderParams {
    pub account_id: String,
    pub pair_symbol: String,
    pub action: OrderAction,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
}
