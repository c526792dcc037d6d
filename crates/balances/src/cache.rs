use crate::extract::extract_balances;
use chrono::{Duration, Utc};
use foliolink_core::{
    BalanceSnapshot, BalanceStore, BrokerageGateway, CacheRead, LinkedAccount, StoreError,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Configuration for the balance snapshot cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a snapshot row stays fresh.
    pub ttl_secs: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 10 }
    }
}

type FlightKey = (Uuid, String);
type FlightResult = Option<BalanceSnapshot>;

/// Short-TTL per-account balance cache.
///
/// Concurrent misses for the same `(credential, account)` key are coalesced
/// into a single upstream fetch through an in-flight map of broadcast
/// channels. The map is per-process only: horizontally scaled instances each
/// keep their own, so cross-instance deduplication needs a distributed lease
/// this layer does not provide.
pub struct BalanceSnapshotCache {
    gateway: Arc<dyn BrokerageGateway>,
    store: Arc<dyn BalanceStore>,
    config: CacheConfig,
    in_flight: Mutex<HashMap<FlightKey, broadcast::Sender<FlightResult>>>,
}

impl BalanceSnapshotCache {
    pub fn new(
        gateway: Arc<dyn BrokerageGateway>,
        store: Arc<dyn BalanceStore>,
        config: CacheConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Read the snapshot for an account, fetching from upstream only when the
    /// persisted row is missing or older than the TTL.
    ///
    /// Never returns an error: upstream failure degrades to [`CacheRead::Stale`]
    /// when an older row exists, else [`CacheRead::Unavailable`].
    pub async fn get_snapshot(&self, account: &LinkedAccount) -> CacheRead {
        let threshold = Utc::now() - Duration::seconds(self.config.ttl_secs);
        match self.store.select_fresh(&account.account_id, threshold).await {
            Ok(Some(row)) => return CacheRead::Fresh(row),
            Ok(None) => {}
            Err(e) => {
                warn!(account = %account.account_id, error = %e, "Snapshot read failed, fetching upstream");
            }
        }

        let key = (
            account.credentials.credential_id,
            account.account_id.clone(),
        );
        let fetched = self.fetch_coalesced(key, account).await;

        match fetched {
            Some(snapshot) => CacheRead::Fresh(snapshot),
            None => match self.store.select_row(&account.account_id).await {
                Ok(Some(stale)) => CacheRead::Stale(stale),
                _ => CacheRead::Unavailable,
            },
        }
    }

    /// Delete the persisted row so the next read bypasses the TTL.
    pub async fn invalidate(&self, account_id: &str) -> Result<(), StoreError> {
        self.store.delete(account_id).await
    }

    /// Join an in-flight fetch for the key, or start one. Exactly one
    /// upstream call runs per key at a time within this process.
    async fn fetch_coalesced(&self, key: FlightKey, account: &LinkedAccount) -> FlightResult {
        let mut flights = self.in_flight.lock().await;
        if let Some(tx) = flights.get(&key) {
            // Subscribe while holding the lock: the initiator cannot publish
            // until it reacquires it to remove the entry.
            let mut rx = tx.subscribe();
            drop(flights);
            debug!(account = %account.account_id, "Joining in-flight balance fetch");
            return rx.recv().await.unwrap_or(None);
        }

        let (tx, _keepalive) = broadcast::channel(1);
        flights.insert(key.clone(), tx.clone());
        drop(flights);

        let result = self.fetch_and_store(account).await;

        // Remove the entry before publishing so later callers start a fresh
        // fetch instead of replaying this one.
        self.in_flight.lock().await.remove(&key);
        let _ = tx.send(result.clone());
        result
    }

    /// One full upstream fetch: balances, fallback position sum, upsert.
    /// Any upstream error is logged and collapsed to `None`.
    async fn fetch_and_store(&self, account: &LinkedAccount) -> FlightResult {
        let creds = &account.credentials;
        let payload = match self.gateway.get_balances(creds, &account.account_id).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(account = %account.account_id, error = %e, "Balance fetch failed");
                return None;
            }
        };

        let extracted = extract_balances(&payload);
        let mut total_equity = extracted.total_equity;

        // Some upstream accounts omit a usable top-level balance but do
        // expose positions; recompute equity from them in that case.
        if total_equity.map_or(true, |v| v.is_zero()) {
            match self.gateway.get_positions(creds, &account.account_id).await {
                Ok(positions) => {
                    let mut sum = Decimal::ZERO;
                    for position in &positions {
                        if let Some(price) = position.price {
                            sum += position.quantity * price;
                        }
                    }
                    if let Some(cash) = extracted.cash {
                        sum += cash;
                    }
                    total_equity = Some(sum);
                }
                Err(e) => {
                    warn!(account = %account.account_id, error = %e, "Position fallback failed");
                    return None;
                }
            }
        }

        let snapshot = BalanceSnapshot {
            account_id: account.account_id.clone(),
            cash: extracted.cash,
            total_equity,
            buying_power: extracted.buying_power,
            currency: extracted.currency.unwrap_or_else(|| account.currency.clone()),
            last_updated: Utc::now(),
        };

        if let Err(e) = self.store.upsert(&snapshot).await {
            // The fetched data is still valid for this caller; the next read
            // just will not find a fresh row.
            warn!(account = %account.account_id, error = %e, "Snapshot upsert failed");
        }

        Some(snapshot)
    }
}
