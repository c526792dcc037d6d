use chrono::Utc;
use foliolink_balances::BalanceSnapshotCache;
use foliolink_core::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Configuration for the confirm step.
#[derive(Debug, Clone)]
pub struct ConfirmConfig {
    /// How long a preview stays usable before a confirm is refused.
    pub preview_ttl_secs: i64,
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self {
            preview_ttl_secs: 60,
        }
    }
}

/// A confirm request: the previously computed preview plus optional final
/// adjustments from the caller.
#[derive(Debug, Clone)]
pub struct OrderConfirmRequest {
    pub account_id: String,
    pub preview: OrderPreviewResult,
    pub final_quantity: Option<Decimal>,
    pub final_limit_price: Option<Decimal>,
}

/// Places a previously previewed order.
///
/// The placement branch comes from the preview's instrument handle, never
/// re-derived; the crypto path reuses the time in force forced at preview
/// time. No retries happen here: the idempotency key protects only the
/// gateway's own internal retries.
pub struct OrderConfirmService {
    gateway: Arc<dyn BrokerageGateway>,
    connections: Arc<dyn ConnectionStore>,
    cache: Arc<BalanceSnapshotCache>,
    config: ConfirmConfig,
}

impl OrderConfirmService {
    pub fn new(
        gateway: Arc<dyn BrokerageGateway>,
        connections: Arc<dyn ConnectionStore>,
        cache: Arc<BalanceSnapshotCache>,
        config: ConfirmConfig,
    ) -> Self {
        Self {
            gateway,
            connections,
            cache,
            config,
        }
    }

    pub async fn confirm(
        &self,
        request: OrderConfirmRequest,
    ) -> Result<OrderConfirmation, TradeError> {
        let account = self
            .connections
            .get(&request.account_id)
            .await?
            .ok_or_else(|| TradeError::AccountNotConnected(request.account_id.clone()))?;

        let preview = &request.preview;
        let age = Utc::now() - preview.created_at;
        if age.num_seconds() > self.config.preview_ttl_secs {
            return Err(TradeError::Validation(format!(
                "Preview {} expired after {}s, request a new preview",
                preview.preview_id, self.config.preview_ttl_secs
            )));
        }

        let quantity = request.final_quantity.unwrap_or(preview.quantity);
        if quantity <= Decimal::ZERO {
            return Err(TradeError::Validation(
                "Quantity must be positive".to_string(),
            ));
        }
        let limit_price = request.final_limit_price.or(preview.limit_price);

        let creds = &account.credentials;
        let (placed, idempotency_key) = match &preview.instrument {
            InstrumentHandle::Equity {
                universal_symbol_id,
            } => {
                // Fresh token per confirm call; the gateway deduplicates its
                // own retries against it.
                let key = Uuid::new_v4().to_string();
                let params = EquityOrderParams {
                    account_id: account.account_id.clone(),
                    universal_symbol_id: universal_symbol_id.clone(),
                    action: preview.action,
                    order_type: preview.order_type,
                    quantity,
                    limit_price,
                    time_in_force: preview.time_in_force,
                };
                let placed = self.gateway.place_order(creds, &params, &key).await?;
                (placed, Some(key))
            }
            InstrumentHandle::Crypto { pair_symbol } => {
                let params = CryptoOrderParams {
                    account_id: account.account_id.clone(),
                    pair_symbol: pair_symbol.clone(),
                    action: preview.action,
                    order_type: preview.order_type,
                    quantity,
                    limit_price,
                    time_in_force: preview.time_in_force,
                };
                let placed = self.gateway.place_crypto_order(creds, &params).await?;
                (placed, None)
            }
        };

        let status = normalize_status(&placed.status);
        let confirmation = OrderConfirmation {
            order_id: placed.order_id,
            status,
            placed_at: Utc::now(),
            idempotency_key,
        };

        info!(
            preview_id = %preview.preview_id,
            order_id = %confirmation.order_id,
            account = %account.account_id,
            status = ?confirmation.status,
            "Order placed"
        );

        self.spawn_post_placement_refresh(&account);
        Ok(confirmation)
    }

    /// Best-effort refresh after placement: drop the cached balance row and
    /// re-touch positions. Failures are swallowed; a successful placement is
    /// never reported as failed because of this.
    fn spawn_post_placement_refresh(&self, account: &LinkedAccount) {
        let gateway = self.gateway.clone();
        let cache = self.cache.clone();
        let account = account.clone();
        tokio::spawn(async move {
            if let Err(e) = cache.invalidate(&account.account_id).await {
                warn!(account = %account.account_id, error = %e, "Post-placement invalidation failed");
            }
            if let Err(e) = gateway
                .get_positions(&account.credentials, &account.account_id)
                .await
            {
                warn!(account = %account.account_id, error = %e, "Post-placement position refresh failed");
            }
        });
    }
}

/// Collapse whatever status vocabulary the upstream uses into the fixed set
/// the rest of the system depends on. Unrecognized wording is treated as
/// submitted: the order was accepted, its final state is the gateway's.
pub fn normalize_status(raw: &str) -> OrderStatus {
    match raw.to_lowercase().as_str() {
        "filled" | "executed" | "done" | "complete" | "completed" => OrderStatus::Filled,
        "partial_filled" | "partially_filled" | "partial_fill" | "partial" => {
            OrderStatus::PartialFilled
        }
        "rejected" | "reject" | "denied" | "failed" => OrderStatus::Rejected,
        "replaced" | "amended" => OrderStatus::Replaced,
        "submitted" | "accepted" | "new" | "open" | "pending" | "queued" | "working" => {
            OrderStatus::Submitted
        }
        _ => OrderStatus::Submitted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use foliolink_balances::CacheConfig;
    use foliolink_data::{MemoryBalanceStore, MemoryConnectionStore};
    use foliolink_gateway::SimulatedGateway;
    use rust_decimal_macros::dec;

    fn linked(account_id: &str, capability: AssetCapability) -> LinkedAccount {
        LinkedAccount {
            account_id: account_id.to_string(),
            institution: match capability {
                AssetCapability::Crypto => "Kraken".to_string(),
                AssetCapability::Equities => "Questrade".to_string(),
            },
            capability,
            currency: "USD".to_string(),
            credentials: GatewayCredentials {
                credential_id: Uuid::new_v4(),
                user_id: "u1".to_string(),
                user_secret: "s1".to_string(),
            },
            linked_at: Utc::now(),
        }
    }

    fn equity_preview() -> OrderPreviewResult {
        OrderPreviewResult {
            preview_id: Uuid::new_v4(),
            symbol: "AAPL".to_string(),
            instrument: InstrumentHandle::Equity {
                universal_symbol_id: "u-aapl".to_string(),
            },
            action: OrderAction::Buy,
            order_type: OrderType::Market,
            quantity: dec!(10),
            limit_price: None,
            time_in_force: TimeInForce::Day,
            current_price: dec!(150),
            execution_price: dec!(150),
            estimated_cost: dec!(1500),
            estimated_fees: dec!(1),
            estimated_total: dec!(1501),
            warnings: vec![],
            can_proceed: true,
            created_at: Utc::now(),
        }
    }

    fn crypto_preview() -> OrderPreviewResult {
        OrderPreviewResult {
            instrument: InstrumentHandle::Crypto {
                pair_symbol: "BTC-USD".to_string(),
            },
            symbol: "BTC".to_string(),
            time_in_force: TimeInForce::ImmediateOrCancel,
            ..equity_preview()
        }
    }

    async fn service_with(
        gateway: Arc<SimulatedGateway>,
        accounts: Vec<LinkedAccount>,
    ) -> OrderConfirmService {
        let connections = Arc::new(MemoryConnectionStore::new());
        for account in &accounts {
            connections.record_link(account).await.unwrap();
        }
        let cache = Arc::new(BalanceSnapshotCache::new(
            gateway.clone(),
            Arc::new(MemoryBalanceStore::new()),
            CacheConfig::default(),
        ));
        OrderConfirmService::new(gateway, connections, cache, ConfirmConfig::default())
    }

    fn request(account_id: &str, preview: OrderPreviewResult) -> OrderConfirmRequest {
        OrderConfirmRequest {
            account_id: account_id.to_string(),
            preview,
            final_quantity: None,
            final_limit_price: None,
        }
    }

    #[tokio::test]
    async fn test_two_confirms_use_distinct_idempotency_keys() {
        let gateway = Arc::new(SimulatedGateway::new());
        let service =
            service_with(gateway.clone(), vec![linked("eq-1", AssetCapability::Equities)]).await;

        let first = service
            .confirm(request("eq-1", equity_preview()))
            .await
            .unwrap();
        let second = service
            .confirm(request("eq-1", equity_preview()))
            .await
            .unwrap();

        let keys = gateway.idempotency_keys();
        assert_eq!(keys.len(), 2);
        assert_ne!(keys[0], keys[1]);
        assert_eq!(first.idempotency_key.as_deref(), Some(keys[0].as_str()));
        assert_eq!(second.idempotency_key.as_deref(), Some(keys[1].as_str()));
    }

    #[tokio::test]
    async fn test_crypto_confirm_uses_forced_time_in_force() {
        let gateway = Arc::new(SimulatedGateway::new());
        let service =
            service_with(gateway.clone(), vec![linked("cr-1", AssetCapability::Crypto)]).await;

        let confirmation = service
            .confirm(request("cr-1", crypto_preview()))
            .await
            .unwrap();

        assert!(confirmation.idempotency_key.is_none());
        let placed = gateway.placed_crypto();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].time_in_force, TimeInForce::ImmediateOrCancel);
        assert_eq!(placed[0].pair_symbol, "BTC-USD");
        // No equity placement happened.
        assert_eq!(gateway.calls("place_order"), 0);
    }

    #[tokio::test]
    async fn test_rejection_preserves_upstream_detail() {
        let gateway = Arc::new(SimulatedGateway::new());
        gateway.fail_op("place_order", "insufficient settled funds");
        let service =
            service_with(gateway, vec![linked("eq-1", AssetCapability::Equities)]).await;

        let err = service
            .confirm(request("eq-1", equity_preview()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UPSTREAM_REJECTED");
        assert!(err.to_string().contains("insufficient settled funds"));
    }

    #[tokio::test]
    async fn test_expired_preview_is_refused() {
        let gateway = Arc::new(SimulatedGateway::new());
        let service =
            service_with(gateway.clone(), vec![linked("eq-1", AssetCapability::Equities)]).await;

        let mut preview = equity_preview();
        preview.created_at = Utc::now() - Duration::seconds(120);
        let err = service
            .confirm(request("eq-1", preview))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "VALIDATION");
        assert_eq!(gateway.calls("place_order"), 0);
    }

    #[tokio::test]
    async fn test_final_adjustments_override_preview_values() {
        let gateway = Arc::new(SimulatedGateway::new());
        let service =
            service_with(gateway.clone(), vec![linked("eq-1", AssetCapability::Equities)]).await;

        let mut req = request("eq-1", equity_preview());
        req.final_quantity = Some(dec!(5));
        service.confirm(req).await.unwrap();

        assert_eq!(gateway.placed_equity()[0].quantity, dec!(5));
    }

    #[tokio::test]
    async fn test_status_is_normalized() {
        let gateway = Arc::new(SimulatedGateway::new());
        gateway.set_place_status("EXECUTED");
        let service =
            service_with(gateway, vec![linked("eq-1", AssetCapability::Equities)]).await;

        let confirmation = service
            .confirm(request("eq-1", equity_preview()))
            .await
            .unwrap();
        assert_eq!(confirmation.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_post_placement_refresh_failure_is_swallowed() {
        let gateway = Arc::new(SimulatedGateway::new());
        gateway.fail_op("get_positions", "positions endpoint down");
        let service =
            service_with(gateway, vec![linked("eq-1", AssetCapability::Equities)]).await;

        let confirmation = service
            .confirm(request("eq-1", equity_preview()))
            .await
            .unwrap();
        assert_eq!(confirmation.status, OrderStatus::Submitted);
    }

    #[test]
    fn test_normalize_status_vocabulary() {
        assert_eq!(normalize_status("FILLED"), OrderStatus::Filled);
        assert_eq!(normalize_status("executed"), OrderStatus::Filled);
        assert_eq!(normalize_status("partially_filled"), OrderStatus::PartialFilled);
        assert_eq!(normalize_status("partial_fill"), OrderStatus::PartialFilled);
        assert_eq!(normalize_status("REJECTED"), OrderStatus::Rejected);
        assert_eq!(normalize_status("denied"), OrderStatus::Rejected);
        assert_eq!(normalize_status("replaced"), OrderStatus::Replaced);
        assert_eq!(normalize_status("new"), OrderStatus::Submitted);
        assert_eq!(normalize_status("open"), OrderStatus::Submitted);
        assert_eq!(normalize_status("something-novel"), OrderStatus::Submitted);
    }
}
