use foliolink_balances::{BalanceSnapshotCache, CacheConfig};
use foliolink_core::{BalanceStore, BrokerageGateway, ConnectionStore};
use foliolink_orders::{ConfirmConfig, OrderConfirmService, OrderPreviewService};
use std::sync::Arc;

/// Shared application state accessible by all route handlers.
pub struct AppState {
    pub connections: Arc<dyn ConnectionStore>,
    pub balances: Arc<BalanceSnapshotCache>,
    pub preview: OrderPreviewService,
    pub confirm: OrderConfirmService,
}

impl AppState {
    pub fn new(
        gateway: Arc<dyn BrokerageGateway>,
        connections: Arc<dyn ConnectionStore>,
        balance_store: Arc<dyn BalanceStore>,
        cache_config: CacheConfig,
        confirm_config: ConfirmConfig,
    ) -> Self {
        let balances = Arc::new(BalanceSnapshotCache::new(
            gateway.clone(),
            balance_store,
            cache_config,
        ));
        let preview = OrderPreviewService::new(gateway.clone(), connections.clone());
        let confirm = OrderConfirmService::new(
            gateway,
            connections.clone(),
            balances.clone(),
            confirm_config,
        );
        Self {
            connections,
            balances,
            preview,
            confirm,
        }
    }
}
