use chrono::Utc;
use foliolink_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Quote currency every crypto pair is resolved against.
const QUOTE_CURRENCY: &str = "USD";

/// Limit prices deviating from the current price by more than this fraction
/// get a warning.
const DEVIATION_THRESHOLD: Decimal = dec!(0.05);

/// Orders with an estimated total below this get a minimum-size advisory.
const MIN_ORDER_TOTAL: Decimal = dec!(1);

/// A preview request as it arrives from the caller. Time in force is a hint:
/// the crypto branch overrides it with the exchange's execution model.
#[derive(Debug, Clone)]
pub struct OrderPreviewRequest {
    pub account_id: String,
    pub symbol: String,
    pub action: OrderAction,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
}

/// Computes estimated cost, fees, and risk warnings for a not-yet-placed
/// order. The account's stored asset capability selects one of two mutually
/// exclusive branches; they share no resolution or pricing calls.
pub struct OrderPreviewService {
    gateway: Arc<dyn BrokerageGateway>,
    connections: Arc<dyn ConnectionStore>,
}

impl OrderPreviewService {
    pub fn new(gateway: Arc<dyn BrokerageGateway>, connections: Arc<dyn ConnectionStore>) -> Self {
        Self {
            gateway,
            connections,
        }
    }

    pub async fn preview(
        &self,
        request: OrderPreviewRequest,
    ) -> Result<OrderPreviewResult, TradeError> {
        validate(&request)?;

        let account = self
            .connections
            .get(&request.account_id)
            .await?
            .ok_or_else(|| TradeError::AccountNotConnected(request.account_id.clone()))?;

        let result = match account.capability {
            AssetCapability::Crypto => self.preview_crypto(&account, &request).await?,
            AssetCapability::Equities => self.preview_equity(&account, &request).await?,
        };

        info!(
            preview_id = %result.preview_id,
            account = %account.account_id,
            symbol = %result.symbol,
            asset_class = result.instrument.asset_class(),
            can_proceed = result.can_proceed,
            "Order previewed"
        );
        Ok(result)
    }

    async fn preview_crypto(
        &self,
        account: &LinkedAccount,
        request: &OrderPreviewRequest,
    ) -> Result<OrderPreviewResult, TradeError> {
        let creds = &account.credentials;
        let pairs = self
            .gateway
            .search_crypto_pairs(creds, &account.account_id, &request.symbol, QUOTE_CURRENCY)
            .await?;
        let pair = pairs.into_iter().next().ok_or_else(|| {
            TradeError::NotFound(format!(
                "No {}/{} trading pair available on this account",
                request.symbol, QUOTE_CURRENCY
            ))
        })?;

        // Best-effort quote: a failure only lowers price confidence.
        let current_price = match self
            .gateway
            .get_quote(creds, &account.account_id, &pair.symbol)
            .await
        {
            Ok(quote) => quote.best_price().unwrap_or(Decimal::ZERO),
            Err(e) => {
                warn!(pair = %pair.symbol, error = %e, "Quote fetch failed, price unknown");
                Decimal::ZERO
            }
        };

        // The exchange's execution model fixes time in force by order type;
        // the caller's preference does not participate.
        let time_in_force = match request.order_type {
            OrderType::Market => TimeInForce::ImmediateOrCancel,
            OrderType::Limit => TimeInForce::GoodTillCancelled,
        };

        let params = CryptoOrderParams {
            account_id: account.account_id.clone(),
            pair_symbol: pair.symbol.clone(),
            action: request.action,
            order_type: request.order_type,
            quantity: request.quantity,
            limit_price: request.limit_price,
            time_in_force,
        };

        // Best-effort fee preview.
        let estimated_fees = match self.gateway.preview_crypto_order(creds, &params).await {
            Ok(preview) => preview.estimated_fees.unwrap_or(Decimal::ZERO),
            Err(e) => {
                warn!(pair = %pair.symbol, error = %e, "Crypto fee preview failed, assuming zero");
                Decimal::ZERO
            }
        };

        Ok(assemble(
            request,
            InstrumentHandle::Crypto {
                pair_symbol: pair.symbol,
            },
            time_in_force,
            current_price,
            estimated_fees,
            None,
        ))
    }

    async fn preview_equity(
        &self,
        account: &LinkedAccount,
        request: &OrderPreviewRequest,
    ) -> Result<OrderPreviewResult, TradeError> {
        let creds = &account.credentials;
        let matches = self
            .gateway
            .search_symbols(creds, &account.account_id, &request.symbol)
            .await?;

        let hit = matches
            .iter()
            .find(|m| m.symbol.eq_ignore_ascii_case(&request.symbol))
            .or_else(|| matches.first())
            .ok_or_else(|| TradeError::NotFound(format!("Symbol {} not found", request.symbol)))?;

        let universal_symbol_id = hit.universal_symbol_id.clone().ok_or_else(|| {
            TradeError::NotFound(format!(
                "{} may not be tradable on this account",
                request.symbol
            ))
        })?;

        let time_in_force = request.time_in_force.unwrap_or(TimeInForce::Day);
        let params = EquityOrderParams {
            account_id: account.account_id.clone(),
            universal_symbol_id: universal_symbol_id.clone(),
            action: request.action,
            order_type: request.order_type,
            quantity: request.quantity,
            limit_price: request.limit_price,
            time_in_force,
        };

        let impact = self.gateway.get_order_impact(creds, &params).await?;
        let current_price = impact.execution_price.unwrap_or(Decimal::ZERO);
        let estimated_fees = impact.estimated_fees.unwrap_or(Decimal::ZERO);

        Ok(assemble(
            request,
            InstrumentHandle::Equity {
                universal_symbol_id,
            },
            time_in_force,
            current_price,
            estimated_fees,
            Some(&impact),
        ))
    }
}

fn validate(request: &OrderPreviewRequest) -> Result<(), TradeError> {
    if request.quantity <= Decimal::ZERO {
        return Err(TradeError::Validation(
            "Quantity must be positive".to_string(),
        ));
    }
    if request.order_type == OrderType::Limit && request.limit_price.is_none() {
        return Err(TradeError::Validation(
            "Limit orders require a limit price".to_string(),
        ));
    }
    Ok(())
}

/// Shared cost computation and warning rules, identical for both branches.
fn assemble(
    request: &OrderPreviewRequest,
    instrument: InstrumentHandle,
    time_in_force: TimeInForce,
    current_price: Decimal,
    estimated_fees: Decimal,
    impact: Option<&OrderImpact>,
) -> OrderPreviewResult {
    let execution_price = match request.order_type {
        OrderType::Limit => request.limit_price.unwrap_or(current_price),
        OrderType::Market => current_price,
    };
    let estimated_cost = execution_price * request.quantity;
    let estimated_total = match request.action {
        OrderAction::Buy => estimated_cost + estimated_fees,
        OrderAction::Sell => estimated_cost - estimated_fees,
    };

    let mut warnings = Vec::new();
    let mut can_proceed = true;

    // Buying power is the only rule that blocks the order.
    if request.action == OrderAction::Buy {
        if let Some(impact) = impact {
            if let (Some(required), Some(after)) =
                (impact.buying_power_required, impact.buying_power_after)
            {
                if required > after {
                    warnings.push(format!(
                        "Insufficient buying power: order requires {} but only {} is available",
                        required, after
                    ));
                    can_proceed = false;
                }
            }
        }
    }

    if request.order_type == OrderType::Limit {
        if let Some(limit_price) = request.limit_price {
            if current_price > Decimal::ZERO {
                let deviation = ((limit_price - current_price) / current_price).abs();
                if deviation > DEVIATION_THRESHOLD {
                    warnings.push(format!(
                        "Limit price deviates {:.1}% from the current price",
                        deviation * dec!(100)
                    ));
                }
            }
        }
    }

    if estimated_total < MIN_ORDER_TOTAL {
        warnings.push(format!(
            "Order total {} is below the {} minimum most venues accept",
            estimated_total, MIN_ORDER_TOTAL
        ));
    }

    OrderPreviewResult {
        preview_id: Uuid::new_v4(),
        symbol: request.symbol.clone(),
        instrument,
        action: request.action,
        order_type: request.order_type,
        quantity: request.quantity,
        limit_price: request.limit_price,
        time_in_force,
        current_price,
        execution_price,
        estimated_cost,
        estimated_fees,
        estimated_total,
        warnings,
        can_proceed,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use foliolink_data::MemoryConnectionStore;
    use foliolink_gateway::SimulatedGateway;

    fn linked(account_id: &str, capability: AssetCapability) -> LinkedAccount {
        LinkedAccount {
            account_id: account_id.to_string(),
            institution: match capability {
                AssetCapability::Crypto => "Coinbase".to_string(),
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

    async fn service_with(
        gateway: Arc<SimulatedGateway>,
        accounts: Vec<LinkedAccount>,
    ) -> OrderPreviewService {
        let connections = Arc::new(MemoryConnectionStore::new());
        for account in &accounts {
            connections.record_link(account).await.unwrap();
        }
        OrderPreviewService::new(gateway, connections)
    }

    fn aapl_request(order_type: OrderType, limit_price: Option<Decimal>) -> OrderPreviewRequest {
        OrderPreviewRequest {
            account_id: "eq-1".to_string(),
            symbol: "AAPL".to_string(),
            action: OrderAction::Buy,
            order_type,
            quantity: dec!(10),
            limit_price,
            time_in_force: None,
        }
    }

    fn equity_gateway() -> Arc<SimulatedGateway> {
        let gateway = Arc::new(SimulatedGateway::new());
        gateway.set_symbols(vec![SymbolMatch {
            symbol: "AAPL".to_string(),
            description: "Apple Inc".to_string(),
            universal_symbol_id: Some("u-aapl".to_string()),
        }]);
        gateway
    }

    #[tokio::test]
    async fn test_buying_power_warning_blocks_order() {
        let gateway = equity_gateway();
        gateway.set_impact(OrderImpact {
            execution_price: Some(dec!(150)),
            estimated_fees: Some(dec!(1)),
            buying_power_required: Some(dec!(1501)),
            buying_power_after: Some(dec!(1000)),
        });
        let service = service_with(gateway, vec![linked("eq-1", AssetCapability::Equities)]).await;

        let result = service
            .preview(aapl_request(OrderType::Market, None))
            .await
            .unwrap();

        assert_eq!(result.estimated_total, dec!(1501));
        assert!(!result.can_proceed);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("buying power"));
    }

    #[tokio::test]
    async fn test_limit_deviation_warning_quotes_percentage() {
        let gateway = equity_gateway();
        gateway.set_impact(OrderImpact {
            execution_price: Some(dec!(100)),
            estimated_fees: None,
            buying_power_required: None,
            buying_power_after: None,
        });
        let service = service_with(gateway, vec![linked("eq-1", AssetCapability::Equities)]).await;

        let result = service
            .preview(aapl_request(OrderType::Limit, Some(dec!(110))))
            .await
            .unwrap();

        assert!(result.warnings.iter().any(|w| w.contains("10.0%")));
        // Deviation warns but never blocks.
        assert!(result.can_proceed);
        assert_eq!(result.execution_price, dec!(110));
    }

    #[tokio::test]
    async fn test_minimum_size_advisory() {
        let gateway = equity_gateway();
        gateway.set_impact(OrderImpact {
            execution_price: Some(dec!(0.05)),
            ..Default::default()
        });
        let service = service_with(gateway, vec![linked("eq-1", AssetCapability::Equities)]).await;

        let mut request = aapl_request(OrderType::Market, None);
        request.quantity = dec!(1);
        let result = service.preview(request).await.unwrap();

        assert!(result.warnings.iter().any(|w| w.contains("minimum")));
        assert!(result.can_proceed);
    }

    #[tokio::test]
    async fn test_branch_isolation() {
        let gateway = Arc::new(SimulatedGateway::new());
        gateway.set_pairs(vec![CryptoPair {
            symbol: "BTC-USD".to_string(),
            base: "BTC".to_string(),
            quote: "USD".to_string(),
        }]);
        gateway.set_symbols(vec![SymbolMatch {
            symbol: "AAPL".to_string(),
            description: "Apple Inc".to_string(),
            universal_symbol_id: Some("u-aapl".to_string()),
        }]);
        let service = service_with(
            gateway.clone(),
            vec![
                linked("cr-1", AssetCapability::Crypto),
                linked("eq-1", AssetCapability::Equities),
            ],
        )
        .await;

        let crypto_request = OrderPreviewRequest {
            account_id: "cr-1".to_string(),
            symbol: "BTC".to_string(),
            action: OrderAction::Buy,
            order_type: OrderType::Market,
            quantity: dec!(1),
            limit_price: None,
            time_in_force: None,
        };
        service.preview(crypto_request).await.unwrap();
        assert_eq!(gateway.calls("search_symbols"), 0);
        assert_eq!(gateway.calls("search_crypto_pairs"), 1);
        assert_eq!(gateway.calls("get_order_impact"), 0);

        service
            .preview(aapl_request(OrderType::Market, None))
            .await
            .unwrap();
        assert_eq!(gateway.calls("search_crypto_pairs"), 1);
        assert_eq!(gateway.calls("search_symbols"), 1);
        assert_eq!(gateway.calls("get_quote"), 1);
    }

    #[tokio::test]
    async fn test_crypto_time_in_force_is_forced_by_order_type() {
        let gateway = Arc::new(SimulatedGateway::new());
        gateway.set_pairs(vec![CryptoPair {
            symbol: "BTC-USD".to_string(),
            base: "BTC".to_string(),
            quote: "USD".to_string(),
        }]);
        let service = service_with(gateway, vec![linked("cr-1", AssetCapability::Crypto)]).await;

        let mut request = OrderPreviewRequest {
            account_id: "cr-1".to_string(),
            symbol: "BTC".to_string(),
            action: OrderAction::Buy,
            order_type: OrderType::Market,
            quantity: dec!(1),
            limit_price: None,
            // Caller preference must be ignored on both paths.
            time_in_force: Some(TimeInForce::Day),
        };
        let market = service.preview(request.clone()).await.unwrap();
        assert_eq!(market.time_in_force, TimeInForce::ImmediateOrCancel);

        request.order_type = OrderType::Limit;
        request.limit_price = Some(dec!(50000));
        let limit = service.preview(request).await.unwrap();
        assert_eq!(limit.time_in_force, TimeInForce::GoodTillCancelled);
    }

    #[tokio::test]
    async fn test_crypto_quote_and_fee_failures_are_non_fatal() {
        let gateway = Arc::new(SimulatedGateway::new());
        gateway.set_pairs(vec![CryptoPair {
            symbol: "BTC-USD".to_string(),
            base: "BTC".to_string(),
            quote: "USD".to_string(),
        }]);
        gateway.fail_op("get_quote", "quote service down");
        gateway.fail_op("preview_crypto_order", "fee service down");
        let service = service_with(gateway, vec![linked("cr-1", AssetCapability::Crypto)]).await;

        let result = service
            .preview(OrderPreviewRequest {
                account_id: "cr-1".to_string(),
                symbol: "BTC".to_string(),
                action: OrderAction::Buy,
                order_type: OrderType::Market,
                quantity: dec!(2),
                limit_price: None,
                time_in_force: None,
            })
            .await
            .unwrap();

        assert_eq!(result.current_price, Decimal::ZERO);
        assert_eq!(result.estimated_fees, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unknown_pair_fails_not_found() {
        let gateway = Arc::new(SimulatedGateway::new());
        let service = service_with(gateway, vec![linked("cr-1", AssetCapability::Crypto)]).await;

        let err = service
            .preview(OrderPreviewRequest {
                account_id: "cr-1".to_string(),
                symbol: "DOGE".to_string(),
                action: OrderAction::Buy,
                order_type: OrderType::Market,
                quantity: dec!(1),
                limit_price: None,
                time_in_force: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_symbol_without_universal_id_fails_as_untradable() {
        let gateway = Arc::new(SimulatedGateway::new());
        gateway.set_symbols(vec![SymbolMatch {
            symbol: "AAPL".to_string(),
            description: "Apple Inc".to_string(),
            universal_symbol_id: None,
        }]);
        let service = service_with(gateway, vec![linked("eq-1", AssetCapability::Equities)]).await;

        let err = service
            .preview(aapl_request(OrderType::Market, None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
        assert!(err.to_string().contains("may not be tradable"));
    }

    #[tokio::test]
    async fn test_unlinked_account_fails() {
        let gateway = Arc::new(SimulatedGateway::new());
        let service = service_with(gateway, vec![]).await;

        let err = service
            .preview(aapl_request(OrderType::Market, None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ACCOUNT_NOT_CONNECTED");
    }

    #[tokio::test]
    async fn test_validation_rejects_bad_requests() {
        let gateway = equity_gateway();
        let service = service_with(gateway, vec![linked("eq-1", AssetCapability::Equities)]).await;

        let mut request = aapl_request(OrderType::Market, None);
        request.quantity = Decimal::ZERO;
        assert_eq!(
            service.preview(request).await.unwrap_err().code(),
            "VALIDATION"
        );

        let request = aapl_request(OrderType::Limit, None);
        assert_eq!(
            service.preview(request).await.unwrap_err().code(),
            "VALIDATION"
        );
    }

    #[tokio::test]
    async fn test_sell_subtracts_fees_from_total() {
        let gateway = equity_gateway();
        gateway.set_impact(OrderImpact {
            execution_price: Some(dec!(100)),
            estimated_fees: Some(dec!(2)),
            ..Default::default()
        });
        let service = service_with(gateway, vec![linked("eq-1", AssetCapability::Equities)]).await;

        let mut request = aapl_request(OrderType::Market, None);
        request.action = OrderAction::Sell;
        let result = service.preview(request).await.unwrap();

        assert_eq!(result.estimated_cost, dec!(1000));
        assert_eq!(result.estimated_total, dec!(998));
    }
}
