use async_trait::async_trait;
use foliolink_core::*;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// A scripted in-memory gateway for tests and local demo runs.
///
/// Responses are configured up front; every operation records a call count so
/// callers can assert exactly how often the upstream was hit.
pub struct SimulatedGateway {
    state: Mutex<SimState>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

#[derive(Default)]
struct SimState {
    accounts: Vec<UpstreamAccount>,
    balances: serde_json::Value,
    positions: Vec<UpstreamPosition>,
    symbols: Vec<SymbolMatch>,
    pairs: Vec<CryptoPair>,
    quote: PairQuote,
    impact: OrderImpact,
    crypto_preview: CryptoOrderPreview,
    place_status: String,
    /// Operation name → failure detail. Present ⇒ that operation errors.
    failures: HashMap<&'static str, String>,
    /// Artificial latency on balance fetches, for concurrency tests.
    balance_delay: Option<Duration>,
    idempotency_keys: Vec<String>,
    placed_equity: Vec<EquityOrderParams>,
    placed_crypto: Vec<CryptoOrderParams>,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        let state = SimState {
            place_status: "submitted".to_string(),
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn record(&self, op: &'static str) {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        *calls.entry(op).or_insert(0) += 1;
    }

    /// How many times an operation was invoked.
    pub fn calls(&self, op: &str) -> usize {
        let calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.get(op).copied().unwrap_or(0)
    }

    fn failure(&self, op: &'static str) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.failures.get(op).cloned()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    // -- scripting ---------------------------------------------------------

    pub fn set_accounts(&self, accounts: Vec<UpstreamAccount>) {
        self.with_state(|s| s.accounts = accounts);
    }

    pub fn set_balances(&self, balances: serde_json::Value) {
        self.with_state(|s| s.balances = balances);
    }

    pub fn set_positions(&self, positions: Vec<UpstreamPosition>) {
        self.with_state(|s| s.positions = positions);
    }

    pub fn set_symbols(&self, symbols: Vec<SymbolMatch>) {
        self.with_state(|s| s.symbols = symbols);
    }

    pub fn set_pairs(&self, pairs: Vec<CryptoPair>) {
        self.with_state(|s| s.pairs = pairs);
    }

    pub fn set_quote(&self, quote: PairQuote) {
        self.with_state(|s| s.quote = quote);
    }

    pub fn set_impact(&self, impact: OrderImpact) {
        self.with_state(|s| s.impact = impact);
    }

    pub fn set_crypto_preview(&self, preview: CryptoOrderPreview) {
        self.with_state(|s| s.crypto_preview = preview);
    }

    pub fn set_place_status(&self, status: &str) {
        self.with_state(|s| s.place_status = status.to_string());
    }

    /// Make one operation fail with the given detail until cleared.
    pub fn fail_op(&self, op: &'static str, detail: &str) {
        self.with_state(|s| {
            s.failures.insert(op, detail.to_string());
        });
    }

    pub fn clear_failure(&self, op: &str) {
        self.with_state(|s| {
            s.failures.remove(op);
        });
    }

    pub fn set_balance_delay(&self, delay: Duration) {
        self.with_state(|s| s.balance_delay = Some(delay));
    }

    // -- recorded placements -----------------------------------------------

    pub fn idempotency_keys(&self) -> Vec<String> {
        self.with_state(|s| s.idempotency_keys.clone())
    }

    pub fn placed_equity(&self) -> Vec<EquityOrderParams> {
        self.with_state(|s| s.placed_equity.clone())
    }

    pub fn placed_crypto(&self) -> Vec<CryptoOrderParams> {
        self.with_state(|s| s.placed_crypto.clone())
    }
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerageGateway for SimulatedGateway {
    async fn list_accounts(
        &self,
        _creds: &GatewayCredentials,
    ) -> Result<Vec<UpstreamAccount>, GatewayError> {
        self.record("list_accounts");
        if let Some(detail) = self.failure("list_accounts") {
            return Err(GatewayError::Upstream(detail));
        }
        Ok(self.with_state(|s| s.accounts.clone()))
    }

    async fn get_balances(
        &self,
        _creds: &GatewayCredentials,
        _account_id: &str,
    ) -> Result<serde_json::Value, GatewayError> {
        self.record("get_balances");
        let delay = self.with_state(|s| s.balance_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(detail) = self.failure("get_balances") {
            return Err(GatewayError::Upstream(detail));
        }
        Ok(self.with_state(|s| s.balances.clone()))
    }

    async fn get_positions(
        &self,
        _creds: &GatewayCredentials,
        _account_id: &str,
    ) -> Result<Vec<UpstreamPosition>, GatewayError> {
        self.record("get_positions");
        if let Some(detail) = self.failure("get_positions") {
            return Err(GatewayError::Upstream(detail));
        }
        Ok(self.with_state(|s| s.positions.clone()))
    }

    async fn search_symbols(
        &self,
        _creds: &GatewayCredentials,
        _account_id: &str,
        query: &str,
    ) -> Result<Vec<SymbolMatch>, GatewayError> {
        self.record("search_symbols");
        if let Some(detail) = self.failure("search_symbols") {
            return Err(GatewayError::Upstream(detail));
        }
        let query = query.to_uppercase();
        Ok(self.with_state(|s| {
            s.symbols
                .iter()
                .filter(|m| m.symbol.to_uppercase().contains(&query))
                .cloned()
                .collect()
        }))
    }

    async fn search_crypto_pairs(
        &self,
        _creds: &GatewayCredentials,
        _account_id: &str,
        base: &str,
        quote: &str,
    ) -> Result<Vec<CryptoPair>, GatewayError> {
        self.record("search_crypto_pairs");
        if let Some(detail) = self.failure("search_crypto_pairs") {
            return Err(GatewayError::Upstream(detail));
        }
        let base = base.to_uppercase();
        let quote = quote.to_uppercase();
        Ok(self.with_state(|s| {
            s.pairs
                .iter()
                .filter(|p| p.base.to_uppercase() == base && p.quote.to_uppercase() == quote)
                .cloned()
                .collect()
        }))
    }

    async fn get_quote(
        &self,
        _creds: &GatewayCredentials,
        _account_id: &str,
        _pair_symbol: &str,
    ) -> Result<PairQuote, GatewayError> {
        self.record("get_quote");
        if let Some(detail) = self.failure("get_quote") {
            return Err(GatewayError::Upstream(detail));
        }
        Ok(self.with_state(|s| s.quote.clone()))
    }

    async fn get_order_impact(
        &self,
        _creds: &GatewayCredentials,
        _params: &EquityOrderParams,
    ) -> Result<OrderImpact, GatewayError> {
        self.record("get_order_impact");
        if let Some(detail) = self.failure("get_order_impact") {
            return Err(GatewayError::Upstream(detail));
        }
        Ok(self.with_state(|s| s.impact.clone()))
    }

    async fn preview_crypto_order(
        &self,
        _creds: &GatewayCredentials,
        _params: &CryptoOrderParams,
    ) -> Result<CryptoOrderPreview, GatewayError> {
        self.record("preview_crypto_order");
        if let Some(detail) = self.failure("preview_crypto_order") {
            return Err(GatewayError::Upstream(detail));
        }
        Ok(self.with_state(|s| s.crypto_preview.clone()))
    }

    async fn place_order(
        &self,
        _creds: &GatewayCredentials,
        params: &EquityOrderParams,
        idempotency_key: &str,
    ) -> Result<PlacedOrder, GatewayError> {
        self.record("place_order");
        if let Some(detail) = self.failure("place_order") {
            return Err(GatewayError::Rejected(detail));
        }
        self.with_state(|s| {
            s.idempotency_keys.push(idempotency_key.to_string());
            s.placed_equity.push(params.clone());
        });
        Ok(PlacedOrder {
            order_id: Uuid::new_v4().to_string(),
            status: self.with_state(|s| s.place_status.clone()),
        })
    }

    async fn place_crypto_order(
        &self,
        _creds: &GatewayCredentials,
        params: &CryptoOrderParams,
    ) -> Result<PlacedOrder, GatewayError> {
        self.record("place_crypto_order");
        if let Some(detail) = self.failure("place_crypto_order") {
            return Err(GatewayError::Rejected(detail));
        }
        self.with_state(|s| s.placed_crypto.push(params.clone()));
        Ok(PlacedOrder {
            order_id: Uuid::new_v4().to_string(),
            status: self.with_state(|s| s.place_status.clone()),
        })
    }
}
