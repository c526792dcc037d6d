use crate::ratelimit::CooldownTracker;
use async_trait::async_trait;
use foliolink_core::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Configuration for connecting to the aggregation gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the gateway REST API.
    pub base_url: String,
    /// Partner key identifying this deployment to the gateway.
    pub consumer_key: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8900".to_string(),
            consumer_key: "dev-consumer-key".to_string(),
            timeout_secs: 15,
        }
    }
}

/// REST adapter for the upstream aggregation gateway.
///
/// Per-user credentials travel with every call; the client itself is shared.
/// Rate-limit responses arm a per-resource cooldown so a throttled account
/// fails fast instead of hammering the upstream.
pub struct RestGateway {
    config: GatewayConfig,
    http: reqwest::Client,
    cooldowns: CooldownTracker,
}

impl RestGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Transport(format!("HTTP client build failed: {}", e)))?;
        Ok(Self {
            config,
            http,
            cooldowns: CooldownTracker::default(),
        })
    }

    pub fn with_cooldowns(mut self, cooldowns: CooldownTracker) -> Self {
        self.cooldowns = cooldowns;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, req: reqwest::RequestBuilder, creds: &GatewayCredentials) -> reqwest::RequestBuilder {
        req.header("X-User-Id", &creds.user_id)
            .header("X-User-Secret", &creds.user_secret)
            .header("X-Consumer-Key", &self.config.consumer_key)
    }

    /// Send a request, enforcing the cooldown for `resource` and mapping
    /// failure statuses onto the gateway error taxonomy.
    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        resource: &str,
    ) -> Result<serde_json::Value, GatewayError> {
        self.cooldowns.check(resource)?;

        let resp = req
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if status.is_success() {
            self.cooldowns.record_success(resource);
            debug!(resource = %resource, "Gateway call ok");
            return serde_json::from_str(&body)
                .map_err(|e| GatewayError::Upstream(format!("Decode error: {}", e)));
        }

        Err(match status.as_u16() {
            404 => GatewayError::NotFound(upstream_detail(&body)),
            401 | 403 => GatewayError::AuthFailed(upstream_detail(&body)),
            429 => {
                self.cooldowns.record_rate_limit(resource);
                GatewayError::RateLimited {
                    resource: resource.to_string(),
                }
            }
            400..=499 => GatewayError::Rejected(upstream_detail(&body)),
            _ => GatewayError::Upstream(format!("HTTP {}: {}", status.as_u16(), upstream_detail(&body))),
        })
    }

    async fn get_typed<T: DeserializeOwned>(
        &self,
        creds: &GatewayCredentials,
        path: &str,
        resource: &str,
    ) -> Result<T, GatewayError> {
        let req = self.authed(self.http.get(self.url(path)), creds);
        let value = self.send(req, resource).await?;
        decode(value)
    }

    async fn post_typed<T: DeserializeOwned, B: Serialize>(
        &self,
        creds: &GatewayCredentials,
        path: &str,
        resource: &str,
        body: &B,
        idempotency_key: Option<&str>,
    ) -> Result<T, GatewayError> {
        let mut req = self.authed(self.http.post(self.url(path)), creds).json(body);
        if let Some(key) = idempotency_key {
            req = req.header("Idempotency-Key", key);
        }
        let value = self.send(req, resource).await?;
        decode(value)
    }
}

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, GatewayError> {
    serde_json::from_value(value).map_err(|e| GatewayError::Upstream(format!("Decode error: {}", e)))
}

/// Pull the human-readable detail out of an error body, keeping the upstream
/// wording intact for diagnosis.
fn upstream_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["detail", "message", "error"] {
            if let Some(text) = value.get(field).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    if body.is_empty() {
        "no detail provided".to_string()
    } else {
        body.to_string()
    }
}

#[async_trait]
impl BrokerageGateway for RestGateway {
    async fn list_accounts(
        &self,
        creds: &GatewayCredentials,
    ) -> Result<Vec<UpstreamAccount>, GatewayError> {
        self.get_typed(creds, "/accounts", "accounts").await
    }

    async fn get_balances(
        &self,
        creds: &GatewayCredentials,
        account_id: &str,
    ) -> Result<serde_json::Value, GatewayError> {
        let path = format!("/accounts/{}/balances", account_id);
        let resource = format!("balances:{}", account_id);
        let req = self.authed(self.http.get(self.url(&path)), creds);
        self.send(req, &resource).await
    }

    async fn get_positions(
        &self,
        creds: &GatewayCredentials,
        account_id: &str,
    ) -> Result<Vec<UpstreamPosition>, GatewayError> {
        let path = format!("/accounts/{}/positions", account_id);
        let resource = format!("positions:{}", account_id);
        self.get_typed(creds, &path, &resource).await
    }

    async fn search_symbols(
        &self,
        creds: &GatewayCredentials,
        account_id: &str,
        query: &str,
    ) -> Result<Vec<SymbolMatch>, GatewayError> {
        let path = format!("/accounts/{}/symbols?substring={}", account_id, query);
        let resource = format!("symbols:{}", account_id);
        self.get_typed(creds, &path, &resource).await
    }

    async fn search_crypto_pairs(
        &self,
        creds: &GatewayCredentials,
        account_id: &str,
        base: &str,
        quote: &str,
    ) -> Result<Vec<CryptoPair>, GatewayError> {
        let path = format!(
            "/accounts/{}/crypto/pairs?base={}&quote={}",
            account_id, base, quote
        );
        let resource = format!("pairs:{}", account_id);
        self.get_typed(creds, &path, &resource).await
    }

    async fn get_quote(
        &self,
        creds: &GatewayCredentials,
        account_id: &str,
        pair_symbol: &str,
    ) -> Result<PairQuote, GatewayError> {
        let path = format!("/accounts/{}/crypto/quotes/{}", account_id, pair_symbol);
        let resource = format!("quotes:{}", account_id);
        self.get_typed(creds, &path, &resource).await
    }

    async fn get_order_impact(
        &self,
        creds: &GatewayCredentials,
        params: &EquityOrderParams,
    ) -> Result<OrderImpact, GatewayError> {
        let resource = format!("impact:{}", params.account_id);
        self.post_typed(creds, "/trade/impact", &resource, params, None)
            .await
    }

    async fn preview_crypto_order(
        &self,
        creds: &GatewayCredentials,
        params: &CryptoOrderParams,
    ) -> Result<CryptoOrderPreview, GatewayError> {
        let resource = format!("impact:{}", params.account_id);
        self.post_typed(creds, "/trade/crypto/preview", &resource, params, None)
            .await
    }

    async fn place_order(
        &self,
        creds: &GatewayCredentials,
        params: &EquityOrderParams,
        idempotency_key: &str,
    ) -> Result<PlacedOrder, GatewayError> {
        let resource = format!("orders:{}", params.account_id);
        self.post_typed(creds, "/trade/place", &resource, params, Some(idempotency_key))
            .await
    }

    async fn place_crypto_order(
        &self,
        creds: &GatewayCredentials,
        params: &CryptoOrderParams,
    ) -> Result<PlacedOrder, GatewayError> {
        let resource = format!("orders:{}", params.account_id);
        self.post_typed(creds, "/trade/crypto/place", &resource, params, None)
            .await
    }
}
