use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

// Upstream brokerages expose the same concept under different names and
// types (number, string, or an {amount, currency} object). Candidates are
// tried in priority order; the first that parses wins.
const CASH_FIELDS: &[&str] = &["cash", "cash_balance", "available_cash", "cash_available_for_trade"];
const EQUITY_FIELDS: &[&str] = &["total_equity", "total_value", "equity", "portfolio_value", "market_value"];
const BUYING_POWER_FIELDS: &[&str] = &["buying_power", "available_buying_power", "margin_available", "available_funds"];
const CURRENCY_FIELDS: &[&str] = &["currency", "currency_code"];

/// Balance amounts pulled out of a raw upstream payload. Anything that could
/// not be resolved stays `None`; extraction never fails.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedBalances {
    pub cash: Option<Decimal>,
    pub total_equity: Option<Decimal>,
    pub buying_power: Option<Decimal>,
    pub currency: Option<String>,
}

/// Extract balance amounts from whatever shape the upstream returned.
pub fn extract_balances(payload: &Value) -> ExtractedBalances {
    let obj = primary_object(payload);
    ExtractedBalances {
        cash: pick_amount(obj, CASH_FIELDS),
        total_equity: pick_amount(obj, EQUITY_FIELDS),
        buying_power: pick_amount(obj, BUYING_POWER_FIELDS),
        currency: pick_currency(obj),
    }
}

/// Some upstreams wrap the balance object in a one-element array (one entry
/// per currency); use the first entry in that case.
fn primary_object(payload: &Value) -> &Value {
    match payload {
        Value::Array(items) => items.first().unwrap_or(payload),
        _ => payload,
    }
}

fn pick_amount(obj: &Value, candidates: &[&str]) -> Option<Decimal> {
    candidates
        .iter()
        .filter_map(|key| obj.get(key))
        .find_map(as_decimal)
}

fn as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        // e.g. {"amount": "123.45", "currency": "USD"}
        Value::Object(map) => map.get("amount").and_then(as_decimal),
        _ => None,
    }
}

fn pick_currency(obj: &Value) -> Option<String> {
    for key in CURRENCY_FIELDS {
        match obj.get(*key) {
            Some(Value::String(s)) => return Some(s.clone()),
            // e.g. {"currency": {"code": "USD"}}
            Some(Value::Object(map)) => {
                if let Some(Value::String(code)) = map.get("code") {
                    return Some(code.clone());
                }
            }
            _ => {}
        }
    }
    None
}
