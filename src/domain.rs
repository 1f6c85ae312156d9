// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::state::StateSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side { Buy, Sell }
impl Side {
    pub fn as_str(&self) -> &'static str { match self { Side::Buy => "buy", Side::Sell => "sell" } }
}

// Broker prices come back as decimal strings ("182.450000"); accept numbers too.
fn de_opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    Ok(match v {
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Number(n)) => n.as_f64(),
        _ => None,
    })
}

/// Broker records keep only what we read typed; everything else rides along in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Account {
    pub account_number: String,
    pub url: String,
    #[serde(default)]
    pub positions: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub url: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tradeable: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Market {
    #[serde(default)]
    pub mic: String,
    #[serde(default)]
    pub acronym: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub timezone: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub bid_price: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub ask_price: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub last_trade_price: Option<f64>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub average_buy_price: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub account: String,
    pub instrument: String,
    pub price: f64,
    pub quantity: u32,
    pub side: Side,
    pub symbol: String,
    pub time_in_force: String,
    pub trigger: String,
    #[serde(rename = "type")]
    pub order_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub quantity: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Recorder envelope (one JSON line per event).
#[derive(Debug, Clone, Serialize)]
pub enum Event {
    Snapshot(StateSnapshot),
    Order { ts: DateTime<Utc>, symbol: String, record: OrderRecord },
    Note(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_prices_parse_from_strings() {
        let q: Quote = serde_json::from_value(serde_json::json!({
            "symbol": "AAPL",
            "bid_price": "182.450000",
            "ask_price": 182.5,
            "last_trade_price": null,
            "trading_halted": false
        }))
        .unwrap();
        assert_eq!(q.bid_price, Some(182.45));
        assert_eq!(q.ask_price, Some(182.5));
        assert_eq!(q.last_trade_price, None);
        assert_eq!(q.extra.get("trading_halted"), Some(&Value::Bool(false)));
    }

    #[test]
    fn order_request_uses_wire_names() {
        let req = OrderRequest {
            account: "https://api.example.com/accounts/1/".into(),
            instrument: "https://api.example.com/instruments/x/".into(),
            price: 10.5,
            quantity: 2,
            side: Side::Sell,
            symbol: "AAPL".into(),
            time_in_force: "gfd".into(),
            trigger: "immediate".into(),
            order_type: "market".into(),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["side"], "sell");
        assert_eq!(v["type"], "market");
        assert!(v.get("order_type").is_none());
    }
}
