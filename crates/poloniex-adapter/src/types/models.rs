/*
[INPUT]:  API schema definitions and serde requirements
[OUTPUT]: Typed Rust structs with serialization support
[POS]:    Data layer - type definitions for API communication
[UPDATE]: When API schema changes or new types added
*/

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::Side;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    #[serde(default)]
    pub id: u64,
    pub last: Decimal,
    pub lowest_ask: Decimal,
    pub highest_bid: Decimal,
    pub percent_change: Decimal,
    pub base_volume: Decimal,
    pub quote_volume: Decimal,
    #[serde(default, deserialize_with = "serde_helpers::flag")]
    pub is_frozen: bool,
    #[serde(default, rename = "high24hr")]
    pub high_24hr: Option<Decimal>,
    #[serde(default, rename = "low24hr")]
    pub low_24hr: Option<Decimal>,
}

/// 24h volumes per market plus the `total<CUR>` aggregates
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "HashMap<String, VolumeEntry>")]
pub struct VolumeCollection {
    pub pairs: HashMap<String, HashMap<String, Decimal>>,
    pub totals: HashMap<String, Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VolumeEntry {
    Pair(HashMap<String, Decimal>),
    Total(Decimal),
}

impl From<HashMap<String, VolumeEntry>> for VolumeCollection {
    fn from(entries: HashMap<String, VolumeEntry>) -> Self {
        let mut collection = VolumeCollection::default();
        for (key, entry) in entries {
            match entry {
                VolumeEntry::Pair(volumes) => {
                    collection.pairs.insert(key, volumes);
                }
                VolumeEntry::Total(total) => {
                    let currency = key.strip_prefix("total").unwrap_or(&key).to_string();
                    collection.totals.insert(currency, total);
                }
            }
        }
        collection
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Currency {
    pub id: u64,
    pub name: String,
    pub tx_fee: Decimal,
    pub min_conf: u32,
    #[serde(default)]
    pub deposit_address: Option<String>,
    #[serde(default, deserialize_with = "serde_helpers::flag")]
    pub disabled: bool,
    #[serde(default, deserialize_with = "serde_helpers::flag")]
    pub delisted: bool,
    #[serde(default, deserialize_with = "serde_helpers::flag")]
    pub frozen: bool,
}

/// One `[rate, amount]` order book level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel(pub Decimal, pub Decimal);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBook {
    pub asks: Vec<BookLevel>,
    pub bids: Vec<BookLevel>,
    #[serde(default, deserialize_with = "serde_helpers::flag")]
    pub is_frozen: bool,
    #[serde(default)]
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleStick {
    pub date: i64,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub weighted_average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub available: Decimal,
    pub on_orders: Decimal,
    pub btc_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    #[serde(rename = "globalTradeID", default)]
    pub global_trade_id: u64,
    #[serde(rename = "tradeID", deserialize_with = "serde_helpers::lenient_u64")]
    pub trade_id: u64,
    pub date: String,
    pub rate: Decimal,
    pub amount: Decimal,
    pub total: Decimal,
    pub fee: Decimal,
    #[serde(deserialize_with = "serde_helpers::lenient_u64")]
    pub order_number: u64,
    #[serde(rename = "type")]
    pub side: Side,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrder {
    #[serde(deserialize_with = "serde_helpers::lenient_u64")]
    pub order_number: u64,
    #[serde(rename = "type")]
    pub side: Side,
    pub rate: Decimal,
    pub amount: Decimal,
    pub total: Decimal,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deposit {
    pub currency: String,
    pub address: String,
    pub amount: Decimal,
    #[serde(default)]
    pub confirmations: u32,
    pub txid: String,
    pub timestamp: i64,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub withdrawal_number: u64,
    pub currency: String,
    pub address: String,
    pub amount: Decimal,
    pub timestamp: i64,
    pub status: String,
    #[serde(default)]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fees {
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub thirty_day_volume: Decimal,
    pub next_tier: Decimal,
}

pub(crate) mod serde_helpers {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// Accepts `0`/`1`, `"0"`/`"1"`, booleans and null
    pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(false),
            Value::Bool(value) => Ok(value),
            Value::Number(number) => Ok(number.as_f64().is_some_and(|value| value != 0.0)),
            Value::String(raw) => match raw.trim() {
                "" | "0" => Ok(false),
                "1" => Ok(true),
                other => Err(serde::de::Error::custom(format!("invalid flag {other:?}"))),
            },
            other => Err(serde::de::Error::custom(format!("invalid flag {other}"))),
        }
    }

    /// Identifiers the API sends either as numbers or numeric strings
    pub fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Number(number) => number
                .as_u64()
                .ok_or_else(|| serde::de::Error::custom(format!("invalid id {number}"))),
            Value::String(raw) => raw.trim().parse().map_err(serde::de::Error::custom),
            other => Err(serde::de::Error::custom(format!("invalid id {other}"))),
        }
    }
}
