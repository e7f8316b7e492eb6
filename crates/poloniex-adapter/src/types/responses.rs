/*
[INPUT]:  API schema definitions and serde requirements
[OUTPUT]: Typed Rust response structs with serialization support
[POS]:    Data layer - type definitions for API communication
[UPDATE]: When API schema changes or new types added
*/

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::Side;
use super::models::serde_helpers;
use super::models::{Deposit, Withdrawal};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeOrder {
    #[serde(deserialize_with = "serde_helpers::lenient_u64")]
    pub order_number: u64,
    #[serde(default)]
    pub resulting_trades: Vec<ResultingTrade>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultingTrade {
    #[serde(rename = "tradeID", deserialize_with = "serde_helpers::lenient_u64")]
    pub trade_id: u64,
    pub date: String,
    pub rate: Decimal,
    pub amount: Decimal,
    pub total: Decimal,
    #[serde(rename = "type")]
    pub side: Side,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOrderResponse {
    #[serde(deserialize_with = "serde_helpers::flag")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepositsWithdrawals {
    #[serde(default)]
    pub deposits: Vec<Deposit>,
    #[serde(default)]
    pub withdrawals: Vec<Withdrawal>,
}
