/*
[INPUT]:  API schema definitions and serde requirements
[OUTPUT]: Typed Rust enums with serialization support
[POS]:    Data layer - type definitions for API communication
[UPDATE]: When API schema changes or new types added
*/

use serde::{Deserialize, Serialize};

use crate::http::PoloniexError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

/// Order book side as reported by push updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Bid,
    Ask,
}

/// Execution constraint for buy/sell, sent as `<flag>=1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TradeType {
    FillOrKill,
    ImmediateOrCancel,
    PostOnly,
}

impl TradeType {
    pub fn as_param(self) -> &'static str {
        match self {
            TradeType::FillOrKill => "fillOrKill",
            TradeType::ImmediateOrCancel => "immediateOrCancel",
            TradeType::PostOnly => "postOnly",
        }
    }
}

/// Candlestick width accepted by `returnChartData`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChartPeriod {
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    TwoHours,
    FourHours,
    OneDay,
}

impl ChartPeriod {
    pub fn as_secs(self) -> u32 {
        match self {
            ChartPeriod::FiveMinutes => 300,
            ChartPeriod::FifteenMinutes => 900,
            ChartPeriod::ThirtyMinutes => 1800,
            ChartPeriod::TwoHours => 7200,
            ChartPeriod::FourHours => 14400,
            ChartPeriod::OneDay => 86400,
        }
    }
}

impl TryFrom<u32> for ChartPeriod {
    type Error = PoloniexError;

    fn try_from(secs: u32) -> Result<Self, Self::Error> {
        match secs {
            300 => Ok(ChartPeriod::FiveMinutes),
            900 => Ok(ChartPeriod::FifteenMinutes),
            1800 => Ok(ChartPeriod::ThirtyMinutes),
            7200 => Ok(ChartPeriod::TwoHours),
            14400 => Ok(ChartPeriod::FourHours),
            86400 => Ok(ChartPeriod::OneDay),
            other => Err(PoloniexError::Config(format!(
                "unsupported chart period {other}s"
            ))),
        }
    }
}
