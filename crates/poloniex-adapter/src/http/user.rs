/*
[INPUT]:  Account query parameters and signed-command credentials
[OUTPUT]: Account data (balances, trades, open orders, transfers, fees)
[POS]:    HTTP layer - account endpoints (signed commands)
[UPDATE]: When adding new account endpoints or changing query parameters
*/

// ### Account Endpoints

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::http::{PoloniexClient, Result};
use crate::types::{Balance, DepositsWithdrawals, Fees, OpenOrder, Trade};

const ALL_PAIRS: &str = "all";

impl PoloniexClient {
    /// Balances for every currency
    ///
    /// POST /tradingApi command=returnCompleteBalances
    pub async fn get_balances(&self) -> Result<HashMap<String, Balance>> {
        self.execute("returnCompleteBalances", &[]).await
    }

    /// Own trades since `start` (UNIX seconds); `pair` may be "all"
    ///
    /// POST /tradingApi command=returnTradeHistory
    pub async fn get_trade_history(
        &self,
        pair: &str,
        start: u32,
    ) -> Result<HashMap<String, Vec<Trade>>> {
        let params = [("currencyPair", pair.to_string()), ("start", start.to_string())];
        let value = self.execute_raw("returnTradeHistory", &params).await?;
        keyed_by_pair(pair, value)
    }

    /// Open orders; `pair` may be "all"
    ///
    /// POST /tradingApi command=returnOpenOrders
    pub async fn get_open_orders(&self, pair: &str) -> Result<HashMap<String, Vec<OpenOrder>>> {
        let params = [("currencyPair", pair.to_string())];
        let value = self.execute_raw("returnOpenOrders", &params).await?;
        keyed_by_pair(pair, value)
    }

    /// Deposits and withdrawals between `start` and `end` (UNIX seconds)
    ///
    /// POST /tradingApi command=returnDepositsWithdrawals
    pub async fn get_deposits_withdrawals(&self, start: u32, end: u32) -> Result<DepositsWithdrawals> {
        let params = [("start", start.to_string()), ("end", end.to_string())];
        self.execute("returnDepositsWithdrawals", &params).await
    }

    /// Current fee tier
    ///
    /// POST /tradingApi command=returnFeeInfo
    pub async fn get_fees(&self) -> Result<Fees> {
        self.execute("returnFeeInfo", &[]).await
    }
}

/// A single pair answers with a bare list; "all" answers with a map.
fn keyed_by_pair<T>(pair: &str, value: Value) -> Result<HashMap<String, Vec<T>>>
where
    T: DeserializeOwned,
{
    if pair.eq_ignore_ascii_case(ALL_PAIRS) {
        return Ok(serde_json::from_value(value)?);
    }

    let entries: Vec<T> = serde_json::from_value(value)?;
    Ok(HashMap::from([(pair.to_string(), entries)]))
}
