/*
[INPUT]:  Order parameters (pair, rate, amount, execution constraint)
[OUTPUT]: Order placement and cancellation results
[POS]:    HTTP layer - trading endpoints (signed commands)
[UPDATE]: When adding new trading endpoints or changing order flow
*/

use rust_decimal::Decimal;

use crate::http::{PoloniexClient, Result};
use crate::types::{CancelOrderResponse, Side, TradeOrder, TradeType};

impl PoloniexClient {
    /// Place a limit buy order
    ///
    /// POST /tradingApi command=buy
    pub async fn buy(
        &self,
        pair: &str,
        rate: Decimal,
        amount: Decimal,
        trade_type: Option<TradeType>,
    ) -> Result<TradeOrder> {
        self.place_order(Side::Buy, pair, rate, amount, trade_type).await
    }

    /// Place a limit sell order
    ///
    /// POST /tradingApi command=sell
    pub async fn sell(
        &self,
        pair: &str,
        rate: Decimal,
        amount: Decimal,
        trade_type: Option<TradeType>,
    ) -> Result<TradeOrder> {
        self.place_order(Side::Sell, pair, rate, amount, trade_type).await
    }

    /// Cancel an open order
    ///
    /// POST /tradingApi command=cancelOrder
    pub async fn cancel_order(&self, order_number: u64) -> Result<CancelOrderResponse> {
        let params = [("orderNumber", order_number.to_string())];
        self.execute("cancelOrder", &params).await
    }

    async fn place_order(
        &self,
        side: Side,
        pair: &str,
        rate: Decimal,
        amount: Decimal,
        trade_type: Option<TradeType>,
    ) -> Result<TradeOrder> {
        let command = match side {
            Side::Buy => "buy",
            Side::Sell => "sell",
        };

        let mut params = vec![
            ("currencyPair", pair.to_string()),
            ("rate", rate.normalize().to_string()),
            ("amount", amount.normalize().to_string()),
        ];
        if let Some(trade_type) = trade_type {
            params.push((trade_type.as_param(), "1".to_string()));
        }

        self.execute(command, &params).await
    }
}
