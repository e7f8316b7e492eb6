/*
[INPUT]:  Market identifiers and query parameters
[OUTPUT]: Market data (tickers, volumes, currencies, order books, candles)
[POS]:    HTTP layer - public market data endpoints (no auth required)
[UPDATE]: When adding new public endpoints or changing response format
*/

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::http::{PoloniexClient, Result};
use crate::types::{CandleStick, ChartPeriod, Currency, OrderBook, Ticker, VolumeCollection};

const MIN_BOOK_DEPTH: u32 = 1;
const MAX_BOOK_DEPTH: u32 = 100;

impl PoloniexClient {
    /// Ticker for all markets
    ///
    /// GET /public?command=returnTicker
    pub async fn get_tickers(&self) -> Result<HashMap<String, Ticker>> {
        self.public_get("returnTicker", &[]).await
    }

    /// 24h volume for all markets
    ///
    /// GET /public?command=return24hVolume
    pub async fn get_volumes(&self) -> Result<VolumeCollection> {
        self.public_get("return24hVolume", &[]).await
    }

    /// Currency metadata keyed by symbol
    ///
    /// GET /public?command=returnCurrencies
    pub async fn get_currencies(&self) -> Result<HashMap<String, Currency>> {
        self.public_get("returnCurrencies", &[]).await
    }

    /// Order book for one market; depth is clamped to 1..=100
    ///
    /// GET /public?command=returnOrderBook&currencyPair={pair}&depth={depth}
    pub async fn get_order_book(&self, pair: &str, depth: u32) -> Result<OrderBook> {
        let params = [
            ("currencyPair", pair.to_uppercase()),
            ("depth", clamp_depth(depth).to_string()),
        ];
        self.public_get("returnOrderBook", &params).await
    }

    /// Order books for every market
    ///
    /// GET /public?command=returnOrderBook&currencyPair=all&depth={depth}
    pub async fn get_all_order_books(&self, depth: u32) -> Result<HashMap<String, OrderBook>> {
        let params = [
            ("currencyPair", "all".to_string()),
            ("depth", clamp_depth(depth).to_string()),
        ];
        self.public_get("returnOrderBook", &params).await
    }

    /// Candlesticks between `start` and `end`
    ///
    /// GET /public?command=returnChartData&currencyPair={pair}&period={secs}&start={unix}&end={unix}
    pub async fn chart_data(
        &self,
        pair: &str,
        period: ChartPeriod,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CandleStick>> {
        let params = [
            ("currencyPair", pair.to_uppercase()),
            ("period", period.as_secs().to_string()),
            ("start", start.timestamp().to_string()),
            ("end", end.timestamp().to_string()),
        ];
        self.public_get("returnChartData", &params).await
    }
}

fn clamp_depth(depth: u32) -> u32 {
    depth.clamp(MIN_BOOK_DEPTH, MAX_BOOK_DEPTH)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::http::{ClientConfig, ErrorKind, PoloniexError};
    use crate::types::BookLevel;

    fn client_for(server: &MockServer) -> PoloniexClient {
        PoloniexClient::with_config_and_base_url(ClientConfig::default(), None, &server.uri())
            .expect("client init")
    }

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).expect("decimal")
    }

    #[test]
    fn test_clamp_depth() {
        assert_eq!(clamp_depth(0), 1);
        assert_eq!(clamp_depth(50), 50);
        assert_eq!(clamp_depth(500), 100);
    }

    #[tokio::test]
    async fn test_get_tickers() {
        let server = MockServer::start().await;
        let mock_response = r#"{
            "BTC_LTC": {
                "id": 50,
                "last": "0.0251",
                "lowestAsk": "0.02589999",
                "highestBid": "0.0251",
                "percentChange": "0.02390438",
                "baseVolume": "6.16485315",
                "quoteVolume": "245.82513926",
                "isFrozen": "0",
                "high24hr": "0.0260",
                "low24hr": "0.0240"
            }
        }"#;

        let _mock = Mock::given(method("GET"))
            .and(path("/public"))
            .and(query_param("command", "returnTicker"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(mock_response, "application/json"))
            .expect(1)
            .mount(&server)
            .await;

        let tickers = client_for(&server).get_tickers().await.expect("get_tickers failed");
        let ticker = &tickers["BTC_LTC"];

        assert_eq!(ticker.id, 50);
        assert_eq!(ticker.last, dec("0.0251"));
        assert_eq!(ticker.lowest_ask, dec("0.02589999"));
        assert!(!ticker.is_frozen);
        assert_eq!(ticker.high_24hr, Some(dec("0.0260")));
    }

    #[tokio::test]
    async fn test_get_order_book_uppercases_and_clamps() {
        let server = MockServer::start().await;
        let mock_response = r#"{
            "asks": [["0.00007600", 1164]],
            "bids": [["0.00006901", "200"]],
            "isFrozen": "0",
            "seq": 18849
        }"#;

        let _mock = Mock::given(method("GET"))
            .and(path("/public"))
            .and(query_param("command", "returnOrderBook"))
            .and(query_param("currencyPair", "BTC_NXT"))
            .and(query_param("depth", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(mock_response, "application/json"))
            .expect(1)
            .mount(&server)
            .await;

        let book = client_for(&server)
            .get_order_book("btc_nxt", 1_000)
            .await
            .expect("get_order_book failed");

        assert_eq!(book.asks, vec![BookLevel(dec("0.00007600"), Decimal::from(1164))]);
        assert_eq!(book.bids, vec![BookLevel(dec("0.00006901"), Decimal::from(200))]);
        assert_eq!(book.seq, 18849);
    }

    #[tokio::test]
    async fn test_get_order_book_error_member() {
        let server = MockServer::start().await;

        let _mock = Mock::given(method("GET"))
            .and(path("/public"))
            .and(query_param("command", "returnOrderBook"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"error":"Invalid currency pair."}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).get_order_book("NOPE_NOPE", 10).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Api);
        match err {
            PoloniexError::Api { message, .. } => assert_eq!(message, "Invalid currency pair."),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_all_order_books() {
        let server = MockServer::start().await;
        let mock_response = r#"{
            "BTC_ETH": {"asks": [["0.02", 1]], "bids": [["0.01", 2]], "isFrozen": "0", "seq": 1},
            "BTC_LTC": {"asks": [], "bids": [], "isFrozen": "1", "seq": 7}
        }"#;

        let _mock = Mock::given(method("GET"))
            .and(path("/public"))
            .and(query_param("currencyPair", "all"))
            .and(query_param("depth", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(mock_response, "application/json"))
            .expect(1)
            .mount(&server)
            .await;

        let books = client_for(&server)
            .get_all_order_books(0)
            .await
            .expect("get_all_order_books failed");

        assert_eq!(books.len(), 2);
        assert!(books["BTC_LTC"].is_frozen);
        assert_eq!(books["BTC_ETH"].bids[0].1, Decimal::from(2));
    }

    #[tokio::test]
    async fn test_chart_data() {
        let server = MockServer::start().await;
        let mock_response = r#"[{
            "date": 1405699200,
            "high": 0.0045388,
            "low": 0.00403001,
            "open": 0.00404545,
            "close": 0.00427592,
            "volume": 44.11655644,
            "quoteVolume": 10259.29079097,
            "weightedAverage": 0.00430015
        }]"#;

        let _mock = Mock::given(method("GET"))
            .and(path("/public"))
            .and(query_param("command", "returnChartData"))
            .and(query_param("currencyPair", "BTC_XMR"))
            .and(query_param("period", "14400"))
            .and(query_param("start", "1405699200"))
            .and(query_param("end", "9999999999"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(mock_response, "application/json"))
            .expect(1)
            .mount(&server)
            .await;

        let start = Utc.timestamp_opt(1_405_699_200, 0).unwrap();
        let end = Utc.timestamp_opt(9_999_999_999, 0).unwrap();
        let candles = client_for(&server)
            .chart_data("btc_xmr", ChartPeriod::FourHours, start, end)
            .await
            .expect("chart_data failed");

        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].date, 1_405_699_200);
        assert!((candles[0].weighted_average - 0.00430015).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_get_currencies_and_volumes() {
        let server = MockServer::start().await;

        let _currencies = Mock::given(method("GET"))
            .and(path("/public"))
            .and(query_param("command", "returnCurrencies"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"BTC":{"id":28,"name":"Bitcoin","txFee":"0.00050000","minConf":1,
                    "depositAddress":null,"disabled":0,"delisted":0,"frozen":0}}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let _volumes = Mock::given(method("GET"))
            .and(path("/public"))
            .and(query_param("command", "return24hVolume"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"BTC_ETH":{"BTC":"10","ETH":"500"},"totalBTC":"10"}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let currencies = client.get_currencies().await.expect("get_currencies failed");
        assert_eq!(currencies["BTC"].name, "Bitcoin");
        assert_eq!(currencies["BTC"].tx_fee, dec("0.0005"));

        let volumes = client.get_volumes().await.expect("get_volumes failed");
        assert_eq!(volumes.pairs["BTC_ETH"]["ETH"], Decimal::from(500));
        assert_eq!(volumes.totals["BTC"], Decimal::from(10));
    }
}
