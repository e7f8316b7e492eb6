/*
[INPUT]:  Raw WAMP text frames and subscription topic names
[OUTPUT]: Parsed WampMessage frames and typed market/ticker updates
[POS]:    WebSocket layer - frame codec and update decoding
[UPDATE]: When adding new message types or changing format
*/

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::http::{PoloniexError, Result};
use crate::types::models::serde_helpers;
use crate::types::{BookSide, Side};

/// WebSocket sub-protocol negotiated with the push endpoint
pub const WAMP_SUBPROTOCOL: &str = "wamp.2.json";

const TICKER_TOPIC: &str = "ticker";
const TICKER_FIELDS: usize = 10;

pub(crate) mod code {
    pub const HELLO: u64 = 1;
    pub const WELCOME: u64 = 2;
    pub const ABORT: u64 = 3;
    pub const GOODBYE: u64 = 6;
    pub const ERROR: u64 = 8;
    pub const SUBSCRIBE: u64 = 32;
    pub const SUBSCRIBED: u64 = 33;
    pub const UNSUBSCRIBE: u64 = 34;
    pub const UNSUBSCRIBED: u64 = 35;
    pub const EVENT: u64 = 36;
}

/// WAMP v2 messages used by a subscriber session
#[derive(Debug, Clone, PartialEq)]
pub enum WampMessage {
    Hello { realm: String },
    Welcome { session: u64 },
    Abort { reason: String },
    Goodbye { reason: String },
    Error { request_type: u64, request: u64, error: String },
    Subscribe { request: u64, topic: String },
    Subscribed { request: u64, subscription: u64 },
    Unsubscribe { request: u64, subscription: u64 },
    Unsubscribed { request: u64 },
    Event(EventFrame),
}

/// Published payload for one subscription
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventFrame {
    pub subscription: u64,
    pub publication: u64,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl WampMessage {
    pub fn name(&self) -> &'static str {
        match self {
            WampMessage::Hello { .. } => "HELLO",
            WampMessage::Welcome { .. } => "WELCOME",
            WampMessage::Abort { .. } => "ABORT",
            WampMessage::Goodbye { .. } => "GOODBYE",
            WampMessage::Error { .. } => "ERROR",
            WampMessage::Subscribe { .. } => "SUBSCRIBE",
            WampMessage::Subscribed { .. } => "SUBSCRIBED",
            WampMessage::Unsubscribe { .. } => "UNSUBSCRIBE",
            WampMessage::Unsubscribed { .. } => "UNSUBSCRIBED",
            WampMessage::Event(_) => "EVENT",
        }
    }

    /// Serialize to a `wamp.2.json` text frame
    pub fn encode(&self) -> String {
        let value = match self {
            WampMessage::Hello { realm } => {
                json!([code::HELLO, realm, {"roles": {"subscriber": {}}}])
            }
            WampMessage::Welcome { session } => json!([code::WELCOME, session, {}]),
            WampMessage::Abort { reason } => json!([code::ABORT, {}, reason]),
            WampMessage::Goodbye { reason } => json!([code::GOODBYE, {}, reason]),
            WampMessage::Error {
                request_type,
                request,
                error,
            } => json!([code::ERROR, request_type, request, {}, error]),
            WampMessage::Subscribe { request, topic } => json!([code::SUBSCRIBE, request, {}, topic]),
            WampMessage::Subscribed {
                request,
                subscription,
            } => json!([code::SUBSCRIBED, request, subscription]),
            WampMessage::Unsubscribe {
                request,
                subscription,
            } => json!([code::UNSUBSCRIBE, request, subscription]),
            WampMessage::Unsubscribed { request } => json!([code::UNSUBSCRIBED, request]),
            WampMessage::Event(event) => json!([
                code::EVENT,
                event.subscription,
                event.publication,
                {},
                event.args,
                event.kwargs
            ]),
        };
        value.to_string()
    }

    /// Parse a text frame; anything that is not a known WAMP message is a protocol error
    pub fn decode(frame: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(frame)
            .map_err(|err| PoloniexError::Protocol(format!("frame is not JSON: {err}")))?;
        let Value::Array(fields) = value else {
            return Err(PoloniexError::Protocol("frame is not a JSON array".to_string()));
        };

        let message = match uint_field(&fields, 0, "message code")? {
            code::HELLO => WampMessage::Hello {
                realm: text_field(&fields, 1, "realm")?,
            },
            code::WELCOME => WampMessage::Welcome {
                session: uint_field(&fields, 1, "session")?,
            },
            code::ABORT => WampMessage::Abort {
                reason: text_field(&fields, 2, "reason")?,
            },
            code::GOODBYE => WampMessage::Goodbye {
                reason: text_field(&fields, 2, "reason")?,
            },
            code::ERROR => WampMessage::Error {
                request_type: uint_field(&fields, 1, "request type")?,
                request: uint_field(&fields, 2, "request")?,
                error: text_field(&fields, 4, "error")?,
            },
            code::SUBSCRIBE => WampMessage::Subscribe {
                request: uint_field(&fields, 1, "request")?,
                topic: text_field(&fields, 3, "topic")?,
            },
            code::SUBSCRIBED => WampMessage::Subscribed {
                request: uint_field(&fields, 1, "request")?,
                subscription: uint_field(&fields, 2, "subscription")?,
            },
            code::UNSUBSCRIBE => WampMessage::Unsubscribe {
                request: uint_field(&fields, 1, "request")?,
                subscription: uint_field(&fields, 2, "subscription")?,
            },
            code::UNSUBSCRIBED => WampMessage::Unsubscribed {
                request: uint_field(&fields, 1, "request")?,
            },
            code::EVENT => {
                let args = match fields.get(4) {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(args)) => args.clone(),
                    Some(_) => {
                        return Err(PoloniexError::Protocol("EVENT args is not a list".to_string()));
                    }
                };
                let kwargs = match fields.get(5) {
                    None | Some(Value::Null) => Map::new(),
                    Some(Value::Object(kwargs)) => kwargs.clone(),
                    Some(_) => {
                        return Err(PoloniexError::Protocol("EVENT kwargs is not a map".to_string()));
                    }
                };
                WampMessage::Event(EventFrame {
                    subscription: uint_field(&fields, 1, "subscription")?,
                    publication: uint_field(&fields, 2, "publication")?,
                    args,
                    kwargs,
                })
            }
            other => {
                return Err(PoloniexError::Protocol(format!("unknown message code {other}")));
            }
        };

        Ok(message)
    }
}

fn uint_field(fields: &[Value], index: usize, name: &str) -> Result<u64> {
    fields
        .get(index)
        .and_then(Value::as_u64)
        .ok_or_else(|| PoloniexError::Protocol(format!("missing or invalid {name}")))
}

fn text_field(fields: &[Value], index: usize, name: &str) -> Result<String> {
    fields
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| PoloniexError::Protocol(format!("missing or invalid {name}")))
}

/// A named stream on the push connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Global ticker feed
    Ticker,
    /// Order book and trades for one market, e.g. `BTC_ETH`
    OrderBook(String),
}

impl Topic {
    /// Validate a topic name. Currency pairs are upper-cased.
    pub fn parse(name: &str) -> Result<Self> {
        let name = name.trim();
        if name.eq_ignore_ascii_case(TICKER_TOPIC) {
            return Ok(Topic::Ticker);
        }
        Self::order_book(name)
    }

    pub fn order_book(pair: &str) -> Result<Self> {
        let pair = pair.trim().to_ascii_uppercase();
        let valid = pair.split_once('_').is_some_and(|(base, quote)| {
            let is_code = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric());
            is_code(base) && is_code(quote)
        });
        if !valid {
            return Err(PoloniexError::Config(format!(
                "malformed topic {pair:?}: expected \"ticker\" or a BASE_QUOTE currency pair"
            )));
        }
        Ok(Topic::OrderBook(pair))
    }

    /// Wire name used in SUBSCRIBE
    pub fn name(&self) -> &str {
        match self {
            Topic::Ticker => TICKER_TOPIC,
            Topic::OrderBook(pair) => pair,
        }
    }

    /// Decode an EVENT published on this topic
    pub fn decode_update(&self, event: &EventFrame) -> Result<Update> {
        match self {
            Topic::Ticker => {
                let fields: Vec<Value> = event.args.iter().take(TICKER_FIELDS).cloned().collect();
                let ticker: TickerUpdate = serde_json::from_value(Value::Array(fields))?;
                Ok(Update::Ticker(ticker))
            }
            Topic::OrderBook(pair) => {
                let events = event
                    .args
                    .iter()
                    .cloned()
                    .map(serde_json::from_value)
                    .collect::<std::result::Result<Vec<MarketEvent>, _>>()?;
                let seq = event
                    .kwargs
                    .get("seq")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| {
                        PoloniexError::InvalidResponse(format!("{pair} update without seq"))
                    })?;
                Ok(Update::Market(MarketUpdate {
                    pair: pair.clone(),
                    seq,
                    events,
                }))
            }
        }
    }
}

impl FromStr for Topic {
    type Err = PoloniexError;

    fn from_str(name: &str) -> Result<Self> {
        Topic::parse(name)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded push update, delivered to the handler of its topic
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Market(MarketUpdate),
    Ticker(TickerUpdate),
}

/// Order book deltas and trades for one market, in sequence order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketUpdate {
    pub pair: String,
    pub seq: u64,
    pub events: Vec<MarketEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MarketEvent {
    #[serde(rename = "orderBookModify")]
    BookModify(BookModify),
    #[serde(rename = "orderBookRemove")]
    BookRemove(BookRemove),
    #[serde(rename = "newTrade")]
    Trade(TradeEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookModify {
    #[serde(rename = "type")]
    pub side: BookSide,
    pub rate: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRemove {
    #[serde(rename = "type")]
    pub side: BookSide,
    pub rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    #[serde(rename = "tradeID", deserialize_with = "serde_helpers::lenient_u64")]
    pub trade_id: u64,
    pub rate: Decimal,
    pub amount: Decimal,
    pub total: Decimal,
    pub date: String,
    #[serde(rename = "type")]
    pub side: Side,
}

/// One ticker tick; decoded from the positional EVENT args
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerUpdate {
    pub pair: String,
    pub last: Decimal,
    pub lowest_ask: Decimal,
    pub highest_bid: Decimal,
    pub percent_change: Decimal,
    pub base_volume: Decimal,
    pub quote_volume: Decimal,
    #[serde(deserialize_with = "serde_helpers::flag")]
    pub is_frozen: bool,
    pub high_24hr: Decimal,
    pub low_24hr: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn ticker_args() -> Vec<Value> {
        serde_json::from_str(
            r#"["BTC_XMR","0.00950000","0.00955000","0.00950000","-0.01020408",
                "102.30781213","10781.2324523",0,"0.00990000","0.00930000"]"#,
        )
        .unwrap()
    }

    #[rstest]
    #[case(WampMessage::Hello { realm: "realm1".into() })]
    #[case(WampMessage::Welcome { session: 9_129_137_332 })]
    #[case(WampMessage::Abort { reason: "wamp.error.no_such_realm".into() })]
    #[case(WampMessage::Goodbye { reason: "wamp.close.normal".into() })]
    #[case(WampMessage::Error { request_type: 32, request: 7, error: "wamp.error.not_authorized".into() })]
    #[case(WampMessage::Subscribe { request: 1, topic: "BTC_ETH".into() })]
    #[case(WampMessage::Subscribed { request: 1, subscription: 5_512_315_355 })]
    #[case(WampMessage::Unsubscribe { request: 2, subscription: 5_512_315_355 })]
    #[case(WampMessage::Unsubscribed { request: 2 })]
    fn test_frame_codec(#[case] message: WampMessage) {
        assert_eq!(WampMessage::decode(&message.encode()).unwrap(), message);
    }

    #[test]
    fn test_hello_layout() {
        let frame = WampMessage::Hello { realm: "realm1".into() }.encode();
        assert_eq!(frame, r#"[1,"realm1",{"roles":{"subscriber":{}}}]"#);
    }

    #[test]
    fn test_event_decode_without_kwargs() {
        let message = WampMessage::decode(r#"[36, 11, 22, {}, ["a"]]"#).unwrap();
        match message {
            WampMessage::Event(event) => {
                assert_eq!(event.subscription, 11);
                assert_eq!(event.publication, 22);
                assert_eq!(event.args, vec![Value::from("a")]);
                assert!(event.kwargs.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[rstest]
    #[case("not json")]
    #[case(r#"{"code": 36}"#)]
    #[case(r#"[]"#)]
    #[case(r#"[99, 1]"#)]
    #[case(r#"[33, "one", 2]"#)]
    #[case(r#"[36, 1, 2, {}, {"not": "a list"}]"#)]
    fn test_decode_rejects_malformed(#[case] frame: &str) {
        let err = WampMessage::decode(frame).unwrap_err();
        assert!(matches!(err, PoloniexError::Protocol(_)), "{err:?}");
    }

    #[rstest]
    #[case("ticker", Topic::Ticker)]
    #[case(" TICKER ", Topic::Ticker)]
    #[case("btc_eth", Topic::OrderBook("BTC_ETH".into()))]
    #[case("USDT_BTC", Topic::OrderBook("USDT_BTC".into()))]
    fn test_topic_parse(#[case] name: &str, #[case] expected: Topic) {
        assert_eq!(Topic::parse(name).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("BTCETH")]
    #[case("BTC_")]
    #[case("_ETH")]
    #[case("BTC_ETH_XMR")]
    #[case("BTC-ETH")]
    #[case("BTC_ÉTH")]
    fn test_topic_parse_rejects_malformed(#[case] name: &str) {
        let err = Topic::parse(name).unwrap_err();
        assert!(matches!(err, PoloniexError::Config(_)));
    }

    #[test]
    fn test_decode_ticker_update() {
        let event = EventFrame {
            subscription: 1,
            publication: 2,
            args: ticker_args(),
            kwargs: Map::new(),
        };
        let update = Topic::Ticker.decode_update(&event).unwrap();
        let Update::Ticker(ticker) = update else {
            panic!("expected ticker update");
        };
        assert_eq!(ticker.pair, "BTC_XMR");
        assert_eq!(ticker.percent_change, dec("-0.01020408"));
        assert!(!ticker.is_frozen);
        assert_eq!(ticker.low_24hr, dec("0.0093"));
    }

    #[test]
    fn test_decode_ticker_short_args_fails() {
        let event = EventFrame {
            args: ticker_args().into_iter().take(4).collect(),
            ..EventFrame::default()
        };
        assert!(Topic::Ticker.decode_update(&event).is_err());
    }

    #[test]
    fn test_decode_market_update() {
        let args: Vec<Value> = serde_json::from_str(
            r#"[
                {"type":"orderBookModify","data":{"type":"bid","rate":"0.00300888","amount":"3.32349029"}},
                {"type":"orderBookRemove","data":{"type":"ask","rate":"0.00311000"}},
                {"type":"newTrade","data":{"tradeID":"364476","rate":"0.00300888","amount":"0.03580906",
                    "date":"2014-10-07 21:51:20","total":"0.00010775","type":"sell"}}
            ]"#,
        )
        .unwrap();
        let mut kwargs = Map::new();
        kwargs.insert("seq".into(), Value::from(18_849));
        let event = EventFrame {
            subscription: 1,
            publication: 2,
            args,
            kwargs,
        };

        let topic = Topic::parse("BTC_XMR").unwrap();
        let Update::Market(update) = topic.decode_update(&event).unwrap() else {
            panic!("expected market update");
        };

        assert_eq!(update.pair, "BTC_XMR");
        assert_eq!(update.seq, 18_849);
        assert_eq!(
            update.events[0],
            MarketEvent::BookModify(BookModify {
                side: BookSide::Bid,
                rate: dec("0.00300888"),
                amount: dec("3.32349029"),
            })
        );
        assert_eq!(
            update.events[1],
            MarketEvent::BookRemove(BookRemove {
                side: BookSide::Ask,
                rate: dec("0.00311"),
            })
        );
        match &update.events[2] {
            MarketEvent::Trade(trade) => {
                assert_eq!(trade.trade_id, 364_476);
                assert_eq!(trade.side, Side::Sell);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_market_update_requires_seq() {
        let event = EventFrame::default();
        let topic = Topic::parse("BTC_XMR").unwrap();
        assert!(topic.decode_update(&event).is_err());
    }
}
