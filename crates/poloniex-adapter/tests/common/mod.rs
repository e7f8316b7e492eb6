/*
[INPUT]:  Test configuration and mock server requirements
[OUTPUT]: Shared test utilities, fixtures, and an in-memory push exchange
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for poloniex-adapter tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use poloniex_adapter::ws::{
    Connector, EventFrame, FramePair, FrameSink, FrameSource, ReconnectPolicy, StreamClient,
    StreamConfig, Subscription, SubscriptionState, Update, WampMessage,
};
use poloniex_adapter::{Credentials, PoloniexClient, PoloniexError, Result};
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use wiremock::MockServer;

pub const TEST_API_KEY: &str = "TEST-API-KEY";
pub const TEST_API_SECRET: &str = "test-api-secret";

const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Setup a mock HTTP server for testing
pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

pub fn test_credentials() -> Credentials {
    Credentials::new(TEST_API_KEY, TEST_API_SECRET.as_bytes().to_vec())
}

/// Client with credentials pointed at the mock server
pub fn signed_client(server: &MockServer) -> PoloniexClient {
    PoloniexClient::with_config_and_base_url(
        Default::default(),
        Some(test_credentials()),
        &server.uri(),
    )
    .expect("client init")
}

/// Fast timeouts and short backoff for stream tests
pub fn test_stream_config() -> StreamConfig {
    StreamConfig {
        url: "ws://exchange.test".to_string(),
        realm: "realm1".to_string(),
        connect_timeout: Duration::from_secs(1),
        handshake_timeout: Duration::from_secs(1),
        reconnect: ReconnectPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            stable_after: Duration::from_secs(60),
        },
    }
}

/// Poll `check` until it holds, failing the test after a few seconds
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let waited = timeout(WAIT_LIMIT, async {
        while !check() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

pub async fn wait_for_state(subscription: &Subscription, expected: SubscriptionState) {
    let mut state = subscription.state();
    let reached = timeout(WAIT_LIMIT, async move {
        state.wait_for(|current| *current == expected).await.is_ok()
    })
    .await;
    assert!(matches!(reached, Ok(true)), "subscription never reached {expected:?}");
}

/// Handler forwarding updates into a channel
pub fn collector() -> (impl Fn(Update) + Send + Sync + 'static, mpsc::UnboundedReceiver<Update>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (move |update| {
        let _ = tx.send(update);
    }, rx)
}

pub async fn next_update<T>(updates: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(WAIT_LIMIT, updates.recv())
        .await
        .expect("no update in time")
        .expect("update channel closed")
}

/// One `orderBookModify` delta
pub fn book_args(rate: &str) -> Vec<Value> {
    vec![json!({
        "type": "orderBookModify",
        "data": {"type": "bid", "rate": rate, "amount": "1.5"}
    })]
}

pub fn ticker_args(pair: &str) -> Vec<Value> {
    vec![
        json!(pair),
        json!("0.0251"),
        json!("0.02589999"),
        json!("0.0251"),
        json!("0.02390438"),
        json!("6.16485315"),
        json!("245.82513926"),
        json!(0),
        json!("0.0260"),
        json!("0.0240"),
    ]
}

pub fn seq(value: u64) -> Map<String, Value> {
    let mut kwargs = Map::new();
    kwargs.insert("seq".to_string(), Value::from(value));
    kwargs
}

enum Delivery {
    Frame(String),
    Reset,
}

struct Session {
    outbox: Option<mpsc::UnboundedSender<Delivery>>,
    topics: HashMap<String, u64>,
}

impl Session {
    fn is_live(&self) -> bool {
        self.outbox.is_some()
    }

    fn reply(&self, message: WampMessage) {
        if let Some(outbox) = &self.outbox {
            let _ = outbox.send(Delivery::Frame(message.encode()));
        }
    }
}

#[derive(Default)]
struct ExchangeState {
    connect_attempts: usize,
    connects: usize,
    fail_connects: usize,
    reject_handshakes: usize,
    stall_writes: bool,
    next_id: u64,
    sessions: Vec<Session>,
}

/// In-memory WAMP broker. Answers HELLO and SUBSCRIBE synchronously and can
/// publish, corrupt or drop sessions on demand.
#[derive(Clone, Default)]
pub struct FakeExchange {
    state: Arc<Mutex<ExchangeState>>,
}

impl FakeExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self) -> StreamClient {
        self.client_with(test_stream_config())
    }

    pub fn client_with(&self, config: StreamConfig) -> StreamClient {
        StreamClient::with_connector(config, Arc::new(self.clone()))
    }

    /// Refuse the next `count` connection attempts at the transport level
    pub fn fail_next_connects(&self, count: usize) {
        self.lock().fail_connects = count;
    }

    /// Answer the next `count` HELLOs with something other than WELCOME
    pub fn reject_next_handshakes(&self, count: usize) {
        self.lock().reject_handshakes = count;
    }

    /// Once a session holds a subscription, its writes and close never complete
    pub fn stall_writes_after_subscribe(&self) {
        self.lock().stall_writes = true;
    }

    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    /// Transport-level connects that succeeded
    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn live_sessions(&self) -> usize {
        self.lock().sessions.iter().filter(|s| s.is_live()).count()
    }

    /// Live sessions currently subscribed to `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock()
            .sessions
            .iter()
            .filter(|s| s.is_live() && s.topics.contains_key(topic))
            .count()
    }

    /// Publish one EVENT to every live session subscribed to `topic`
    pub fn publish(&self, topic: &str, args: Vec<Value>, kwargs: Map<String, Value>) -> usize {
        let mut state = self.lock();
        state.next_id += 1;
        let publication = state.next_id;
        let mut sent = 0;
        for session in state.sessions.iter().filter(|s| s.is_live()) {
            if let Some(&subscription) = session.topics.get(topic) {
                session.reply(WampMessage::Event(EventFrame {
                    subscription,
                    publication,
                    args: args.clone(),
                    kwargs: kwargs.clone(),
                }));
                sent += 1;
            }
        }
        sent
    }

    pub fn publish_book(&self, pair: &str, rate: &str, sequence: u64) -> usize {
        self.publish(pair, book_args(rate), seq(sequence))
    }

    /// Push an arbitrary text frame to every live session
    pub fn publish_raw(&self, frame: &str) -> usize {
        let state = self.lock();
        let mut sent = 0;
        for outbox in state.sessions.iter().filter_map(|s| s.outbox.as_ref()) {
            let _ = outbox.send(Delivery::Frame(frame.to_string()));
            sent += 1;
        }
        sent
    }

    /// Break every live session with a transport error
    pub fn drop_connections(&self) -> usize {
        let mut state = self.lock();
        let mut dropped = 0;
        for session in state.sessions.iter_mut() {
            if let Some(outbox) = session.outbox.take() {
                let _ = outbox.send(Delivery::Reset);
                dropped += 1;
            }
        }
        dropped
    }

    fn lock(&self) -> MutexGuard<'_, ExchangeState> {
        self.state.lock().unwrap()
    }

    fn is_stalled(&self, index: usize) -> bool {
        let state = self.lock();
        state.stall_writes
            && state
                .sessions
                .get(index)
                .is_some_and(|session| !session.topics.is_empty())
    }

    fn end_session(&self, index: usize) {
        if let Some(session) = self.lock().sessions.get_mut(index) {
            session.outbox = None;
        }
    }
}

#[async_trait]
impl Connector for FakeExchange {
    async fn connect(&self) -> Result<FramePair> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(PoloniexError::WebSocket("connection refused".to_string()));
        }
        state.connects += 1;

        let (outbox, inbox) = mpsc::unbounded_channel();
        state.sessions.push(Session {
            outbox: Some(outbox),
            topics: HashMap::new(),
        });
        let session = state.sessions.len() - 1;
        drop(state);

        Ok((
            Box::new(FakeSink {
                exchange: self.clone(),
                session,
            }),
            Box::new(FakeSource { inbox }),
        ))
    }
}

struct FakeSink {
    exchange: FakeExchange,
    session: usize,
}

#[async_trait]
impl FrameSink for FakeSink {
    async fn send(&mut self, frame: String) -> Result<()> {
        if self.exchange.is_stalled(self.session) {
            std::future::pending::<()>().await;
        }
        let mut guard = self.exchange.lock();
        let ExchangeState {
            sessions,
            next_id,
            reject_handshakes,
            ..
        } = &mut *guard;
        let Some(session) = sessions.get_mut(self.session).filter(|s| s.is_live()) else {
            return Err(PoloniexError::WebSocket("socket closed".to_string()));
        };

        match WampMessage::decode(&frame)? {
            WampMessage::Hello { .. } if *reject_handshakes > 0 => {
                *reject_handshakes -= 1;
                session.reply(WampMessage::Goodbye {
                    reason: "wamp.close.try_later".to_string(),
                });
            }
            WampMessage::Hello { .. } => {
                session.reply(WampMessage::Welcome {
                    session: self.session as u64 + 1,
                });
            }
            WampMessage::Subscribe { request, topic } => {
                let subscription = *session.topics.entry(topic).or_insert_with(|| {
                    *next_id += 1;
                    *next_id
                });
                session.reply(WampMessage::Subscribed {
                    request,
                    subscription,
                });
            }
            WampMessage::Unsubscribe {
                request,
                subscription,
            } => {
                session.topics.retain(|_, id| *id != subscription);
                session.reply(WampMessage::Unsubscribed { request });
            }
            WampMessage::Goodbye { .. } => {
                session.outbox = None;
            }
            _ => {}
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.exchange.is_stalled(self.session) {
            std::future::pending::<()>().await;
        }
        self.exchange.end_session(self.session);
        Ok(())
    }
}

impl Drop for FakeSink {
    fn drop(&mut self) {
        self.exchange.end_session(self.session);
    }
}

struct FakeSource {
    inbox: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait]
impl FrameSource for FakeSource {
    async fn next_frame(&mut self) -> Option<Result<String>> {
        match self.inbox.recv().await? {
            Delivery::Frame(frame) => Some(Ok(frame)),
            Delivery::Reset => Some(Err(PoloniexError::WebSocket(
                "connection reset by peer".to_string(),
            ))),
        }
    }
}
