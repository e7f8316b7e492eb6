/*
[INPUT]:  Stream configuration, topics, handlers and control channels
[OUTPUT]: Managed subscriptions over one lazily opened shared connection
[POS]:    WebSocket layer - public streaming entry point
[UPDATE]: When changing connection sharing, unsubscribe or close semantics
*/

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::http::{PoloniexError, Result};
use crate::ws::connection::StreamConnection;
use crate::ws::lock;
use crate::ws::message::{MarketUpdate, TickerUpdate, Topic, Update};
use crate::ws::router::{TopicRouter, UpdateHandler};
use crate::ws::subscription::{
    Control, ReconnectPolicy, Subscription, SubscriptionController, SubscriptionState,
};
use crate::ws::transport::{Connector, WsConnector};

const STREAM_URL: &str = "wss://api.poloniex.com";
const DEFAULT_REALM: &str = "realm1";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CONTROL_CAPACITY: usize = 8;

/// Push connection settings
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: String,
    pub realm: String,
    pub connect_timeout: Duration,
    /// Bound on WELCOME, on each SUBSCRIBED acknowledgement and on the closing GOODBYE
    pub handshake_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: STREAM_URL.to_string(),
            realm: DEFAULT_REALM.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl StreamConfig {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

/// Streaming client. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct StreamClient {
    shared: Arc<StreamShared>,
}

impl StreamClient {
    pub fn new() -> Self {
        Self::with_config(StreamConfig::default())
    }

    pub fn with_config(config: StreamConfig) -> Self {
        let connector = Arc::new(WsConnector::new(config.url.clone()));
        Self::with_connector(config, connector)
    }

    /// Use a custom transport, e.g. an in-memory exchange in tests
    pub fn with_connector(config: StreamConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            shared: Arc::new(StreamShared::new(config, connector)),
        }
    }

    /// Run a subscription until `control` yields `Stop` (or closes),
    /// `unsubscribe_all`/`close` is called, or the topic is rejected as malformed.
    ///
    /// Returns the last connection error if the subscription was stopped while
    /// failing to reconnect.
    pub async fn subscribe<F>(
        &self,
        topic: &str,
        handler: F,
        control: mpsc::Receiver<Control>,
    ) -> Result<()>
    where
        F: Fn(Update) + Send + Sync + 'static,
    {
        let topic = Topic::parse(topic)?;
        let (state, _) = watch::channel(SubscriptionState::Idle);
        let controller = self.controller(topic, Arc::new(handler), control, state)?;
        controller.run().await
    }

    /// Run a subscription on its own task
    pub fn spawn<F>(&self, topic: &str, handler: F) -> Result<Subscription>
    where
        F: Fn(Update) + Send + Sync + 'static,
    {
        let topic = Topic::parse(topic)?;
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Idle);
        let controller = self.controller(topic.clone(), Arc::new(handler), control_rx, state_tx)?;
        let task = tokio::spawn(controller.run());
        Ok(Subscription::new(topic, control_tx, state_rx, task))
    }

    /// Order book deltas and trades for `pair`, forwarded to `updates`
    pub async fn subscribe_order_book(
        &self,
        pair: &str,
        updates: mpsc::UnboundedSender<MarketUpdate>,
        control: mpsc::Receiver<Control>,
    ) -> Result<()> {
        let topic = Topic::order_book(pair)?;
        self.subscribe(
            topic.name(),
            move |update| {
                if let Update::Market(update) = update {
                    let _ = updates.send(update);
                }
            },
            control,
        )
        .await
    }

    /// Ticker ticks for every market, forwarded to `updates`
    pub async fn subscribe_ticker(
        &self,
        updates: mpsc::UnboundedSender<TickerUpdate>,
        control: mpsc::Receiver<Control>,
    ) -> Result<()> {
        self.subscribe(
            Topic::Ticker.name(),
            move |update| {
                if let Update::Ticker(update) = update {
                    let _ = updates.send(update);
                }
            },
            control,
        )
        .await
    }

    /// Stop every subscription started before this call and wait for them.
    /// The shared connection is released unless a newer subscription uses it.
    pub async fn unsubscribe_all(&self) -> Result<()> {
        let previous = self.shared.rotate_generation();
        previous.stop.cancel();

        let mut remaining = previous.active.subscribe();
        let _ = remaining.wait_for(|count| *count == 0).await;

        if self.shared.active.load(Ordering::Acquire) == 0 {
            self.shared.release_connection();
        }
        info!("all subscriptions stopped");
        Ok(())
    }

    /// Stop everything and release the socket without waiting.
    /// Later subscriptions fail with `Closed`.
    pub fn close(&self) {
        self.shared.closed.cancel();
        lock(&self.shared.generation).stop.cancel();
        let connection = lock(&self.shared.slot).take();
        if let Some(connection) = connection {
            connection.terminate();
        }
        info!("stream client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Whether a live connection is currently held
    pub fn is_connected(&self) -> bool {
        self.shared.current().is_some()
    }

    /// Subscriptions currently running
    pub fn active_subscriptions(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Frames dropped because they could not be decoded
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    fn controller(
        &self,
        topic: Topic,
        handler: UpdateHandler,
        control: mpsc::Receiver<Control>,
        state: watch::Sender<SubscriptionState>,
    ) -> Result<SubscriptionController> {
        if self.is_closed() {
            return Err(PoloniexError::Closed);
        }
        let (stop, active) = self.shared.enroll();
        Ok(SubscriptionController::new(
            self.shared.clone(),
            topic,
            handler,
            control,
            state,
            stop,
            active,
        ))
    }
}

impl Default for StreamClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("url", &self.shared.config.url)
            .field("active", &self.active_subscriptions())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Subscriptions enrolled between two `unsubscribe_all` calls
struct Generation {
    stop: CancellationToken,
    active: watch::Sender<usize>,
}

impl Generation {
    fn new() -> Arc<Self> {
        let (active, _) = watch::channel(0);
        Arc::new(Self {
            stop: CancellationToken::new(),
            active,
        })
    }
}

pub(crate) struct StreamShared {
    config: StreamConfig,
    connector: Arc<dyn Connector>,
    connect_lock: tokio::sync::Mutex<()>,
    slot: Mutex<Option<Arc<StreamConnection>>>,
    next_connection_id: AtomicU64,
    generation: Mutex<Arc<Generation>>,
    active: AtomicUsize,
    closed: CancellationToken,
    dropped: Arc<AtomicU64>,
}

impl StreamShared {
    fn new(config: StreamConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            connect_lock: tokio::sync::Mutex::new(()),
            slot: Mutex::new(None),
            next_connection_id: AtomicU64::new(1),
            generation: Mutex::new(Generation::new()),
            active: AtomicUsize::new(0),
            closed: CancellationToken::new(),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// The live shared connection, opening one if needed.
    /// Concurrent callers wait on one connect attempt.
    pub(crate) async fn connection(&self) -> Result<Arc<StreamConnection>> {
        if self.closed.is_cancelled() {
            return Err(PoloniexError::Closed);
        }
        if let Some(connection) = self.current() {
            return Ok(connection);
        }

        let _connecting = self.connect_lock.lock().await;
        if self.closed.is_cancelled() {
            return Err(PoloniexError::Closed);
        }
        if let Some(connection) = self.current() {
            return Ok(connection);
        }

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        info!(connection_id = id, url = %self.config.url, "opening stream connection");
        let router = Arc::new(TopicRouter::with_drop_counter(self.dropped.clone()));
        let connection =
            StreamConnection::open(id, self.connector.as_ref(), &self.config, router).await?;

        if self.closed.is_cancelled() {
            connection.terminate();
            return Err(PoloniexError::Closed);
        }
        *lock(&self.slot) = Some(connection.clone());
        Ok(connection)
    }

    /// Drop `connection` from the slot and close it; its subscribers reconnect
    pub(crate) fn reset(&self, connection: &Arc<StreamConnection>) {
        {
            let mut slot = lock(&self.slot);
            if slot
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, connection))
            {
                slot.take();
            }
        }
        connection.close();
    }

    fn current(&self) -> Option<Arc<StreamConnection>> {
        lock(&self.slot)
            .as_ref()
            .filter(|connection| !connection.is_closed())
            .cloned()
    }

    fn release_connection(&self) {
        let released = lock(&self.slot).take();
        if let Some(connection) = released {
            debug!(connection_id = connection.id(), "releasing idle stream connection");
            connection.close();
        }
    }

    fn rotate_generation(&self) -> Arc<Generation> {
        std::mem::replace(&mut *lock(&self.generation), Generation::new())
    }

    fn enroll(self: &Arc<Self>) -> (CancellationToken, ActiveGuard) {
        let generation = lock(&self.generation).clone();
        generation.active.send_modify(|count| *count += 1);
        self.active.fetch_add(1, Ordering::AcqRel);
        let stop = generation.stop.child_token();
        let guard = ActiveGuard {
            shared: self.clone(),
            generation,
        };
        (stop, guard)
    }
}

/// Counts one running subscription; the last one out releases the connection
pub(crate) struct ActiveGuard {
    shared: Arc<StreamShared>,
    generation: Arc<Generation>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.shared.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.release_connection();
        }
        self.generation.active.send_modify(|count| *count -= 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.url, "wss://api.poloniex.com");
        assert_eq!(config.realm, "realm1");
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_malformed_topic_fails_before_connecting() {
        let client = StreamClient::with_config(StreamConfig::default().with_url("ws://127.0.0.1:1"));
        let (_tx, rx) = mpsc::channel(1);
        let err = client.subscribe("not a pair", |_| {}, rx).await.unwrap_err();
        assert!(matches!(err, PoloniexError::Config(_)));
        assert_eq!(client.active_subscriptions(), 0);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_subscribe_after_close_is_refused() {
        let client = StreamClient::new();
        client.close();
        let (_tx, rx) = mpsc::channel(1);
        let err = client.subscribe("ticker", |_| {}, rx).await.unwrap_err();
        assert!(matches!(err, PoloniexError::Closed));
    }
}
