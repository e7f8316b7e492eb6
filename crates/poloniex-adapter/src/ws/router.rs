/*
[INPUT]:  EVENT frames and per-topic handler registrations
[OUTPUT]: Decoded updates delivered to every handler of the frame's topic
[POS]:    WebSocket layer - subscription-id to topic routing
[UPDATE]: When changing how updates are routed or dropped frames are counted
*/

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use crate::http::PoloniexError;
use crate::ws::message::{EventFrame, Topic, Update};

const PARSE_FAIL_LOG_LIMIT: usize = 3;
const UNROUTED_LOG_LIMIT: usize = 3;
const RAW_LOG_MAX_BYTES: usize = 1024;

static PARSE_FAIL_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);
static UNROUTED_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Callback receiving decoded updates for one subscription
pub type UpdateHandler = Arc<dyn Fn(Update) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// What happened to a dispatched EVENT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Decoded and handed to this many handlers
    Delivered(usize),
    /// No live subscription owns the frame
    Unrouted,
    /// Failed to decode; dropped and counted
    Malformed,
}

#[derive(Default)]
struct RouteTable {
    topics: HashMap<Topic, TopicRoute>,
    bindings: HashMap<u64, Topic>,
}

#[derive(Default)]
struct TopicRoute {
    subscriptions: Vec<u64>,
    handlers: Vec<(SubscriberId, UpdateHandler)>,
}

/// Routes EVENT frames to the handlers registered for their topic.
///
/// Handlers run outside the table lock, so a handler may register or
/// deregister without deadlocking.
pub struct TopicRouter {
    table: RwLock<RouteTable>,
    next_subscriber: AtomicU64,
    dropped: Arc<AtomicU64>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::with_drop_counter(Arc::new(AtomicU64::new(0)))
    }

    /// Share a malformed-frame counter across routers
    pub fn with_drop_counter(dropped: Arc<AtomicU64>) -> Self {
        Self {
            table: RwLock::new(RouteTable::default()),
            next_subscriber: AtomicU64::new(1),
            dropped,
        }
    }

    pub fn register(&self, topic: &Topic, handler: UpdateHandler) -> SubscriberId {
        let id = SubscriberId(self.next_subscriber.fetch_add(1, Ordering::Relaxed));
        self.write()
            .topics
            .entry(topic.clone())
            .or_default()
            .handlers
            .push((id, handler));
        id
    }

    /// Record the broker's subscription id for `topic`.
    /// Returns false if every handler left before the acknowledgement.
    pub fn bind(&self, topic: &Topic, subscription: u64) -> bool {
        let mut table = self.write();
        let Some(route) = table.topics.get_mut(topic) else {
            return false;
        };
        if !route.subscriptions.contains(&subscription) {
            route.subscriptions.push(subscription);
        }
        table.bindings.insert(subscription, topic.clone());
        true
    }

    /// Remove one handler. When it was the topic's last, the topic is
    /// dropped and its broker subscription ids are returned for UNSUBSCRIBE.
    pub fn deregister(&self, topic: &Topic, id: SubscriberId) -> Vec<u64> {
        let mut table = self.write();
        let Some(route) = table.topics.get_mut(topic) else {
            return Vec::new();
        };
        route.handlers.retain(|(subscriber, _)| *subscriber != id);
        if !route.handlers.is_empty() {
            return Vec::new();
        }

        let subscriptions = table
            .topics
            .remove(topic)
            .map(|route| route.subscriptions)
            .unwrap_or_default();
        for subscription in &subscriptions {
            table.bindings.remove(subscription);
        }
        subscriptions
    }

    pub fn is_registered(&self, topic: &Topic) -> bool {
        self.read().topics.contains_key(topic)
    }

    pub fn handler_count(&self, topic: &Topic) -> usize {
        self.read()
            .topics
            .get(topic)
            .map_or(0, |route| route.handlers.len())
    }

    pub fn dispatch(&self, event: EventFrame) -> Dispatch {
        let routed = {
            let table = self.read();
            table.bindings.get(&event.subscription).and_then(|topic| {
                table.topics.get(topic).map(|route| {
                    let handlers: Vec<UpdateHandler> =
                        route.handlers.iter().map(|(_, handler)| handler.clone()).collect();
                    (topic.clone(), handlers)
                })
            })
        };

        let Some((topic, handlers)) = routed else {
            log_unrouted_once(event.subscription);
            return Dispatch::Unrouted;
        };

        match topic.decode_update(&event) {
            Ok(update) => {
                for handler in &handlers {
                    handler(update.clone());
                }
                Dispatch::Delivered(handlers.len())
            }
            Err(err) => {
                let raw = serde_json::Value::Array(event.args).to_string();
                self.record_malformed(&err, &raw);
                Dispatch::Malformed
            }
        }
    }

    /// Count a frame that could not be decoded
    pub fn record_malformed(&self, err: &PoloniexError, raw: &str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        log_parse_fail_once(err, raw);
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn read(&self) -> RwLockReadGuard<'_, RouteTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RouteTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TopicRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.read();
        f.debug_struct("TopicRouter")
            .field("topics", &table.topics.keys().collect::<Vec<_>>())
            .field("bindings", &table.bindings.len())
            .field("dropped", &self.dropped_frames())
            .finish()
    }
}

fn log_unrouted_once(subscription: u64) {
    let count = UNROUTED_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < UNROUTED_LOG_LIMIT {
        debug!(
            sample_index = count + 1,
            sample_limit = UNROUTED_LOG_LIMIT,
            subscription,
            "ws event for unknown subscription dropped"
        );
    }
}

fn log_parse_fail_once(err: &PoloniexError, raw: &str) {
    let count = PARSE_FAIL_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < PARSE_FAIL_LOG_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            error = %err,
            bytes = raw.len(),
            "ws frame decode failed"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            error = %err,
            bytes = raw.len(),
            message = %preview,
            "ws frame decode failed"
        );
    }
}

fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::with_capacity(end + 3);
    out.push_str(&value[..end]);
    out.push_str("...");
    out
}
