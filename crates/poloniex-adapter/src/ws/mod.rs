/*
[INPUT]:  Stream configuration, topics and control signals
[OUTPUT]: Decoded push updates delivered to subscriber handlers
[POS]:    WebSocket layer - WAMP push stream
[UPDATE]: When adding new topics or changing connection logic
*/

pub mod client;
pub(crate) mod connection;
pub mod message;
pub mod router;
pub mod subscription;
pub mod transport;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use client::{StreamClient, StreamConfig};
pub use message::{
    BookModify, BookRemove, EventFrame, MarketEvent, MarketUpdate, TickerUpdate, Topic,
    TradeEvent, Update, WampMessage, WAMP_SUBPROTOCOL,
};
pub use router::{Dispatch, TopicRouter, UpdateHandler};
pub use subscription::{Control, ReconnectPolicy, Subscription, SubscriptionState};
pub use transport::{Connector, FramePair, FrameSink, FrameSource, WsConnector};

/// Poisoned locks are recovered; the guarded state stays consistent per operation
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
