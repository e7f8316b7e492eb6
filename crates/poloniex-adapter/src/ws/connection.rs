/*
[INPUT]:  A Connector, stream configuration and topic registrations
[OUTPUT]: One WAMP session with a background I/O task feeding the TopicRouter
[POS]:    WebSocket layer - the shared push connection
[UPDATE]: When changing handshake, request/ack handling or teardown
*/

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::http::{PoloniexError, Result};
use crate::ws::client::StreamConfig;
use crate::ws::lock;
use crate::ws::message::{Topic, WampMessage, code};
use crate::ws::router::{SubscriberId, TopicRouter, UpdateHandler};
use crate::ws::transport::{Connector, FrameSink, FrameSource};

const CLIENT_GOODBYE: &str = "wamp.close.system_shutdown";

type PendingRequests = Mutex<HashMap<u64, PendingSubscribe>>;

struct PendingSubscribe {
    topic: Topic,
    reply: oneshot::Sender<Result<u64>>,
}

/// Why the session ended
#[derive(Debug, Clone)]
enum CloseCause {
    Client,
    Peer(String),
    Transport(String),
}

impl CloseCause {
    fn into_error(self, id: u64) -> PoloniexError {
        match self {
            CloseCause::Client => PoloniexError::WebSocket(format!("connection {id} closed locally")),
            CloseCause::Peer(reason) => {
                PoloniexError::Protocol(format!("connection {id} closed by peer: {reason}"))
            }
            CloseCause::Transport(reason) => {
                PoloniexError::WebSocket(format!("connection {id} lost: {reason}"))
            }
        }
    }
}

/// A live WAMP session shared by every subscription on the client
pub(crate) struct StreamConnection {
    id: u64,
    outbound: mpsc::UnboundedSender<String>,
    router: Arc<TopicRouter>,
    pending: Arc<PendingRequests>,
    next_request: Arc<AtomicU64>,
    request_timeout: Duration,
    shutdown: CancellationToken,
    closed: CancellationToken,
    cause: Arc<Mutex<Option<CloseCause>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamConnection {
    /// Connect, complete the HELLO/WELCOME handshake and start the I/O task
    pub(crate) async fn open(
        id: u64,
        connector: &dyn Connector,
        config: &StreamConfig,
        router: Arc<TopicRouter>,
    ) -> Result<Arc<Self>> {
        let (mut sink, mut source) = timeout(config.connect_timeout, connector.connect())
            .await
            .map_err(|_| PoloniexError::timeout("connect", config.connect_timeout))??;

        let session = match handshake(&mut *sink, &mut *source, config).await {
            Ok(session) => session,
            Err(err) => {
                close_within(&mut *sink, config.handshake_timeout).await;
                return Err(err);
            }
        };
        info!(connection_id = id, session, realm = %config.realm, "stream handshake complete");

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(PendingRequests::default());
        let shutdown = CancellationToken::new();
        let closed = CancellationToken::new();
        let cause = Arc::new(Mutex::new(None));
        let next_request = Arc::new(AtomicU64::new(1));

        let io = ConnectionIo {
            id,
            frames: FrameHandler {
                id,
                router: router.clone(),
                pending: pending.clone(),
                outbound: outbound.clone(),
                next_request: next_request.clone(),
            },
            shutdown: shutdown.clone(),
            closed: closed.clone(),
            cause: cause.clone(),
            close_timeout: config.handshake_timeout,
        };
        let task = tokio::spawn(io.run(sink, source, outbound_rx));

        Ok(Arc::new(Self {
            id,
            outbound,
            router,
            pending,
            next_request,
            request_timeout: config.handshake_timeout,
            shutdown,
            closed,
            cause,
            task: Mutex::new(Some(task)),
        }))
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the I/O task has exited
    pub(crate) async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Whether the session was ended by this client rather than the peer or transport
    pub(crate) fn closed_locally(&self) -> bool {
        matches!(*lock(&self.cause), Some(CloseCause::Client))
    }

    pub(crate) fn close_reason(&self) -> PoloniexError {
        lock(&self.cause)
            .clone()
            .unwrap_or(CloseCause::Client)
            .into_error(self.id)
    }

    /// Register `handler` for `topic` and wait for the broker's SUBSCRIBED.
    /// The handler stays registered for as long as the returned guard lives.
    pub(crate) async fn subscribe(
        self: &Arc<Self>,
        topic: &Topic,
        handler: UpdateHandler,
    ) -> Result<TopicGuard> {
        if self.is_closed() {
            return Err(self.close_reason());
        }

        let subscriber = self.router.register(topic, handler);
        let guard = TopicGuard {
            connection: self.clone(),
            topic: topic.clone(),
            subscriber,
        };

        let request = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (reply, acknowledged) = oneshot::channel();
        lock(&self.pending).insert(
            request,
            PendingSubscribe {
                topic: topic.clone(),
                reply,
            },
        );
        let _pending = PendingEntry {
            pending: &self.pending,
            request,
        };

        let frame = WampMessage::Subscribe {
            request,
            topic: topic.name().to_string(),
        }
        .encode();
        if self.outbound.send(frame).is_err() {
            return Err(self.close_reason());
        }

        match timeout(self.request_timeout, acknowledged).await {
            Ok(Ok(Ok(subscription))) => {
                debug!(connection_id = self.id, topic = %topic, subscription, "topic subscribed");
                Ok(guard)
            }
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(self.close_reason()),
            Err(_) => Err(PoloniexError::timeout("subscribe", self.request_timeout)),
        }
    }

    /// Send GOODBYE and let the I/O task wind down
    pub(crate) fn close(&self) {
        if !self.shutdown.is_cancelled() {
            debug!(connection_id = self.id, "stream connection closing");
        }
        self.shutdown.cancel();
    }

    /// Abort the I/O task, releasing the socket immediately
    pub(crate) fn terminate(&self) {
        self.shutdown.cancel();
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
        record_cause(&self.cause, CloseCause::Client);
        lock(&self.pending).clear();
        self.closed.cancel();
    }

    fn release(&self, topic: &Topic, subscriber: SubscriberId) {
        let subscriptions = self.router.deregister(topic, subscriber);
        if self.is_closed() {
            return;
        }
        for subscription in subscriptions {
            let request = self.next_request.fetch_add(1, Ordering::Relaxed);
            debug!(connection_id = self.id, topic = %topic, subscription, "topic released");
            let _ = self.outbound.send(
                WampMessage::Unsubscribe {
                    request,
                    subscription,
                }
                .encode(),
            );
        }
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Keeps one handler registered on a connection
pub(crate) struct TopicGuard {
    connection: Arc<StreamConnection>,
    topic: Topic,
    subscriber: SubscriberId,
}

impl TopicGuard {
    pub(crate) fn connection(&self) -> &Arc<StreamConnection> {
        &self.connection
    }
}

impl Drop for TopicGuard {
    fn drop(&mut self) {
        self.connection.release(&self.topic, self.subscriber);
    }
}

/// Removes an in-flight SUBSCRIBE when its caller stops waiting
struct PendingEntry<'a> {
    pending: &'a PendingRequests,
    request: u64,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.request);
    }
}

fn record_cause(slot: &Mutex<Option<CloseCause>>, cause: CloseCause) {
    let mut slot = lock(slot);
    if slot.is_none() {
        *slot = Some(cause);
    }
}

/// Close `sink`, abandoning it if the close does not finish within `limit`
async fn close_within(sink: &mut dyn FrameSink, limit: Duration) {
    if timeout(limit, sink.close()).await.is_err() {
        warn!(timeout_ms = limit.as_millis() as u64, "stream close timed out, dropping socket");
    }
}

async fn handshake(
    sink: &mut dyn FrameSink,
    source: &mut dyn FrameSource,
    config: &StreamConfig,
) -> Result<u64> {
    let hello = WampMessage::Hello {
        realm: config.realm.clone(),
    }
    .encode();
    timeout(config.handshake_timeout, sink.send(hello))
        .await
        .map_err(|_| PoloniexError::timeout("handshake", config.handshake_timeout))??;

    let frame = match timeout(config.handshake_timeout, source.next_frame()).await {
        Err(_) => return Err(PoloniexError::timeout("handshake", config.handshake_timeout)),
        Ok(None) => {
            return Err(PoloniexError::Protocol(
                "stream closed before handshake acknowledgement".to_string(),
            ));
        }
        Ok(Some(frame)) => frame?,
    };

    match WampMessage::decode(&frame) {
        Ok(WampMessage::Welcome { session }) => Ok(session),
        Ok(WampMessage::Abort { reason }) => {
            Err(PoloniexError::Protocol(format!("handshake aborted: {reason}")))
        }
        Ok(other) => Err(PoloniexError::Protocol(format!(
            "expected WELCOME, got {}",
            other.name()
        ))),
        Err(err) => Err(PoloniexError::Protocol(format!(
            "undecodable handshake reply: {err}"
        ))),
    }
}

struct ConnectionIo {
    id: u64,
    frames: FrameHandler,
    shutdown: CancellationToken,
    closed: CancellationToken,
    cause: Arc<Mutex<Option<CloseCause>>>,
    close_timeout: Duration,
}

impl ConnectionIo {
    async fn run(
        self,
        mut sink: Box<dyn FrameSink>,
        mut source: Box<dyn FrameSource>,
        mut outbound: mpsc::UnboundedReceiver<String>,
    ) {
        let cause = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.say_goodbye(&mut *sink).await;
                    break CloseCause::Client;
                }
                frame = outbound.recv() => {
                    let Some(frame) = frame else {
                        break CloseCause::Client;
                    };
                    // A stalled write must not hide a shutdown request
                    let written = tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => None,
                        written = sink.send(frame) => Some(written),
                    };
                    match written {
                        None => {
                            self.say_goodbye(&mut *sink).await;
                            break CloseCause::Client;
                        }
                        Some(Err(err)) => {
                            warn!(connection_id = self.id, error = %err, "stream write failed");
                            break CloseCause::Transport(err.to_string());
                        }
                        Some(Ok(())) => {}
                    }
                }
                inbound = source.next_frame() => match inbound {
                    Some(Ok(frame)) => {
                        if let ControlFlow::Break(cause) = self.frames.handle(&frame) {
                            close_within(&mut *sink, self.close_timeout).await;
                            break cause;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(connection_id = self.id, error = %err, "stream read failed");
                        break CloseCause::Transport(err.to_string());
                    }
                    None => {
                        break CloseCause::Transport("closed by peer".to_string());
                    }
                },
            }
        };

        info!(connection_id = self.id, cause = ?cause, "stream connection ended");
        record_cause(&self.cause, cause);
        // Dropping the senders wakes every waiting subscribe with the close reason
        lock(&self.frames.pending).clear();
        self.closed.cancel();
    }

    /// GOODBYE then close, bounded so a wedged socket is still released
    async fn say_goodbye(&self, sink: &mut dyn FrameSink) {
        let goodbye = WampMessage::Goodbye {
            reason: CLIENT_GOODBYE.to_string(),
        }
        .encode();
        let farewell = async {
            let _ = sink.send(goodbye).await;
            let _ = sink.close().await;
        };
        if timeout(self.close_timeout, farewell).await.is_err() {
            warn!(connection_id = self.id, "stream close timed out, dropping socket");
        }
    }
}

struct FrameHandler {
    id: u64,
    router: Arc<TopicRouter>,
    pending: Arc<PendingRequests>,
    outbound: mpsc::UnboundedSender<String>,
    next_request: Arc<AtomicU64>,
}

impl FrameHandler {
    fn handle(&self, frame: &str) -> ControlFlow<CloseCause> {
        let message = match WampMessage::decode(frame) {
            Ok(message) => message,
            Err(err) => {
                self.router.record_malformed(&err, frame);
                return ControlFlow::Continue(());
            }
        };

        match message {
            WampMessage::Event(event) => {
                self.router.dispatch(event);
            }
            WampMessage::Subscribed {
                request,
                subscription,
            } => {
                let Some(pending) = lock(&self.pending).remove(&request) else {
                    debug!(connection_id = self.id, request, "acknowledgement for unknown request");
                    return ControlFlow::Continue(());
                };
                if self.router.bind(&pending.topic, subscription) {
                    let _ = pending.reply.send(Ok(subscription));
                } else {
                    // Every subscriber left while the request was in flight
                    let unsubscribe = WampMessage::Unsubscribe {
                        request: self.next_request.fetch_add(1, Ordering::Relaxed),
                        subscription,
                    };
                    let _ = self.outbound.send(unsubscribe.encode());
                }
            }
            WampMessage::Error {
                request_type,
                request,
                error,
            } => {
                let pending = if request_type == code::SUBSCRIBE {
                    lock(&self.pending).remove(&request)
                } else {
                    None
                };
                match pending {
                    Some(pending) => {
                        warn!(connection_id = self.id, topic = %pending.topic, error = %error, "subscribe rejected");
                        let _ = pending.reply.send(Err(PoloniexError::Protocol(format!(
                            "subscribe to {} rejected: {error}",
                            pending.topic
                        ))));
                    }
                    None => {
                        debug!(connection_id = self.id, request_type, request, error = %error, "broker error");
                    }
                }
            }
            WampMessage::Goodbye { reason } | WampMessage::Abort { reason } => {
                info!(connection_id = self.id, reason = %reason, "session ended by peer");
                return ControlFlow::Break(CloseCause::Peer(reason));
            }
            WampMessage::Unsubscribed { request } => {
                debug!(connection_id = self.id, request, "topic unsubscribed");
            }
            other => {
                debug!(connection_id = self.id, message = other.name(), "unexpected frame ignored");
            }
        }

        ControlFlow::Continue(())
    }
}
