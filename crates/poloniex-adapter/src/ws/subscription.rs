/*
[INPUT]:  Topic, update handler and caller control signals
[OUTPUT]: A reconnecting subscription loop and its observable state
[POS]:    WebSocket layer - per-subscription state machine
[UPDATE]: When changing reconnect policy or control semantics
*/

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::http::{ErrorKind, PoloniexError, Result};
use crate::ws::client::{ActiveGuard, StreamShared};
use crate::ws::connection::TopicGuard;
use crate::ws::message::Topic;
use crate::ws::router::UpdateHandler;

const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_STABLE_AFTER: Duration = Duration::from_secs(10);

/// Caller instruction for a running subscription.
/// A closed control channel is read as `Stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Stop,
    /// Tear down the connection and subscribe again
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Connecting,
    Subscribed,
    Reconnecting,
    Stopped,
}

/// Backoff between reconnect attempts
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Sessions that lasted this long reconnect without delay
    pub stable_after: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            stable_after: DEFAULT_STABLE_AFTER,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt after `failures` consecutive failures
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exp = (failures - 1).min(31);
        self.initial_delay
            .saturating_mul(1_u32 << exp)
            .min(self.max_delay)
    }
}

/// Handle to a subscription running on its own task.
/// Dropping the handle closes the control channel, which stops the subscription.
#[derive(Debug)]
pub struct Subscription {
    topic: Topic,
    control: mpsc::Sender<Control>,
    state: watch::Receiver<SubscriptionState>,
    task: JoinHandle<Result<()>>,
}

impl Subscription {
    pub(crate) fn new(
        topic: Topic,
        control: mpsc::Sender<Control>,
        state: watch::Receiver<SubscriptionState>,
        task: JoinHandle<Result<()>>,
    ) -> Self {
        Self {
            topic,
            control,
            state,
            task,
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Force a reconnect. Returns false once the subscription has stopped.
    pub async fn reset(&self) -> bool {
        self.control.send(Control::Reset).await.is_ok()
    }

    /// Request stop and wait for the loop to finish
    pub async fn stop(self) -> Result<()> {
        let _ = self.control.send(Control::Stop).await;
        self.join().await
    }

    pub fn state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.clone()
    }

    pub fn current_state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the subscription to reach `Stopped` on its own
    pub async fn join(self) -> Result<()> {
        let Subscription { control, task, .. } = self;
        let outcome = task.await;
        drop(control);
        match outcome {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(PoloniexError::Closed),
        }
    }
}

enum Attempt {
    Interrupted(Control),
    Attached(Result<TopicGuard>),
}

enum SessionExit {
    Signal(Control),
    Dropped,
}

/// Drives one subscription through Connecting / Subscribed / Reconnecting until Stopped
pub(crate) struct SubscriptionController {
    shared: Arc<StreamShared>,
    topic: Topic,
    handler: UpdateHandler,
    control: mpsc::Receiver<Control>,
    stop: CancellationToken,
    state: watch::Sender<SubscriptionState>,
    policy: ReconnectPolicy,
    _active: ActiveGuard,
}

impl SubscriptionController {
    pub(crate) fn new(
        shared: Arc<StreamShared>,
        topic: Topic,
        handler: UpdateHandler,
        control: mpsc::Receiver<Control>,
        state: watch::Sender<SubscriptionState>,
        stop: CancellationToken,
        active: ActiveGuard,
    ) -> Self {
        let policy = shared.config().reconnect.clone();
        Self {
            shared,
            topic,
            handler,
            control,
            stop,
            state,
            policy,
            _active: active,
        }
    }

    pub(crate) async fn run(mut self) -> Result<()> {
        let mut last_error: Option<PoloniexError> = None;
        let mut failures: u32 = 0;

        loop {
            self.transition(SubscriptionState::Connecting);

            let attempt = tokio::select! {
                biased;
                signal = next_signal(&mut self.control, &self.stop) => Attempt::Interrupted(signal),
                attached = attach(&self.shared, &self.topic, &self.handler) => Attempt::Attached(attached),
            };

            let guard = match attempt {
                Attempt::Interrupted(Control::Stop) => return self.finish(last_error),
                Attempt::Interrupted(Control::Reset) => {
                    debug!(topic = %self.topic, "reset while connecting, retrying");
                    continue;
                }
                Attempt::Attached(Err(err)) if err.kind() == ErrorKind::Config => {
                    return self.finish(Some(err));
                }
                Attempt::Attached(Err(err)) => {
                    failures = failures.saturating_add(1);
                    let delay = self.policy.delay(failures);
                    warn!(
                        topic = %self.topic,
                        attempt = failures,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "subscription attempt failed"
                    );
                    last_error = Some(err);
                    self.transition(SubscriptionState::Reconnecting);
                    if self.pause(delay).await == Some(Control::Stop) {
                        return self.finish(last_error);
                    }
                    continue;
                }
                Attempt::Attached(Ok(guard)) => guard,
            };

            last_error = None;
            let connection = guard.connection().clone();
            self.transition(SubscriptionState::Subscribed);
            info!(topic = %self.topic, connection_id = connection.id(), "subscription active");
            let started = Instant::now();

            let exit = tokio::select! {
                biased;
                signal = next_signal(&mut self.control, &self.stop) => SessionExit::Signal(signal),
                _ = connection.closed() => SessionExit::Dropped,
            };
            drop(guard);

            match exit {
                SessionExit::Signal(Control::Stop) => return self.finish(None),
                SessionExit::Signal(Control::Reset) => {
                    info!(topic = %self.topic, connection_id = connection.id(), "reset requested");
                    self.shared.reset(&connection);
                    failures = 0;
                    self.transition(SubscriptionState::Reconnecting);
                }
                SessionExit::Dropped if connection.closed_locally() => {
                    // Another subscriber reset the shared connection
                    debug!(
                        topic = %self.topic,
                        connection_id = connection.id(),
                        "connection rebuilt locally, resubscribing"
                    );
                    self.transition(SubscriptionState::Reconnecting);
                }
                SessionExit::Dropped => {
                    let err = connection.close_reason();
                    failures = if started.elapsed() >= self.policy.stable_after {
                        0
                    } else {
                        failures.saturating_add(1)
                    };
                    let delay = self.policy.delay(failures);
                    warn!(
                        topic = %self.topic,
                        connection_id = connection.id(),
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "stream dropped, reconnecting"
                    );
                    last_error = Some(err);
                    self.transition(SubscriptionState::Reconnecting);
                    if self.pause(delay).await == Some(Control::Stop) {
                        return self.finish(last_error);
                    }
                }
            }
        }
    }

    /// Wait out a backoff delay; a signal cuts it short
    async fn pause(&mut self, delay: Duration) -> Option<Control> {
        tokio::select! {
            biased;
            signal = next_signal(&mut self.control, &self.stop) => Some(signal),
            _ = sleep(delay) => None,
        }
    }

    fn transition(&self, next: SubscriptionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(topic = %self.topic, from = ?previous, to = ?next, "subscription state");
        }
    }

    fn finish(&self, last_error: Option<PoloniexError>) -> Result<()> {
        self.transition(SubscriptionState::Stopped);
        match last_error {
            Some(err) => {
                info!(topic = %self.topic, error = %err, "subscription stopped after failure");
                Err(err)
            }
            None => {
                info!(topic = %self.topic, "subscription stopped");
                Ok(())
            }
        }
    }
}

async fn attach(shared: &StreamShared, topic: &Topic, handler: &UpdateHandler) -> Result<TopicGuard> {
    let connection = shared.connection().await?;
    connection.subscribe(topic, handler.clone()).await
}

async fn next_signal(control: &mut mpsc::Receiver<Control>, stop: &CancellationToken) -> Control {
    tokio::select! {
        biased;
        _ = stop.cancelled() => Control::Stop,
        signal = control.recv() => signal.unwrap_or(Control::Stop),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0)]
    #[case(1, 500)]
    #[case(2, 1_000)]
    #[case(4, 4_000)]
    #[case(7, 30_000)]
    #[case(40, 30_000)]
    fn test_backoff_doubles_and_clamps(#[case] failures: u32, #[case] expected_ms: u64) {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(failures), Duration::from_millis(expected_ms));
    }

    #[tokio::test]
    async fn test_closed_control_channel_reads_as_stop() {
        let (tx, mut rx) = mpsc::channel(1);
        drop(tx);
        let stop = CancellationToken::new();
        assert_eq!(next_signal(&mut rx, &stop).await, Control::Stop);
    }

    #[tokio::test]
    async fn test_cancelled_token_wins_over_queued_reset() {
        let (tx, mut rx) = mpsc::channel(1);
        tx.send(Control::Reset).await.unwrap();
        let stop = CancellationToken::new();
        stop.cancel();
        assert_eq!(next_signal(&mut rx, &stop).await, Control::Stop);
    }

    #[tokio::test]
    async fn test_reset_is_delivered() {
        let (tx, mut rx) = mpsc::channel(1);
        tx.send(Control::Reset).await.unwrap();
        let stop = CancellationToken::new();
        assert_eq!(next_signal(&mut rx, &stop).await, Control::Reset);
    }
}
