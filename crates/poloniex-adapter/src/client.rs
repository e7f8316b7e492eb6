/*
[INPUT]:  REST client configuration, credentials and stream configuration
[OUTPUT]: One handle for signed commands and streaming subscriptions
[POS]:    Crate facade - consumer entry point
[UPDATE]: When the consumer-facing operations change
*/

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::http::{ClientConfig, Credentials, PoloniexClient, Result};
use crate::ws::{Control, MarketUpdate, StreamClient, StreamConfig, TickerUpdate, Update};

/// REST and streaming access to the exchange.
///
/// Share it behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct Poloniex {
    rest: PoloniexClient,
    stream: StreamClient,
}

impl Poloniex {
    /// Public data and streaming only
    pub fn public() -> Result<Self> {
        Ok(Self::from_parts(PoloniexClient::new()?, StreamClient::new()))
    }

    pub fn new(credentials: Credentials) -> Result<Self> {
        Self::with_config(ClientConfig::default(), StreamConfig::default(), Some(credentials))
    }

    pub fn with_config(
        config: ClientConfig,
        stream_config: StreamConfig,
        credentials: Option<Credentials>,
    ) -> Result<Self> {
        let rest = PoloniexClient::with_config(config, credentials)?;
        Ok(Self::from_parts(rest, StreamClient::with_config(stream_config)))
    }

    pub fn from_parts(rest: PoloniexClient, stream: StreamClient) -> Self {
        Self { rest, stream }
    }

    pub fn rest(&self) -> &PoloniexClient {
        &self.rest
    }

    pub fn stream(&self) -> &StreamClient {
        &self.stream
    }

    /// Log full request and response bodies at debug level
    pub fn set_debug(&self, enable: bool) {
        self.rest.set_debug(enable);
    }

    /// Sign and send one private command, decoding the result into `T`
    pub async fn execute_signed_command<T>(&self, command: &str, params: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.rest.execute(command, params).await
    }

    /// See [`StreamClient::subscribe`]
    pub async fn subscribe<F>(&self, topic: &str, handler: F, control: mpsc::Receiver<Control>) -> Result<()>
    where
        F: Fn(Update) + Send + Sync + 'static,
    {
        self.stream.subscribe(topic, handler, control).await
    }

    pub async fn subscribe_order_book(
        &self,
        pair: &str,
        updates: mpsc::UnboundedSender<MarketUpdate>,
        control: mpsc::Receiver<Control>,
    ) -> Result<()> {
        self.stream.subscribe_order_book(pair, updates, control).await
    }

    pub async fn subscribe_ticker(
        &self,
        updates: mpsc::UnboundedSender<TickerUpdate>,
        control: mpsc::Receiver<Control>,
    ) -> Result<()> {
        self.stream.subscribe_ticker(updates, control).await
    }

    pub async fn unsubscribe_all(&self) -> Result<()> {
        self.stream.unsubscribe_all().await
    }

    pub fn close(&self) {
        self.stream.close();
    }
}
