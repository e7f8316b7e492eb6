/*
[INPUT]:  Push endpoint URL
[OUTPUT]: Framed text transport (sink + source) over a WebSocket
[POS]:    WebSocket layer - socket I/O seam, replaceable in tests
[UPDATE]: When changing socket setup or frame handling
*/

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::http::{PoloniexError, Result};
use crate::ws::message::WAMP_SUBPROTOCOL;

/// Outbound half of a framed connection
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: String) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Inbound half of a framed connection
#[async_trait]
pub trait FrameSource: Send {
    /// Next text frame, or `None` once the peer has closed the stream.
    /// Must be cancel safe.
    async fn next_frame(&mut self) -> Option<Result<String>>;
}

pub type FramePair = (Box<dyn FrameSink>, Box<dyn FrameSource>);

/// Opens framed connections to the push endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<FramePair>;
}

/// tokio-tungstenite connector negotiating `wamp.2.json`
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<FramePair> {
        let mut request = self.url.as_str().into_client_request().map_err(ws_error)?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(WAMP_SUBPROTOCOL));

        let (stream, response) = connect_async(request).await.map_err(ws_error)?;
        debug!(url = %self.url, status = %response.status(), "websocket upgraded");

        let (write, read) = stream.split();
        Ok((Box::new(WsSink { write }), Box::new(WsSource { read })))
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WsSink {
    write: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.write.send(WsMessage::Text(frame.into())).await.map_err(ws_error)
    }

    async fn close(&mut self) -> Result<()> {
        self.write.close().await.map_err(ws_error)
    }
}

struct WsSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Option<Result<String>> {
        loop {
            match self.read.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text.to_string())),
                // Undecodable bytes surface as a malformed frame, not a dead socket
                Ok(WsMessage::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Ok(WsMessage::Close(frame)) => {
                    debug!(?frame, "websocket close frame received");
                    return None;
                }
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => {}
                Err(err) => return Some(Err(ws_error(err))),
            }
        }
    }
}

fn ws_error(err: impl std::fmt::Display) -> PoloniexError {
    PoloniexError::WebSocket(err.to_string())
}
