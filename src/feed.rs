use crate::error::FeedError;
use crate::reading::subscription_start;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens subscription connections; one live connection at a time.
#[async_trait]
pub trait FeedSource: Send {
    type Connection: FeedConnection;

    /// Connects and sends the subscription start message.
    async fn connect(&mut self) -> Result<Self::Connection, FeedError>;
}

#[async_trait]
pub trait FeedConnection: Send {
    /// Waits for the next data payload. Any error means the connection is dead.
    async fn recv(&mut self) -> Result<Vec<u8>, FeedError>;
}

#[derive(Debug, Clone)]
pub struct WsFeed {
    uri: String,
    subprotocol: Option<String>,
    read_timeout: Option<Duration>,
}

impl WsFeed {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            subprotocol: None,
            read_timeout: None,
        }
    }

    pub fn with_subprotocol(mut self, subprotocol: Option<String>) -> Self {
        self.subprotocol = subprotocol;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

pub struct WsConnection {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    read_timeout: Option<Duration>,
}

#[async_trait]
impl FeedSource for WsFeed {
    type Connection = WsConnection;

    async fn connect(&mut self) -> Result<WsConnection, FeedError> {
        let mut request = self
            .uri
            .as_str()
            .into_client_request()
            .map_err(FeedError::Handshake)?;
        if let Some(subprotocol) = &self.subprotocol {
            let value = HeaderValue::from_str(subprotocol)
                .map_err(|_| FeedError::InvalidSubprotocol(subprotocol.clone()))?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        let (mut socket, _response) = timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| FeedError::ConnectTimeout(CONNECT_TIMEOUT))?
            .map_err(FeedError::Handshake)?;
        tracing::info!(uri = %self.uri, "connected to temperature feed");

        socket
            .send(Message::Text(subscription_start().to_string()))
            .await
            .map_err(FeedError::Subscribe)?;
        tracing::debug!("sent subscription start");

        Ok(WsConnection {
            socket,
            read_timeout: self.read_timeout,
        })
    }
}

#[async_trait]
impl FeedConnection for WsConnection {
    async fn recv(&mut self) -> Result<Vec<u8>, FeedError> {
        loop {
            let next = match self.read_timeout {
                Some(limit) => timeout(limit, self.socket.next())
                    .await
                    .map_err(|_| FeedError::Stalled(limit))?,
                None => self.socket.next().await,
            };

            match next {
                Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
                Some(Ok(Message::Binary(bytes))) => return Ok(bytes),
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "feed sent close frame");
                    return Err(FeedError::Closed);
                }
                // ping/pong are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(FeedError::Receive(err)),
                None => return Err(FeedError::Closed),
            }
        }
    }
}

/// Reconnect delay: doubles per failed attempt up to `max`, reset on success.
/// A zero `initial` delay retries immediately every time.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = delay.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}
