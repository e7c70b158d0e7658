//! WebSocket transport.
//!
//! The session task talks to the venue through two small traits:
//!
//! - [`Connector`] dials a new connection
//! - [`Connection`] sends and receives text frames on it
//!
//! [`WsConnector`] implements them over `tokio-tungstenite`. Tests substitute
//! an in-memory implementation.
//!
//! # Example
//!
//! ```rust,no_run
//! use hitbtc_replica::client::websocket::{Connection, Connector, WsConnector};
//!
//! # async fn example() -> hitbtc_replica::Result<()> {
//! let connector = WsConnector::new("wss://api.hitbtc.com/api/2/ws");
//! let mut conn = connector.connect().await?;
//!
//! conn.send(r#"{"method":"getSymbols","params":{},"id":"1"}"#.to_string()).await?;
//! if let Some(frame) = conn.recv().await {
//!     println!("{}", frame?);
//! }
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials connections to the venue
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection
    async fn connect(&self) -> Result<Box<dyn Connection>, Error>;
}

/// One live connection carrying text frames
#[async_trait]
pub trait Connection: Send {
    /// Send a text frame
    async fn send(&mut self, text: String) -> Result<(), Error>;

    /// Receive the next text frame
    ///
    /// Returns `None` once the peer has gone away.
    async fn recv(&mut self) -> Option<Result<String, Error>>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), Error>;
}

/// [`Connector`] for a `ws://` or `wss://` URL
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Create a connector for the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Get the URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, Error> {
        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        tracing::debug!(url = %self.url, "WebSocket handshake complete");
        Ok(Box::new(WsConnection { stream }))
    }
}

/// A `tokio-tungstenite` connection
pub struct WsConnection {
    stream: WsStream,
}

impl std::fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnection").finish_non_exhaustive()
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, text: String) -> Result<(), Error> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, Error>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Ping(data)) => {
                    // Respond to pings automatically
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Some(Err(e.into()));
                    }
                }
                Ok(Message::Close(_)) => return Some(Err(Error::ConnectionClosed)),
                // Binary, Pong, Frame
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.stream.close(None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_url() {
        let connector = WsConnector::new("ws://localhost:9000");
        assert_eq!(connector.url(), "ws://localhost:9000");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Nothing listens on port 1
        let connector = WsConnector::new("ws://127.0.0.1:1");
        let err = connector.connect().await.err().unwrap();
        assert!(err.is_transport());
    }
}
