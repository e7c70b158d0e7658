//! In-memory venue for integration tests.
//!
//! [`MockVenue`] hands out connections through a [`Connector`], records every
//! frame the client sends per connection, and lets a test push frames to or
//! drop the current connection.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hitbtc_replica::client::{Connection, Connector};
use hitbtc_replica::config::ReconnectConfig;
use hitbtc_replica::{Config, Error};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Default)]
struct VenueState {
    /// Frames sent by the client, one list per accepted connection
    sessions: Vec<Vec<String>>,
    /// Dial attempts, including refused ones
    attempts: usize,
    refuse_connects: usize,
    fail_after_sends: Option<usize>,
    current: Option<mpsc::UnboundedSender<String>>,
}

/// Shared handle to the fake venue
#[derive(Clone, Default)]
pub struct MockVenue {
    state: Arc<Mutex<VenueState>>,
}

impl MockVenue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            venue: self.clone(),
        }
    }

    /// Refuse the next `n` dial attempts
    pub fn refuse_next_connects(&self, n: usize) {
        self.state.lock().refuse_connects = n;
    }

    /// The next accepted connection fails once it has taken `n` frames
    pub fn fail_next_session_after(&self, n: usize) {
        self.state.lock().fail_after_sends = Some(n);
    }

    /// Deliver a frame on the current connection
    pub fn push(&self, frame: impl Into<String>) -> bool {
        match &self.state.lock().current {
            Some(tx) => tx.send(frame.into()).is_ok(),
            None => false,
        }
    }

    /// Drop the current connection from the venue side
    pub fn disconnect(&self) {
        self.state.lock().current = None;
    }

    pub fn connections(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    /// Frames sent on connection `index`, parsed
    pub fn sent(&self, index: usize) -> Vec<Value> {
        self.state
            .lock()
            .sessions
            .get(index)
            .map(|frames| {
                frames
                    .iter()
                    .map(|f| serde_json::from_str(f).expect("client sent invalid JSON"))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Frames sent on the most recent connection
    pub fn sent_last(&self) -> Vec<Value> {
        let n = self.connections();
        if n == 0 {
            return Vec::new();
        }
        self.sent(n - 1)
    }

    /// Frames sent on connection `index` with the given method
    pub fn sent_with_method(&self, index: usize, method: &str) -> Vec<Value> {
        self.sent(index)
            .into_iter()
            .filter(|f| f["method"] == method)
            .collect()
    }
}

pub struct MockConnector {
    venue: MockVenue,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, Error> {
        let mut state = self.venue.state.lock();
        state.attempts += 1;
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(Error::ConnectionClosed);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.current = Some(tx);
        state.sessions.push(Vec::new());
        Ok(Box::new(MockConnection {
            index: state.sessions.len() - 1,
            remaining_sends: state.fail_after_sends.take(),
            rx,
            venue: self.venue.clone(),
        }))
    }
}

struct MockConnection {
    index: usize,
    remaining_sends: Option<usize>,
    rx: mpsc::UnboundedReceiver<String>,
    venue: MockVenue,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&mut self, text: String) -> Result<(), Error> {
        if let Some(remaining) = self.remaining_sends.as_mut() {
            if *remaining == 0 {
                return Err(Error::ConnectionClosed);
            }
            *remaining -= 1;
        }
        self.venue.state.lock().sessions[self.index].push(text);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, Error>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.rx.close();
        Ok(())
    }
}

/// Config with fast reconnects for tests
pub fn test_config() -> Config {
    Config::new().with_reconnect(ReconnectConfig::fixed(Duration::from_millis(10)))
}

/// Poll `cond` until it holds, panicking after five seconds
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn levels(levels: &[(&str, &str)]) -> Value {
    Value::Array(
        levels
            .iter()
            .map(|(price, size)| serde_json::json!({ "price": price, "size": size }))
            .collect(),
    )
}

fn book_frame(
    method: &str,
    symbol: &str,
    sequence: u64,
    asks: &[(&str, &str)],
    bids: &[(&str, &str)],
) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": {
            "symbol": symbol,
            "sequence": sequence,
            "ask": levels(asks),
            "bid": levels(bids),
        }
    })
    .to_string()
}

pub fn snapshot_frame(
    symbol: &str,
    sequence: u64,
    asks: &[(&str, &str)],
    bids: &[(&str, &str)],
) -> String {
    book_frame("snapshotOrderbook", symbol, sequence, asks, bids)
}

pub fn diff_frame(
    symbol: &str,
    sequence: u64,
    asks: &[(&str, &str)],
    bids: &[(&str, &str)],
) -> String {
    book_frame("updateOrderbook", symbol, sequence, asks, bids)
}
