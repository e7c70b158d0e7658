//! Connection lifecycle with automatic reconnection.
//!
//! A single session task owns the live [`Connection`]. It dials, logs in,
//! replays every recorded subscription, then pumps frames in both
//! directions until the connection fails, at which point it starts over:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (failure) -> Disconnected -> ...
//! ```
//!
//! Dialing never gives up; the delay between attempts follows the
//! [`ReconnectConfig`] backoff and resets once a connection is established.
//! The current state is published on a `watch` channel.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, watch, Notify};

use super::auth::Signer;
use super::websocket::{Connection, Connector};
use crate::config::ReconnectConfig;
use crate::error::Error;
use crate::types::messages::{Method, Request};

/// Connection state of the session task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection
    Disconnected,
    /// Dialing, logging in or replaying subscriptions
    Connecting,
    /// Subscriptions replayed; frames flowing
    Connected,
}

/// Subscriptions to replay after every reconnect, in first-seen order
///
/// The session task sends new entries to the live connection itself, so
/// recording a subscription never waits on the outbound queue.
#[derive(Debug, Default)]
pub struct SubscriptionLog {
    entries: Mutex<Vec<Request>>,
    added: Notify,
}

impl SubscriptionLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription
    ///
    /// Returns its position, or `None` if the same method and parameters
    /// were already recorded.
    pub fn record(&self, request: &Request) -> Option<usize> {
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.same_target(request)) {
            return None;
        }
        entries.push(request.clone());
        let position = entries.len() - 1;
        drop(entries);
        self.added.notify_one();
        Some(position)
    }

    /// Every recorded subscription under fresh ids
    pub fn replay_requests(&self) -> Vec<Request> {
        self.entries.lock().iter().map(Request::with_fresh_id).collect()
    }

    /// Subscriptions recorded at or after `position`, with their original ids
    pub fn requests_from(&self, position: usize) -> Vec<Request> {
        self.entries
            .lock()
            .get(position..)
            .map(<[Request]>::to_vec)
            .unwrap_or_default()
    }

    /// Resolves once something was recorded since the last wakeup
    pub(crate) async fn added(&self) {
        self.added.notified().await;
    }

    /// Number of recorded subscriptions
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Requests sent on the current connection that still await a response
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: Mutex<FxHashMap<String, Method>>,
}

impl PendingRequests {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a request id
    pub fn register(&self, id: &str, method: Method) {
        self.inner.lock().insert(id.to_string(), method);
    }

    /// Take the method of a request being answered
    pub fn take(&self, id: &str) -> Option<Method> {
        self.inner.lock().remove(id)
    }

    /// Forget every request
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Number of outstanding requests
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing is outstanding
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

enum SessionEnd {
    Shutdown,
    Failed(Error),
}

/// Resolves once shutdown is requested or the client handle is gone
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// The session task
pub(crate) struct Session {
    pub(crate) connector: Box<dyn Connector>,
    pub(crate) reconnect: ReconnectConfig,
    pub(crate) signer: Option<Signer>,
    pub(crate) subscriptions: Arc<SubscriptionLog>,
    pub(crate) pending: Arc<PendingRequests>,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) outbound_rx: mpsc::Receiver<Request>,
    pub(crate) inbound_tx: mpsc::Sender<String>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &*self.state.borrow())
            .field("subscription_count", &self.subscriptions.len())
            .field("pending_count", &self.pending.len())
            .finish()
    }
}

impl Session {
    /// Run until shutdown
    ///
    /// Dropping the session on exit closes the inbound queue, which stops
    /// the dispatcher workers.
    pub(crate) async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            self.state.send_replace(ConnectionState::Connecting);

            let Some(mut conn) = self.dial(&mut attempt).await else {
                break;
            };

            let replayed = match self.establish(conn.as_mut()).await {
                Ok(replayed) => replayed,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to restore session, reconnecting");
                    let _ = conn.close().await;
                    self.state.send_replace(ConnectionState::Disconnected);
                    if !self.backoff(&mut attempt).await {
                        break;
                    }
                    continue;
                }
            };

            attempt = 0;
            self.state.send_replace(ConnectionState::Connected);
            tracing::info!(subscriptions = replayed, "Connected");

            match self.pump(conn.as_mut(), replayed).await {
                SessionEnd::Shutdown => {
                    let _ = conn.close().await;
                    break;
                }
                SessionEnd::Failed(e) => {
                    tracing::warn!(error = %e, "Connection lost, reconnecting");
                    self.state.send_replace(ConnectionState::Disconnected);
                }
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        tracing::info!("Session stopped");
    }

    /// Dial until a connection is up; `None` on shutdown
    async fn dial(&mut self, attempt: &mut u32) -> Option<Box<dyn Connection>> {
        loop {
            if *self.shutdown.borrow() {
                return None;
            }
            let result = tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => return None,
                result = self.connector.connect() => result,
            };
            match result {
                Ok(conn) => return Some(conn),
                Err(e) => {
                    tracing::warn!(error = %e, attempt = *attempt, "Connect failed");
                    if !self.backoff(attempt).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Sleep for the current backoff delay; `false` on shutdown
    async fn backoff(&mut self, attempt: &mut u32) -> bool {
        let delay = self.reconnect.delay_for_attempt(*attempt);
        *attempt = attempt.saturating_add(1);
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Backing off");
        tokio::select! {
            _ = shutdown_requested(&mut self.shutdown) => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Log in and replay subscriptions; returns how many were replayed
    async fn establish(&mut self, conn: &mut dyn Connection) -> Result<usize, Error> {
        // Responses from the previous connection will never arrive
        self.pending.clear();

        if let Some(signer) = &self.signer {
            let login = Request::login(signer.login_params()?);
            self.send(conn, &login).await?;
            tracing::debug!("Sent login");
        }

        let requests = self.subscriptions.replay_requests();
        for request in &requests {
            tracing::debug!(method = ?request.method, id = %request.id, "Resubscribing");
            self.send(conn, request).await?;
        }
        Ok(requests.len())
    }

    async fn pump(&mut self, conn: &mut dyn Connection, replayed: usize) -> SessionEnd {
        // Log entries below this position went out on this connection
        let mut subscribed = replayed;
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => return SessionEnd::Shutdown,
                frame = conn.recv() => match frame {
                    Some(Ok(text)) => {
                        if self.inbound_tx.send(text).await.is_err() {
                            return SessionEnd::Shutdown;
                        }
                    }
                    Some(Err(e)) => return SessionEnd::Failed(e),
                    None => return SessionEnd::Failed(Error::ConnectionClosed),
                },
                _ = self.subscriptions.added() => {
                    for request in self.subscriptions.requests_from(subscribed) {
                        subscribed += 1;
                        tracing::debug!(method = ?request.method, id = %request.id, "Subscribing");
                        if let Err(e) = self.send(conn, &request).await {
                            return SessionEnd::Failed(e);
                        }
                    }
                }
                outbound = self.outbound_rx.recv() => match outbound {
                    Some(request) => {
                        if let Err(e) = self.send(conn, &request).await {
                            return SessionEnd::Failed(e);
                        }
                    }
                    None => return SessionEnd::Shutdown,
                },
            }
        }
    }

    async fn send(&self, conn: &mut dyn Connection, request: &Request) -> Result<(), Error> {
        let text = request.to_json()?;
        self.pending.register(&request.id, request.method);
        if let Err(e) = conn.send(text).await {
            self.pending.take(&request.id);
            return Err(e);
        }
        tracing::trace!(method = ?request.method, id = %request.id, "Sent request");
        Ok(())
    }
}
