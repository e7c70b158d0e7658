//! # hitbtc-replica
//!
//! A local replica of [HitBTC](https://hitbtc.com) limit order books, kept in
//! sync from the venue's WebSocket feed.
//!
//! ## Features
//!
//! - **Sequence-gated books** - Diffs apply strictly in sequence order; early
//!   arrivals wait, stale ones are dropped, stuck gaps trigger a fresh snapshot
//! - **Lock-free reads** - Readers load an immutable `Arc<Orderbook>` and never
//!   see a half-merged book
//! - **Automatic reconnection** - Backoff, login and subscription replay on
//!   every new connection
//! - **Market cache** - Tickers, symbol metadata, order reports and balances
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hitbtc_replica::{Config, ReplicaClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), hitbtc_replica::Error> {
//!     let client = ReplicaClient::new(Config::new().with_max_book_depth(20))?;
//!     client.connect()?;
//!
//!     client.subscribe_book("ETHBTC").await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(2)).await;
//!     if let Some(book) = client.book("ETHBTC") {
//!         println!("ETHBTC {:?} / {:?}", book.best_bid(), book.best_ask());
//!     }
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! This crate is organized into several modules:
//!
//! - [`orderbook`] - Book type, diff merge, deferred buffer and the store
//! - [`client`] - Transport, session, dispatcher and market cache
//! - [`types`] - Wire and domain types for the WebSocket API
//! - [`config`] - Configuration and credentials
//! - [`error`] - Error types for the crate
//!
//! ## Performance
//!
//! - `FxHashMap` for faster hashing of small keys
//! - `parking_lot` locks, one per symbol
//! - `arc-swap` publication so readers never block writers
//! - Bounded queues between the socket and the book workers

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod orderbook;
pub mod types;

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use client::dispatcher::{BookHook, Dispatcher, Hooks};
use client::session::Session;
use client::{ConnectionState, Connector, MarketCache, PendingRequests, Signer, SubscriptionLog, WsConnector};
use orderbook::{BookStore, Orderbook};
use types::messages::{new_request_id, Request};
use types::order::{
    format_decimal, truncate_to_step, CancelParams, CancelReplaceParams, NewOrderParams,
};
use types::{Balance, Order, OrderSide, SymbolInfo, Ticker, TimeInForce};

// Re-export main types at crate root for convenience
pub use config::Config;
pub use error::Error;

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// The replica client
///
/// Owns the book store and market cache, and once started, the session
/// task and worker pools that keep them current. All query methods are
/// synchronous and never wait on the network.
///
/// # Example
///
/// ```rust,no_run
/// use hitbtc_replica::config::Credentials;
/// use hitbtc_replica::types::{OrderSide, TimeInForce};
/// use hitbtc_replica::{Config, ReplicaClient};
///
/// # async fn example() -> hitbtc_replica::Result<()> {
/// let config = Config::new().with_credentials(Credentials::new("key", "secret"));
/// let client = ReplicaClient::new(config)?
///     .on_diff(|symbol, diff| println!("{} -> {}", symbol, diff.sequence()));
/// client.connect()?;
///
/// client.subscribe_book("ETHBTC").await?;
/// client.subscribe_reports().await?;
/// client.get_symbols().await?;
///
/// let coid = client
///     .place_limit("ETHBTC", OrderSide::Buy, 0.05, 0.1, TimeInForce::Gtc)
///     .await?;
/// println!("Order status: {}", client.order(&coid).status);
/// # Ok(())
/// # }
/// ```
pub struct ReplicaClient {
    config: Config,
    books: Arc<BookStore>,
    market: Arc<MarketCache>,
    subscriptions: Arc<SubscriptionLog>,
    pending: Arc<PendingRequests>,
    hooks: Hooks,
    outbound_tx: mpsc::Sender<Request>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Request>>>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ReplicaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaClient")
            .field("endpoint", &self.config.endpoint())
            .field("state", &self.state())
            .field("subscription_count", &self.subscriptions.len())
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl ReplicaClient {
    /// Create a client with the given configuration
    ///
    /// Nothing connects until [`connect`](Self::connect) or
    /// [`run`](Self::run) is called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity());
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            books: Arc::new(BookStore::new(
                config.max_book_depth(),
                config.resync().clone(),
            )),
            market: Arc::new(MarketCache::new()),
            subscriptions: Arc::new(SubscriptionLog::new()),
            pending: Arc::new(PendingRequests::new()),
            hooks: Hooks::default(),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            state_tx,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            config,
        })
    }

    /// Run `hook` for every classified snapshot
    #[must_use]
    pub fn on_snapshot(mut self, hook: impl Fn(&str, &Orderbook) + Send + Sync + 'static) -> Self {
        self.hooks.on_snapshot = Some(Arc::new(hook) as BookHook);
        self
    }

    /// Run `hook` for every classified diff, before it is merged
    #[must_use]
    pub fn on_diff(mut self, hook: impl Fn(&str, &Orderbook) + Send + Sync + 'static) -> Self {
        self.hooks.on_diff = Some(Arc::new(hook) as BookHook);
        self
    }

    /// Start the replica over the configured WebSocket endpoint
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self) -> Result<()> {
        self.run(WsConnector::new(self.config.endpoint()))
    }

    /// Start the replica over any transport
    ///
    /// Spawns the session task and the worker pools. Subscriptions made
    /// before this call go out with the first replay; other requests wait in
    /// the outbound queue until connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the replica was already started.
    pub fn run(&self, connector: impl Connector) -> Result<()> {
        let outbound_rx = self
            .outbound_rx
            .lock()
            .take()
            .ok_or_else(|| Error::Config("replica already started".into()))?;

        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_capacity());

        let session = Session {
            connector: Box::new(connector),
            reconnect: self.config.reconnect().clone(),
            signer: self.config.credentials().map(Signer::new),
            subscriptions: Arc::clone(&self.subscriptions),
            pending: Arc::clone(&self.pending),
            state: self.state_tx.clone(),
            outbound_rx,
            inbound_tx,
            shutdown: self.shutdown_tx.subscribe(),
        };

        let dispatcher = Arc::new(Dispatcher {
            books: Arc::clone(&self.books),
            market: Arc::clone(&self.market),
            pending: Arc::clone(&self.pending),
            hooks: self.hooks.clone(),
            outbound: self.outbound_tx.clone(),
        });

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(session.run()));
        tasks.extend(dispatcher.spawn(
            inbound_rx,
            self.config.workers(),
            self.config.book_workers(),
            self.config.diff_capacity(),
        ));

        tracing::info!(
            endpoint = %self.config.endpoint(),
            workers = self.config.workers(),
            book_workers = self.config.book_workers(),
            "Replica started"
        );
        Ok(())
    }

    /// Stop the session and every worker, waiting for them to exit
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Task ended abnormally");
            }
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch connection state changes
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Get the book store
    pub fn books(&self) -> &Arc<BookStore> {
        &self.books
    }

    /// Get the market cache
    pub fn market(&self) -> &Arc<MarketCache> {
        &self.market
    }

    /// Latest book for a symbol
    pub fn book(&self, symbol: &str) -> Option<Arc<Orderbook>> {
        self.books.current_book(symbol)
    }

    /// Every book cut to `depth` levels per side
    ///
    /// See [`BookStore::copy_books`].
    pub fn copy_books(&self, depth: usize) -> FxHashMap<String, Option<Orderbook>> {
        self.books.copy_books(depth)
    }

    /// Latest ticker for a symbol
    pub fn ticker(&self, symbol: &str) -> Option<Ticker> {
        self.market.ticker(symbol)
    }

    /// Metadata for a symbol, once `getSymbols` has been answered
    pub fn symbol(&self, id: &str) -> Option<SymbolInfo> {
        self.market.symbol(id)
    }

    /// Last known state of an order
    pub fn order(&self, client_order_id: &str) -> Order {
        self.market.order(client_order_id)
    }

    /// Trading balance for a currency
    pub fn balance(&self, currency: &str) -> Balance {
        self.market.balance(currency)
    }

    /// Subscribe to a symbol's order book
    ///
    /// Returns the request id. The subscription is recorded and replayed on
    /// every reconnect; recording it never waits for a connection.
    pub async fn subscribe_book(&self, symbol: &str) -> Result<String> {
        self.subscribe(Request::subscribe_orderbook(symbol)).await
    }

    /// Subscribe to several order books
    pub async fn subscribe_books(&self, symbols: &[&str]) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            ids.push(self.subscribe_book(symbol).await?);
        }
        Ok(ids)
    }

    /// Subscribe to a symbol's ticker
    pub async fn subscribe_ticker(&self, symbol: &str) -> Result<String> {
        self.subscribe(Request::subscribe_ticker(symbol)).await
    }

    /// Subscribe to our order reports
    pub async fn subscribe_reports(&self) -> Result<String> {
        self.subscribe(Request::subscribe_reports()).await
    }

    /// Request symbol metadata
    pub async fn get_symbols(&self) -> Result<String> {
        self.send(Request::get_symbols()).await
    }

    /// Request trading balances
    pub async fn get_balance(&self) -> Result<String> {
        self.send(Request::get_trading_balance()).await
    }

    /// Request active orders
    pub async fn get_active_orders(&self) -> Result<String> {
        self.send(Request::get_orders()).await
    }

    /// Place a limit order
    ///
    /// Price and quantity are rounded down to the symbol's tick size and
    /// quantity increment once `getSymbols` has been answered. Returns the
    /// client order id; track it with [`order`](Self::order).
    pub async fn place_limit(
        &self,
        symbol: &str,
        side: OrderSide,
        price: f64,
        quantity: f64,
        time_in_force: TimeInForce,
    ) -> Result<String> {
        let client_order_id = new_request_id();
        let (price, quantity) = self.fit_to_symbol(symbol, price, quantity);
        self.send(Request::new_order(NewOrderParams {
            client_order_id: client_order_id.clone(),
            symbol: symbol.to_string(),
            side,
            order_type: "limit",
            time_in_force,
            quantity: format_decimal(quantity),
            price: format_decimal(price),
        }))
        .await?;
        Ok(client_order_id)
    }

    /// Replace an order's price and quantity
    ///
    /// Rounded like [`place_limit`](Self::place_limit) when the order's
    /// symbol is known. Returns the client order id of the replacement.
    pub async fn update_order(
        &self,
        client_order_id: &str,
        price: f64,
        quantity: f64,
    ) -> Result<String> {
        let replacement = new_request_id();
        let symbol = self.market.order(client_order_id).symbol;
        let (price, quantity) = self.fit_to_symbol(&symbol, price, quantity);
        self.send(Request::cancel_replace_order(CancelReplaceParams {
            client_order_id: client_order_id.to_string(),
            request_client_id: replacement.clone(),
            quantity: format_decimal(quantity),
            price: format_decimal(price),
        }))
        .await?;
        Ok(replacement)
    }

    /// Cancel an order
    pub async fn cancel_order(&self, client_order_id: &str) -> Result<String> {
        self.send(Request::cancel_order(CancelParams {
            client_order_id: client_order_id.to_string(),
        }))
        .await
    }

    fn fit_to_symbol(&self, symbol: &str, price: f64, quantity: f64) -> (f64, f64) {
        match self.market.symbol(symbol) {
            Some(info) => (
                truncate_to_step(price, info.tick_size),
                truncate_to_step(quantity, info.quantity_increment),
            ),
            None => (price, quantity),
        }
    }

    async fn subscribe(&self, request: Request) -> Result<String> {
        if self.outbound_tx.is_closed() {
            return Err(Error::NotRunning);
        }
        if self.subscriptions.record(&request).is_some() {
            // The session picks new log entries up on its own
            return Ok(request.id);
        }
        tracing::debug!(method = ?request.method, "Already subscribed, not recording again");
        self.send(request).await
    }

    async fn send(&self, request: Request) -> Result<String> {
        let id = request.id.clone();
        self.outbound_tx
            .send(request)
            .await
            .map_err(|_| Error::NotRunning)?;
        Ok(id)
    }
}
