//! Venue connectivity and message handling.
//!
//! This module contains:
//!
//! - [`websocket`] - Transport traits and the `tokio-tungstenite` connector
//! - [`session`] - Reconnecting session task and subscription replay
//! - [`dispatcher`] - Classifier and book worker pools
//! - [`cache`] - Tickers, symbols, orders and balances
//! - [`auth`] - HS256 login signing

pub mod auth;
pub mod cache;
pub mod dispatcher;
pub mod session;
pub mod websocket;

pub use auth::Signer;
pub use cache::MarketCache;
pub use dispatcher::{BookHook, Hooks};
pub use session::{ConnectionState, PendingRequests, SubscriptionLog};
pub use websocket::{Connection, Connector, WsConnector};
