//! Market state outside the order books.
//!
//! [`MarketCache`] keeps the latest ticker per symbol, the symbol registry,
//! our order reports and trading balances. Lookups of something never seen
//! return an explicit default rather than failing.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::types::{Balance, Order, SymbolInfo, Ticker};

/// Tickers, symbols, orders and balances, shared between workers and readers
#[derive(Debug, Default)]
pub struct MarketCache {
    tickers: RwLock<FxHashMap<String, Ticker>>,
    symbols: RwLock<FxHashMap<String, SymbolInfo>>,
    orders: RwLock<FxHashMap<String, Order>>,
    balances: RwLock<FxHashMap<String, Balance>>,
}

impl MarketCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest ticker for a symbol
    pub fn set_ticker(&self, symbol: &str, ticker: Ticker) {
        self.tickers.write().insert(symbol.to_string(), ticker);
    }

    /// Latest ticker for a symbol
    pub fn ticker(&self, symbol: &str) -> Option<Ticker> {
        self.tickers.read().get(symbol).copied()
    }

    /// Replace the symbol registry
    pub fn set_symbols(&self, infos: impl IntoIterator<Item = SymbolInfo>) {
        let registry: FxHashMap<String, SymbolInfo> =
            infos.into_iter().map(|info| (info.id.clone(), info)).collect();
        *self.symbols.write() = registry;
    }

    /// Metadata for a symbol
    pub fn symbol(&self, id: &str) -> Option<SymbolInfo> {
        self.symbols.read().get(id).cloned()
    }

    /// Number of registered symbols
    pub fn symbol_count(&self) -> usize {
        self.symbols.read().len()
    }

    /// Store an order report, keyed by client order id
    pub fn record_order(&self, order: Order) {
        self.orders
            .write()
            .insert(order.client_order_id.clone(), order);
    }

    /// Last known state of an order
    ///
    /// Unknown ids yield an order with status `unknown`.
    pub fn order(&self, client_order_id: &str) -> Order {
        self.orders
            .read()
            .get(client_order_id)
            .cloned()
            .unwrap_or_else(|| Order::unknown(client_order_id))
    }

    /// Orders whose last report was not terminal
    pub fn active_orders(&self) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .filter(|o| matches!(o.status.as_str(), "new" | "suspended" | "partiallyFilled"))
            .cloned()
            .collect()
    }

    /// Store the balance for a currency
    pub fn set_balance(&self, currency: &str, balance: Balance) {
        self.balances.write().insert(currency.to_string(), balance);
    }

    /// Balance for a currency; zero if never reported
    pub fn balance(&self, currency: &str) -> Balance {
        self.balances
            .read()
            .get(currency)
            .copied()
            .unwrap_or_default()
    }
}
