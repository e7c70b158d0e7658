//! Inbound message routing.
//!
//! Raw frames from the session flow through two bounded queues:
//!
//! ```text
//! session -> inbound queue -> classifier workers -> { snapshot, ticker, report, response }
//!                                                 -> diff queue -> book workers -> BookStore
//! ```
//!
//! Classifier workers handle everything but diffs inline. Diffs go to a
//! second pool so merging one symbol does not hold up classification of the
//! next frame. Queue order across workers is not preserved; per-symbol order
//! is restored by sequence inside the [`BookStore`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::cache::MarketCache;
use super::session::PendingRequests;
use crate::error::Error;
use crate::orderbook::{BookStore, DiffOutcome, Orderbook};
use crate::types::market::{BalanceParams, SymbolParams};
use crate::types::messages::{classify, InboundMessage, Method, Request, Response};
use crate::types::order::OrderParams;

/// Callback run with the symbol and book of a classified snapshot or diff
pub type BookHook = Arc<dyn Fn(&str, &Orderbook) + Send + Sync>;

/// Optional snapshot and diff callbacks
#[derive(Clone, Default)]
pub struct Hooks {
    /// Run for every classified snapshot
    pub on_snapshot: Option<BookHook>,
    /// Run for every classified diff
    pub on_diff: Option<BookHook>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("on_snapshot", &self.on_snapshot.is_some())
            .field("on_diff", &self.on_diff.is_some())
            .finish()
    }
}

type DiffJob = (String, Orderbook);

/// Shared state of the worker pools
pub(crate) struct Dispatcher {
    pub(crate) books: Arc<BookStore>,
    pub(crate) market: Arc<MarketCache>,
    pub(crate) pending: Arc<PendingRequests>,
    pub(crate) hooks: Hooks,
    pub(crate) outbound: mpsc::Sender<Request>,
}

impl Dispatcher {
    /// Spawn `workers` classifiers and `book_workers` mergers
    ///
    /// All tasks exit once every sender of `inbound` is dropped.
    pub(crate) fn spawn(
        self: Arc<Self>,
        inbound: mpsc::Receiver<String>,
        workers: usize,
        book_workers: usize,
        diff_capacity: usize,
    ) -> Vec<JoinHandle<()>> {
        let (diff_tx, diff_rx) = mpsc::channel::<DiffJob>(diff_capacity);
        let inbound = Arc::new(Mutex::new(inbound));
        let diff_rx = Arc::new(Mutex::new(diff_rx));

        let mut handles = Vec::with_capacity(workers + book_workers);
        for worker in 0..workers {
            let this = Arc::clone(&self);
            let inbound = Arc::clone(&inbound);
            let diffs = diff_tx.clone();
            handles.push(tokio::spawn(async move {
                this.classify_loop(worker, inbound, diffs).await;
            }));
        }
        // Book workers stop once the last classifier drops its sender
        drop(diff_tx);

        for worker in 0..book_workers {
            let this = Arc::clone(&self);
            let diff_rx = Arc::clone(&diff_rx);
            handles.push(tokio::spawn(async move {
                this.merge_loop(worker, diff_rx).await;
            }));
        }
        handles
    }

    async fn classify_loop(
        &self,
        worker: usize,
        inbound: Arc<Mutex<mpsc::Receiver<String>>>,
        diffs: mpsc::Sender<DiffJob>,
    ) {
        loop {
            let next = inbound.lock().await.recv().await;
            let Some(text) = next else { break };
            if self.handle_frame(&text, &diffs).await.is_err() {
                break;
            }
        }
        tracing::debug!(worker, "Classifier stopped");
    }

    async fn merge_loop(&self, worker: usize, diffs: Arc<Mutex<mpsc::Receiver<DiffJob>>>) {
        loop {
            let next = diffs.lock().await.recv().await;
            let Some((symbol, diff)) = next else { break };
            if self.books.apply_diff(&symbol, diff) == DiffOutcome::Stalled {
                self.request_resync(&symbol);
            }
        }
        tracing::debug!(worker, "Book worker stopped");
    }

    /// Route one frame; `Err` only when the diff queue is closed
    pub(crate) async fn handle_frame(
        &self,
        text: &str,
        diffs: &mpsc::Sender<DiffJob>,
    ) -> Result<(), mpsc::error::SendError<DiffJob>> {
        let message = match classify(text, self.books.max_depth()) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed message");
                return Ok(());
            }
        };

        match message {
            InboundMessage::Snapshot { symbol, book } => {
                if let Some(hook) = &self.hooks.on_snapshot {
                    hook(&symbol, &book);
                }
                self.books.apply_snapshot(&symbol, book);
            }
            InboundMessage::Diff { symbol, book } => {
                if let Some(hook) = &self.hooks.on_diff {
                    hook(&symbol, &book);
                }
                diffs.send((symbol, book)).await?;
            }
            InboundMessage::Ticker { symbol, ticker } => {
                self.market.set_ticker(&symbol, ticker);
            }
            InboundMessage::Report(order) => {
                tracing::debug!(
                    client_order_id = %order.client_order_id,
                    status = %order.status,
                    "Order report"
                );
                self.market.record_order(order);
            }
            InboundMessage::Response(response) => self.handle_response(response),
            InboundMessage::Other(method) => {
                tracing::trace!(method = %method, "Ignoring notification");
            }
        }
        Ok(())
    }

    fn handle_response(&self, response: Response) {
        let Some(method) = self.pending.take(&response.id) else {
            tracing::debug!(id = %response.id, "Response to unknown request");
            return;
        };

        let result = match response.outcome {
            Ok(result) => result,
            Err(body) => {
                let err = Error::from(body);
                tracing::warn!(method = ?method, id = %response.id, error = %err, "Request failed");
                return;
            }
        };

        let applied = match method {
            Method::GetSymbols => parse_list(result, |p: &SymbolParams| p.parse())
                .map(|infos| {
                    tracing::info!(count = infos.len(), "Loaded symbols");
                    self.market.set_symbols(infos);
                }),
            Method::GetTradingBalance => {
                parse_list(result, |p: &BalanceParams| Ok((p.currency.clone(), p.parse()?)))
                    .map(|balances| {
                        for (currency, balance) in balances {
                            self.market.set_balance(&currency, balance);
                        }
                    })
            }
            Method::GetOrders => parse_list(result, |p: &OrderParams| p.parse()).map(|orders| {
                for order in orders {
                    self.market.record_order(order);
                }
            }),
            Method::NewOrder | Method::CancelReplaceOrder | Method::CancelOrder => {
                serde_json::from_value::<OrderParams>(result)
                    .map_err(Error::from)
                    .and_then(|p| p.parse())
                    .map(|order| self.market.record_order(order))
            }
            Method::Login
            | Method::SubscribeOrderbook
            | Method::SubscribeTicker
            | Method::SubscribeReports => {
                tracing::debug!(method = ?method, "Request acknowledged");
                Ok(())
            }
        };

        if let Err(e) = applied {
            tracing::warn!(method = ?method, error = %e, "Dropping malformed response");
        }
    }

    /// Ask for a fresh snapshot; not recorded for replay
    fn request_resync(&self, symbol: &str) {
        let request = Request::subscribe_orderbook(symbol);
        if let Err(e) = self.outbound.try_send(request) {
            tracing::warn!(symbol = %symbol, error = %e, "Could not queue resync request");
        }
    }
}

fn parse_list<P, T, F>(value: Value, parse: F) -> Result<Vec<T>, Error>
where
    P: DeserializeOwned,
    F: Fn(&P) -> Result<T, Error>,
{
    let params: Vec<P> = serde_json::from_value(value)?;
    params.iter().map(parse).collect()
}
