//! Order book replication engine.
//!
//! - [`book`] - The [`Orderbook`] type and the depth-bounded diff merge
//! - [`deferred`] - Holding area for diffs that arrive ahead of sequence
//! - [`store`] - Per-symbol books with lock-free reads of published copies
//!
//! # Example
//!
//! ```rust
//! use hitbtc_replica::orderbook::{BookItem, Orderbook};
//!
//! let mut book = Orderbook::snapshot(
//!     5,
//!     0,
//!     vec![BookItem::new(100.0, 1.0), BookItem::new(101.0, 2.0)],
//!     vec![],
//!     2,
//! );
//!
//! // Remove 100, add 99
//! let diff = Orderbook::diff(
//!     6,
//!     0,
//!     vec![BookItem::new(100.0, 0.0), BookItem::new(99.0, 3.0)],
//!     vec![],
//! );
//! book.merge(&diff, 2);
//!
//! assert_eq!(book.asks(), &[BookItem::new(99.0, 3.0), BookItem::new(101.0, 2.0)]);
//! assert_eq!(book.sequence(), 6);
//! ```

pub mod book;
pub mod deferred;
pub mod store;

pub use book::{BookItem, Orderbook, Side};
pub use deferred::DeferredBuffer;
pub use store::{BookStore, DiffOutcome};
