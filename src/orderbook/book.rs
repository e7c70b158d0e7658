//! Core orderbook data structure.
//!
//! Each side is a `Vec<BookItem>` sorted best-first and bounded to a maximum
//! depth of tens of levels. Merging is a linear scan with in-place insert,
//! and publishing a copy is a plain clone of two short vectors.

use crate::types::{Price, Sequence, Size, TimestampMs};

/// One price level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookItem {
    /// Level price
    pub price: Price,
    /// Resting size; zero only ever appears in diffs
    pub size: Size,
}

impl BookItem {
    /// Create a level
    #[must_use]
    pub const fn new(price: Price, size: Size) -> Self {
        Self { price, size }
    }
}

/// Book side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Sell side, best = lowest price
    Ask,
    /// Buy side, best = highest price
    Bid,
}

impl Side {
    /// Whether price `a` is strictly better than price `b` on this side
    #[inline]
    #[must_use]
    pub fn is_better(self, a: Price, b: Price) -> bool {
        match self {
            Side::Ask => a < b,
            Side::Bid => a > b,
        }
    }
}

/// Order book for a single symbol.
///
/// The same type carries a full book and a diff. In a full book every level
/// has a positive size, prices are unique per side, asks ascend and bids
/// descend, and neither side exceeds the depth it was built with. A diff
/// holds the levels to upsert, with size zero meaning "remove", in arrival
/// order.
///
/// # Thread Safety
///
/// This struct is `Send + Sync` but not internally synchronized. The
/// [`BookStore`](super::BookStore) publishes immutable copies of it behind
/// an `Arc`; readers never see a book while it is being merged.
#[derive(Debug, Clone, PartialEq)]
pub struct Orderbook {
    sequence: Sequence,
    timestamp: TimestampMs,
    asks: Vec<BookItem>,
    bids: Vec<BookItem>,
}

impl Orderbook {
    /// Create an empty book at the given sequence
    #[must_use]
    pub fn new(sequence: Sequence) -> Self {
        Self {
            sequence,
            timestamp: 0,
            asks: Vec::new(),
            bids: Vec::new(),
        }
    }

    /// Build a full book from snapshot levels
    ///
    /// Zero-size levels are dropped, each side is sorted best-first with
    /// later duplicates of a price winning, then truncated to `max_depth`.
    #[must_use]
    pub fn snapshot(
        sequence: Sequence,
        timestamp: TimestampMs,
        asks: Vec<BookItem>,
        bids: Vec<BookItem>,
        max_depth: usize,
    ) -> Self {
        Self {
            sequence,
            timestamp,
            asks: normalize(asks, Side::Ask, max_depth),
            bids: normalize(bids, Side::Bid, max_depth),
        }
    }

    /// Build a diff; levels are kept exactly as given
    #[must_use]
    pub fn diff(
        sequence: Sequence,
        timestamp: TimestampMs,
        asks: Vec<BookItem>,
        bids: Vec<BookItem>,
    ) -> Self {
        Self {
            sequence,
            timestamp,
            asks,
            bids,
        }
    }

    /// Get the sequence number
    #[must_use]
    pub const fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Get the local timestamp of the last snapshot or merged diff
    #[must_use]
    pub const fn timestamp(&self) -> TimestampMs {
        self.timestamp
    }

    /// Ask levels, best (lowest) first
    #[must_use]
    pub fn asks(&self) -> &[BookItem] {
        &self.asks
    }

    /// Bid levels, best (highest) first
    #[must_use]
    pub fn bids(&self) -> &[BookItem] {
        &self.bids
    }

    /// Levels of one side
    #[must_use]
    pub fn side(&self, side: Side) -> &[BookItem] {
        match side {
            Side::Ask => &self.asks,
            Side::Bid => &self.bids,
        }
    }

    /// Merge a diff into this book.
    ///
    /// Each diff level, in order, is matched against the side by exact
    /// price:
    ///
    /// - same price, size zero: the level is removed
    /// - same price, non-zero size: the size is overwritten
    /// - no match: the level is inserted before the first worse price,
    ///   or appended after the worst one if the side still has room
    ///
    /// A zero-size level with no match is ignored. Both sides are then
    /// truncated to `max_depth` and the book takes the diff's sequence.
    pub fn merge(&mut self, diff: &Orderbook, max_depth: usize) {
        merge_side(&mut self.asks, &diff.asks, Side::Ask, max_depth);
        merge_side(&mut self.bids, &diff.bids, Side::Bid, max_depth);
        self.sequence = diff.sequence;
        self.timestamp = diff.timestamp;
    }

    /// Copy of this book with both sides cut to `depth` levels
    ///
    /// Returns `None` when either side has fewer than `depth` levels.
    #[must_use]
    pub fn truncated(&self, depth: usize) -> Option<Orderbook> {
        if self.asks.len() < depth || self.bids.len() < depth {
            return None;
        }
        Some(Orderbook {
            sequence: self.sequence,
            timestamp: self.timestamp,
            asks: self.asks[..depth].to_vec(),
            bids: self.bids[..depth].to_vec(),
        })
    }

    /// Get the best bid
    #[must_use]
    pub fn best_bid(&self) -> Option<BookItem> {
        self.bids.first().copied()
    }

    /// Get the best ask
    #[must_use]
    pub fn best_ask(&self) -> Option<BookItem> {
        self.asks.first().copied()
    }

    /// Get the mid price
    ///
    /// Returns the average of best bid and best ask, or `None` if either is missing.
    #[must_use]
    pub fn mid_price(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / 2.0),
            _ => None,
        }
    }

    /// Get the spread
    #[must_use]
    pub fn spread(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    /// Check if the book is crossed (best bid >= best ask)
    ///
    /// This shouldn't happen in a healthy book but is useful for validation.
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price >= ask.price,
            _ => false,
        }
    }

    /// Check the full-book invariants against a depth bound
    #[must_use]
    pub fn is_well_formed(&self, max_depth: usize) -> bool {
        side_well_formed(&self.asks, Side::Ask, max_depth)
            && side_well_formed(&self.bids, Side::Bid, max_depth)
    }

    /// Check if the orderbook is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.asks.is_empty() && self.bids.is_empty()
    }

    /// Get the number of price levels as `(bids, asks)`
    #[must_use]
    pub fn num_levels(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }
}

impl Default for Orderbook {
    fn default() -> Self {
        Self::new(0)
    }
}

fn merge_side(levels: &mut Vec<BookItem>, updates: &[BookItem], side: Side, max_depth: usize) {
    for update in updates {
        // First level that is not strictly better than the update
        let pos = levels
            .iter()
            .position(|level| !side.is_better(level.price, update.price));

        match pos {
            Some(i) if levels[i].price == update.price => {
                if update.size == 0.0 {
                    levels.remove(i);
                } else {
                    levels[i].size = update.size;
                }
            }
            Some(i) => {
                if update.size != 0.0 {
                    levels.insert(i, *update);
                }
            }
            None => {
                if update.size != 0.0 && levels.len() < max_depth {
                    levels.push(*update);
                }
            }
        }
    }
    levels.truncate(max_depth);
}

fn normalize(levels: Vec<BookItem>, side: Side, max_depth: usize) -> Vec<BookItem> {
    let mut out: Vec<BookItem> = Vec::with_capacity(levels.len().min(max_depth));
    merge_side(&mut out, &levels, side, usize::MAX);
    out.truncate(max_depth);
    out
}

fn side_well_formed(levels: &[BookItem], side: Side, max_depth: usize) -> bool {
    levels.len() <= max_depth
        && levels.iter().all(|l| l.size > 0.0)
        && levels
            .windows(2)
            .all(|pair| side.is_better(pair[0].price, pair[1].price))
}
