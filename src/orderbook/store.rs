//! Concurrent per-symbol book storage.
//!
//! This module provides [`BookStore`], the owner of every symbol's book and
//! deferred diff buffer.
//!
//! # Design
//!
//! The symbol table is a `parking_lot::RwLock<FxHashMap>`; it is only
//! write-locked the first time a symbol is seen. Each symbol has its own
//! `Mutex` serializing snapshot and diff application, so work on different
//! symbols proceeds in parallel.
//!
//! After every mutation the book is cloned into an `Arc` and stored in an
//! `ArcSwapOption`. Readers load that `Arc` without touching the mutation
//! lock and never see a half-merged book; a loaded book never changes.
//!
//! # Sequence Tracking
//!
//! A diff is applied only when its sequence is exactly one past the book's.
//! Anything further ahead waits in the [`DeferredBuffer`]; anything at or
//! behind the book is dropped. A gap that stays open past the
//! [`ResyncPolicy`] limits is reported as [`DiffOutcome::Stalled`] so the
//! caller can ask the venue for a fresh snapshot.

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use super::{DeferredBuffer, Orderbook};
use crate::config::ResyncPolicy;
use crate::types::Sequence;

/// What happened to a diff handed to [`BookStore::apply_diff`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOutcome {
    /// The book advanced by this many diffs (the new one plus any it unblocked)
    Applied(usize),
    /// Waiting for a missing predecessor
    Buffered,
    /// No snapshot yet for this symbol; held until one arrives
    AwaitingSnapshot,
    /// Discarded: at or behind the book's sequence, a duplicate, or part of
    /// an overflowing buffer while a snapshot is already on its way
    Dropped,
    /// The gap has been open too long; a fresh snapshot should be requested
    Stalled,
}

#[derive(Debug, Default)]
struct SymbolState {
    book: Option<Orderbook>,
    deferred: DeferredBuffer,
    resync_requested_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct SymbolBook {
    state: Mutex<SymbolState>,
    published: ArcSwapOption<Orderbook>,
}

impl SymbolBook {
    fn publish(&self, book: &Orderbook) {
        self.published.store(Some(Arc::new(book.clone())));
    }
}

/// Books for every symbol, safe to share across tasks via `Arc<BookStore>`.
///
/// # Example
///
/// ```rust
/// use hitbtc_replica::config::ResyncPolicy;
/// use hitbtc_replica::orderbook::{BookItem, BookStore, DiffOutcome, Orderbook};
///
/// let store = BookStore::new(10, ResyncPolicy::default());
///
/// let snapshot = Orderbook::snapshot(5, 0, vec![BookItem::new(100.0, 1.0)], vec![], 10);
/// store.apply_snapshot("ETHBTC", snapshot);
///
/// let diff = Orderbook::diff(6, 0, vec![BookItem::new(99.0, 3.0)], vec![]);
/// assert_eq!(store.apply_diff("ETHBTC", diff), DiffOutcome::Applied(1));
///
/// let book = store.current_book("ETHBTC").unwrap();
/// assert_eq!(book.best_ask(), Some(BookItem::new(99.0, 3.0)));
/// ```
#[derive(Debug)]
pub struct BookStore {
    max_depth: usize,
    policy: ResyncPolicy,
    symbols: RwLock<FxHashMap<String, Arc<SymbolBook>>>,
}

impl BookStore {
    /// Create an empty store bounding every side to `max_depth` levels
    pub fn new(max_depth: usize, policy: ResyncPolicy) -> Self {
        Self {
            max_depth,
            policy,
            symbols: RwLock::new(FxHashMap::default()),
        }
    }

    /// Get the per-side depth bound
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn entry(&self, symbol: &str) -> Arc<SymbolBook> {
        if let Some(entry) = self.symbols.read().get(symbol) {
            return Arc::clone(entry);
        }
        let mut symbols = self.symbols.write();
        Arc::clone(symbols.entry(symbol.to_string()).or_default())
    }

    fn existing(&self, symbol: &str) -> Option<Arc<SymbolBook>> {
        self.symbols.read().get(symbol).cloned()
    }

    /// Replace a symbol's book with a snapshot.
    ///
    /// A snapshot always wins, whatever its sequence; buffered diffs and any
    /// pending resync are discarded.
    pub fn apply_snapshot(&self, symbol: &str, mut book: Orderbook) {
        let entry = self.entry(symbol);
        let mut state = entry.state.lock();

        if !book.is_well_formed(self.max_depth) {
            book = Orderbook::snapshot(
                book.sequence(),
                book.timestamp(),
                book.asks().to_vec(),
                book.bids().to_vec(),
                self.max_depth,
            );
        }

        let dropped = state.deferred.len();
        state.deferred.clear();
        state.resync_requested_at = None;
        tracing::debug!(
            symbol = %symbol,
            seq = book.sequence(),
            dropped_diffs = dropped,
            "Applied snapshot"
        );
        entry.publish(&book);
        state.book = Some(book);
    }

    /// Apply a diff, buffering it if it arrived early
    pub fn apply_diff(&self, symbol: &str, diff: Orderbook) -> DiffOutcome {
        self.apply_diff_at(symbol, diff, Instant::now())
    }

    /// [`apply_diff`](Self::apply_diff) with an explicit clock reading
    pub fn apply_diff_at(&self, symbol: &str, diff: Orderbook, now: Instant) -> DiffOutcome {
        let entry = self.entry(symbol);
        let mut guard = entry.state.lock();
        let state = &mut *guard;
        let seq = diff.sequence();

        if let Some(book) = &state.book {
            if seq <= book.sequence() {
                tracing::trace!(symbol = %symbol, seq, book_seq = book.sequence(), "Dropping stale diff");
                return DiffOutcome::Dropped;
            }
        }

        if !state.deferred.insert(diff) {
            tracing::trace!(symbol = %symbol, seq, "Dropping duplicate diff");
            return DiffOutcome::Dropped;
        }

        let Some(book) = state.book.as_mut() else {
            if state.deferred.len() > self.policy.max_pending {
                tracing::warn!(
                    symbol = %symbol,
                    pending = state.deferred.len(),
                    "Too many diffs without a snapshot, discarding"
                );
                state.deferred.clear();
            }
            return DiffOutcome::AwaitingSnapshot;
        };

        let applied = state.deferred.sweep(book, self.max_depth, now);
        if applied > 0 {
            entry.publish(book);
            tracing::trace!(symbol = %symbol, seq = book.sequence(), applied, "Merged diffs");
        }

        if state.deferred.is_empty() {
            state.resync_requested_at = None;
            return DiffOutcome::Applied(applied);
        }

        let over_capacity = state.deferred.len() > self.policy.max_pending;
        let stuck = state
            .deferred
            .gap_age(now)
            .is_some_and(|age| age >= self.policy.stale_after);

        if over_capacity || stuck {
            let expected = book.sequence().saturating_add(1);
            let pending = state.deferred.len();
            if over_capacity {
                state.deferred.clear();
            }
            let recently_requested = state
                .resync_requested_at
                .is_some_and(|at| now.saturating_duration_since(at) < self.policy.stale_after);
            if !recently_requested {
                tracing::warn!(
                    symbol = %symbol,
                    expected,
                    pending,
                    "Sequence gap not filled, requesting snapshot"
                );
                state.resync_requested_at = Some(now);
                return DiffOutcome::Stalled;
            }
            if over_capacity {
                tracing::warn!(
                    symbol = %symbol,
                    expected,
                    pending,
                    "Snapshot already requested, discarding buffered diffs"
                );
                return DiffOutcome::Dropped;
            }
        }

        if applied > 0 {
            DiffOutcome::Applied(applied)
        } else {
            DiffOutcome::Buffered
        }
    }

    /// Latest published book for a symbol
    ///
    /// The returned book is immutable; later updates publish a new `Arc`.
    pub fn current_book(&self, symbol: &str) -> Option<Arc<Orderbook>> {
        self.existing(symbol)?.published.load_full()
    }

    /// Copy every book cut to `depth` levels per side
    ///
    /// A symbol maps to `None` when either side has fewer than `depth`
    /// levels. Symbols that never received a snapshot are omitted.
    pub fn copy_books(&self, depth: usize) -> FxHashMap<String, Option<Orderbook>> {
        let symbols = self.symbols.read();
        symbols
            .iter()
            .filter_map(|(symbol, entry)| {
                let book = entry.published.load_full()?;
                Some((symbol.clone(), book.truncated(depth)))
            })
            .collect()
    }

    /// Sequence of a symbol's book, if it has one
    pub fn sequence(&self, symbol: &str) -> Option<Sequence> {
        self.current_book(symbol).map(|b| b.sequence())
    }

    /// Number of diffs waiting for a predecessor
    pub fn pending_diffs(&self, symbol: &str) -> usize {
        self.existing(symbol)
            .map_or(0, |entry| entry.state.lock().deferred.len())
    }

    /// Symbols for which a fresh snapshot has been requested but not received
    pub fn symbols_needing_resync(&self) -> Vec<String> {
        let symbols = self.symbols.read();
        let mut out: Vec<String> = symbols
            .iter()
            .filter(|(_, entry)| entry.state.lock().resync_requested_at.is_some())
            .map(|(symbol, _)| symbol.clone())
            .collect();
        out.sort();
        out
    }

    /// Symbols that have a book
    pub fn symbols(&self) -> Vec<String> {
        let symbols = self.symbols.read();
        let mut out: Vec<String> = symbols
            .iter()
            .filter(|(_, entry)| entry.published.load().is_some())
            .map(|(symbol, _)| symbol.clone())
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::orderbook::BookItem;

    fn items(levels: &[(f64, f64)]) -> Vec<BookItem> {
        levels.iter().map(|&(p, s)| BookItem::new(p, s)).collect()
    }

    fn snapshot(seq: u64, asks: &[(f64, f64)], bids: &[(f64, f64)]) -> Orderbook {
        Orderbook::snapshot(seq, 0, items(asks), items(bids), 10)
    }

    fn diff(seq: u64, asks: &[(f64, f64)]) -> Orderbook {
        Orderbook::diff(seq, 0, items(asks), vec![])
    }

    fn store() -> BookStore {
        BookStore::new(10, ResyncPolicy::default())
    }

    #[test]
    fn test_out_of_order_matches_in_order() {
        let in_order = store();
        let shuffled = store();
        for s in [&in_order, &shuffled] {
            s.apply_snapshot("X", snapshot(10, &[(100.0, 1.0)], &[(90.0, 1.0)]));
        }

        let diffs = [
            diff(11, &[(99.0, 2.0)]),
            diff(12, &[(100.0, 0.0)]),
            diff(13, &[(101.0, 5.0)]),
        ];
        for d in &diffs {
            in_order.apply_diff("X", d.clone());
        }

        assert_eq!(shuffled.apply_diff("X", diffs[1].clone()), DiffOutcome::Buffered);
        assert_eq!(shuffled.apply_diff("X", diffs[2].clone()), DiffOutcome::Buffered);
        assert_eq!(shuffled.apply_diff("X", diffs[0].clone()), DiffOutcome::Applied(3));

        assert_eq!(
            in_order.current_book("X").unwrap(),
            shuffled.current_book("X").unwrap()
        );
        assert_eq!(shuffled.sequence("X"), Some(13));
        assert_eq!(shuffled.pending_diffs("X"), 0);
    }

    #[test]
    fn test_stale_and_duplicate_diffs_dropped() {
        let s = store();
        s.apply_snapshot("X", snapshot(10, &[(100.0, 1.0)], &[]));
        assert_eq!(s.apply_diff("X", diff(10, &[(1.0, 1.0)])), DiffOutcome::Dropped);
        assert_eq!(s.apply_diff("X", diff(3, &[(1.0, 1.0)])), DiffOutcome::Dropped);

        assert_eq!(s.apply_diff("X", diff(12, &[(1.0, 1.0)])), DiffOutcome::Buffered);
        assert_eq!(s.apply_diff("X", diff(12, &[(2.0, 1.0)])), DiffOutcome::Dropped);
        assert_eq!(s.pending_diffs("X"), 1);
    }

    #[test]
    fn test_diffs_before_snapshot_are_held() {
        let s = store();
        assert_eq!(
            s.apply_diff("X", diff(6, &[(99.0, 1.0)])),
            DiffOutcome::AwaitingSnapshot
        );
        assert!(s.current_book("X").is_none());
        assert!(s.copy_books(1).is_empty());

        // Snapshot discards the held diff, next diff applies on top
        s.apply_snapshot("X", snapshot(5, &[(100.0, 1.0)], &[]));
        assert_eq!(s.pending_diffs("X"), 0);
        assert_eq!(s.apply_diff("X", diff(6, &[(98.0, 1.0)])), DiffOutcome::Applied(1));
        assert_eq!(s.current_book("X").unwrap().asks().len(), 2);
    }

    #[test]
    fn test_snapshot_supersedes_buffered() {
        let s = store();
        s.apply_snapshot("X", snapshot(10, &[(100.0, 1.0)], &[]));
        s.apply_diff("X", diff(12, &[(50.0, 1.0)]));
        s.apply_diff("X", diff(13, &[(51.0, 1.0)]));
        assert_eq!(s.pending_diffs("X"), 2);

        // Older sequence than the current book still wins
        s.apply_snapshot("X", snapshot(8, &[(200.0, 1.0)], &[]));
        assert_eq!(s.pending_diffs("X"), 0);
        let book = s.current_book("X").unwrap();
        assert_eq!(book.sequence(), 8);
        assert_eq!(book.asks(), items(&[(200.0, 1.0)]).as_slice());
    }

    #[test]
    fn test_published_book_is_immutable() {
        let s = store();
        s.apply_snapshot("X", snapshot(1, &[(100.0, 1.0)], &[]));
        let before = s.current_book("X").unwrap();

        s.apply_diff("X", diff(2, &[(100.0, 0.0)]));
        let after = s.current_book("X").unwrap();

        assert_eq!(before.asks().len(), 1);
        assert!(after.asks().is_empty());
        assert_eq!(before.sequence(), 1);
    }

    #[test]
    fn test_copy_books() {
        let s = store();
        s.apply_snapshot("DEEP", snapshot(1, &[(1.0, 1.0), (2.0, 1.0)], &[(0.5, 1.0), (0.4, 1.0)]));
        s.apply_snapshot("THIN", snapshot(1, &[(1.0, 1.0)], &[(0.5, 1.0), (0.4, 1.0)]));
        s.apply_diff("NOBOOK", diff(3, &[(1.0, 1.0)]));

        let copies = s.copy_books(2);
        assert_eq!(copies.len(), 2);
        assert_eq!(copies["DEEP"].as_ref().unwrap().asks().len(), 2);
        assert!(copies["THIN"].is_none());
        assert!(!copies.contains_key("NOBOOK"));

        let shallow = s.copy_books(1);
        assert_eq!(shallow["THIN"].as_ref().unwrap().bids().len(), 1);
        assert_eq!(s.symbols(), vec!["DEEP".to_string(), "THIN".to_string()]);
    }

    #[test]
    fn test_stall_after_timeout() {
        let s = store();
        let t0 = Instant::now();
        s.apply_snapshot("X", snapshot(10, &[(100.0, 1.0)], &[]));

        assert_eq!(s.apply_diff_at("X", diff(12, &[]), t0), DiffOutcome::Buffered);
        assert_eq!(
            s.apply_diff_at("X", diff(13, &[]), t0 + Duration::from_secs(1)),
            DiffOutcome::Buffered
        );
        assert_eq!(
            s.apply_diff_at("X", diff(14, &[]), t0 + Duration::from_secs(6)),
            DiffOutcome::Stalled
        );
        assert_eq!(s.symbols_needing_resync(), vec!["X".to_string()]);

        // Suppressed until stale_after passes again
        assert_eq!(
            s.apply_diff_at("X", diff(15, &[]), t0 + Duration::from_secs(7)),
            DiffOutcome::Buffered
        );
        assert_eq!(
            s.apply_diff_at("X", diff(16, &[]), t0 + Duration::from_secs(12)),
            DiffOutcome::Stalled
        );

        s.apply_snapshot("X", snapshot(20, &[(100.0, 1.0)], &[]));
        assert!(s.symbols_needing_resync().is_empty());
    }

    #[test]
    fn test_stall_over_capacity_clears_buffer() {
        let policy = ResyncPolicy {
            stale_after: Duration::from_secs(60),
            max_pending: 3,
        };
        let s = BookStore::new(10, policy);
        let t0 = Instant::now();
        s.apply_snapshot("X", snapshot(1, &[(100.0, 1.0)], &[]));

        for seq in 3..6 {
            assert_eq!(s.apply_diff_at("X", diff(seq, &[]), t0), DiffOutcome::Buffered);
        }
        assert_eq!(s.apply_diff_at("X", diff(6, &[]), t0), DiffOutcome::Stalled);
        assert_eq!(s.pending_diffs("X"), 0);
        assert_eq!(s.sequence("X"), Some(1));

        // Overflowing again while the snapshot is outstanding discards
        for seq in 7..10 {
            assert_eq!(s.apply_diff_at("X", diff(seq, &[]), t0), DiffOutcome::Buffered);
        }
        assert_eq!(s.apply_diff_at("X", diff(10, &[]), t0), DiffOutcome::Dropped);
        assert_eq!(s.pending_diffs("X"), 0);
        assert_eq!(s.symbols_needing_resync(), vec!["X".to_string()]);
    }

    #[test]
    fn test_invariants_hold_under_random_diffs() {
        let s = BookStore::new(5, ResyncPolicy::default());
        s.apply_snapshot("X", snapshot(0, &[(100.0, 1.0)], &[(99.0, 1.0)]));

        // Deterministic pseudo-random walk
        let mut x: u64 = 0x2545_f491_4f6c_dd1d;
        for seq in 1..500u64 {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            let ask = 100.0 + (x % 20) as f64;
            let bid = 99.0 - ((x >> 8) % 20) as f64;
            let size = ((x >> 16) % 3) as f64;
            let d = Orderbook::diff(
                seq,
                0,
                vec![BookItem::new(ask, size)],
                vec![BookItem::new(bid, size)],
            );
            s.apply_diff("X", d);
            assert!(s.current_book("X").unwrap().is_well_formed(5));
        }
        assert_eq!(s.sequence("X"), Some(499));
    }

    fn random_diffs(count: u64, mut x: u64) -> Vec<Orderbook> {
        (1..=count)
            .map(|seq| {
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                let ask = 100.0 + (x % 30) as f64;
                let bid = 99.0 - ((x >> 8) % 30) as f64;
                let size = ((x >> 16) % 3) as f64;
                Orderbook::diff(
                    seq,
                    0,
                    vec![BookItem::new(ask, size)],
                    vec![BookItem::new(bid, size)],
                )
            })
            .collect()
    }

    fn patient_store() -> BookStore {
        BookStore::new(
            10,
            ResyncPolicy {
                stale_after: Duration::from_secs(600),
                max_pending: 100_000,
            },
        )
    }

    #[test]
    fn test_concurrent_writers_match_in_order() {
        const WRITERS: u64 = 4;
        let diffs = random_diffs(800, 0x9e37_79b9_7f4a_7c15);
        let base = snapshot(0, &[(100.0, 1.0)], &[(99.0, 1.0)]);

        let expected = patient_store();
        expected.apply_snapshot("X", base.clone());
        for d in &diffs {
            expected.apply_diff("X", d.clone());
        }

        let s = patient_store();
        s.apply_snapshot("X", base);
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            for _ in 0..2 {
                scope.spawn(|| {
                    let mut last = 0;
                    while !done.load(Ordering::Acquire) {
                        let book = s.current_book("X").unwrap();
                        assert!(book.is_well_formed(10));
                        assert!(book.sequence() >= last, "published sequence went backwards");
                        last = book.sequence();
                    }
                });
            }

            let writers: Vec<_> = (0..WRITERS)
                .map(|w| {
                    let s = &s;
                    let mine: Vec<Orderbook> = diffs
                        .iter()
                        .filter(|d| d.sequence() % WRITERS == w)
                        .rev()
                        .cloned()
                        .collect();
                    scope.spawn(move || {
                        for d in mine {
                            s.apply_diff("X", d);
                        }
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap();
            }
            done.store(true, Ordering::Release);
        });

        assert_eq!(s.pending_diffs("X"), 0);
        assert_eq!(s.current_book("X"), expected.current_book("X"));
    }

    #[test]
    fn test_concurrent_snapshots_and_diffs_stay_well_formed() {
        let diffs = random_diffs(2_000, 0x2545_f491_4f6c_dd1d);
        let s = patient_store();
        s.apply_snapshot("X", snapshot(0, &[(100.0, 1.0)], &[(99.0, 1.0)]));
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let book = s.current_book("X").unwrap();
                    assert!(book.is_well_formed(10));
                    assert!(!book.is_crossed());
                }
            });

            let snapshots = scope.spawn(|| {
                for k in 0..50u64 {
                    let asks: Vec<(f64, f64)> = (0..12).map(|i| (150.0 + i as f64, 1.0)).collect();
                    let bids: Vec<(f64, f64)> = (0..12).map(|i| (60.0 - i as f64, 1.0)).collect();
                    s.apply_snapshot("X", snapshot(k * 40, &asks, &bids));
                    std::thread::yield_now();
                }
            });
            let feed = scope.spawn(|| {
                for d in &diffs {
                    s.apply_diff("X", d.clone());
                }
            });
            snapshots.join().unwrap();
            feed.join().unwrap();
            done.store(true, Ordering::Release);
        });

        // A snapshot after the race resets the book; diffs continue from it
        s.apply_snapshot("X", snapshot(5_000, &[(100.0, 1.0)], &[(99.0, 1.0)]));
        s.apply_diff("X", diff(5_002, &[(101.0, 2.0)]));
        s.apply_diff("X", diff(5_001, &[(100.0, 0.0)]));
        let book = s.current_book("X").unwrap();
        assert_eq!(book.sequence(), 5_002);
        assert_eq!(book.asks(), items(&[(101.0, 2.0)]).as_slice());
        assert_eq!(s.pending_diffs("X"), 0);
    }
}
