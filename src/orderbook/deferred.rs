//! Out-of-order diff buffer.
//!
//! Diffs that arrive ahead of the book's next expected sequence wait here,
//! keyed by sequence, until their predecessor shows up.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::Orderbook;
use crate::types::Sequence;

/// Pending diffs for one symbol, keyed by sequence
#[derive(Debug, Default)]
pub struct DeferredBuffer {
    pending: BTreeMap<Sequence, Orderbook>,
    gap_since: Option<Instant>,
}

impl DeferredBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a diff
    ///
    /// Returns `false` if a diff with the same sequence is already waiting;
    /// the first one received is kept.
    pub fn insert(&mut self, diff: Orderbook) -> bool {
        match self.pending.entry(diff.sequence()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(diff);
                true
            }
        }
    }

    /// Drop every diff with sequence at or below `sequence`
    pub fn prune_through(&mut self, sequence: Sequence) -> usize {
        let before = self.pending.len();
        self.pending = self.pending.split_off(&sequence.saturating_add(1));
        before - self.pending.len()
    }

    /// Apply every diff that continues `book` without a gap.
    ///
    /// Stale entries are pruned first. Returns how many diffs were merged.
    /// The gap clock starts when the sweep leaves diffs waiting and restarts
    /// whenever the sweep makes progress.
    pub fn sweep(&mut self, book: &mut Orderbook, max_depth: usize, now: Instant) -> usize {
        self.prune_through(book.sequence());

        let mut applied = 0;
        while let Some(entry) = self.pending.first_entry() {
            if *entry.key() != book.sequence().saturating_add(1) {
                break;
            }
            let diff = entry.remove();
            book.merge(&diff, max_depth);
            applied += 1;
        }

        if self.pending.is_empty() {
            self.gap_since = None;
        } else if applied > 0 || self.gap_since.is_none() {
            self.gap_since = Some(now);
        }
        applied
    }

    /// How long the current gap has been open
    pub fn gap_age(&self, now: Instant) -> Option<Duration> {
        self.gap_since.map(|since| now.saturating_duration_since(since))
    }

    /// Lowest waiting sequence
    pub fn first_sequence(&self) -> Option<Sequence> {
        self.pending.keys().next().copied()
    }

    /// Number of waiting diffs
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop everything and stop the gap clock
    pub fn clear(&mut self) {
        self.pending.clear();
        self.gap_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::BookItem;

    fn diff(seq: u64, ask: f64) -> Orderbook {
        Orderbook::diff(seq, 0, vec![BookItem::new(ask, 1.0)], vec![])
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let mut buf = DeferredBuffer::new();
        assert!(buf.insert(diff(5, 1.0)));
        assert!(!buf.insert(diff(5, 2.0)));
        assert_eq!(buf.len(), 1);

        let mut book = Orderbook::new(4);
        buf.sweep(&mut book, 10, Instant::now());
        assert_eq!(book.asks()[0].price, 1.0);
    }

    #[test]
    fn test_sweep_applies_contiguous_run() {
        let mut buf = DeferredBuffer::new();
        buf.insert(diff(3, 3.0));
        buf.insert(diff(2, 2.0));
        buf.insert(diff(5, 5.0));

        let mut book = Orderbook::new(1);
        let applied = buf.sweep(&mut book, 10, Instant::now());

        assert_eq!(applied, 2);
        assert_eq!(book.sequence(), 3);
        assert_eq!(buf.first_sequence(), Some(5));
    }

    #[test]
    fn test_sweep_prunes_stale() {
        let mut buf = DeferredBuffer::new();
        buf.insert(diff(2, 2.0));
        buf.insert(diff(4, 4.0));
        buf.insert(diff(7, 7.0));

        let mut book = Orderbook::new(4);
        assert_eq!(buf.sweep(&mut book, 10, Instant::now()), 0);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.first_sequence(), Some(7));
        assert!(book.is_empty());
    }

    #[test]
    fn test_gap_clock() {
        let mut buf = DeferredBuffer::new();
        let start = Instant::now();
        let mut book = Orderbook::new(1);

        buf.insert(diff(3, 3.0));
        buf.sweep(&mut book, 10, start);
        assert_eq!(buf.gap_age(start), Some(Duration::ZERO));

        // No progress: clock keeps running from the first stall
        let later = start + Duration::from_secs(2);
        buf.insert(diff(4, 4.0));
        buf.sweep(&mut book, 10, later);
        assert_eq!(buf.gap_age(later), Some(Duration::from_secs(2)));

        // Gap filled: clock stops
        buf.insert(diff(2, 2.0));
        assert_eq!(buf.sweep(&mut book, 10, later), 3);
        assert_eq!(buf.gap_age(later), None);
        assert_eq!(book.sequence(), 4);
    }

    #[test]
    fn test_clear() {
        let mut buf = DeferredBuffer::new();
        buf.insert(diff(9, 1.0));
        let mut book = Orderbook::new(1);
        buf.sweep(&mut book, 10, Instant::now());
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.gap_age(Instant::now()), None);
    }
}
