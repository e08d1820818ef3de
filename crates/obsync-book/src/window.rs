//! Bounded history of the most recent diffs of one market.

use obsync_core::DiffEvent;
use std::collections::VecDeque;

/// Last N diffs received for a market, oldest first.
///
/// Used to replay diffs over a freshly applied snapshot. Pushing into a
/// full window evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct RecentDiffWindow {
    diffs: VecDeque<DiffEvent>,
    capacity: usize,
}

impl RecentDiffWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            diffs: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, diff: DiffEvent) {
        if self.diffs.len() == self.capacity {
            self.diffs.pop_front();
        }
        self.diffs.push_back(diff);
    }

    /// Iterate in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &DiffEvent> + '_ {
        self.diffs.iter()
    }

    pub fn len(&self) -> usize {
        self.diffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.diffs.clear();
    }
}

impl<'a> IntoIterator for &'a RecentDiffWindow {
    type Item = &'a DiffEvent;
    type IntoIter = std::collections::vec_deque::Iter<'a, DiffEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.diffs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obsync_core::MarketId;

    fn diff(sequence: u64) -> DiffEvent {
        DiffEvent::new(MarketId::from("BTC-USD"), sequence, vec![], vec![])
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut window = RecentDiffWindow::new(3);
        for seq in 1..=5 {
            window.push(diff(seq));
        }

        assert_eq!(window.len(), 3);
        let seqs: Vec<u64> = window.iter().map(|d| d.sequence).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut window = RecentDiffWindow::new(0);
        window.push(diff(1));
        window.push(diff(2));

        assert_eq!(window.capacity(), 1);
        assert_eq!(window.iter().next().map(|d| d.sequence), Some(2));
    }

    #[test]
    fn test_clear() {
        let mut window = RecentDiffWindow::new(4);
        window.push(diff(1));
        window.clear();
        assert!(window.is_empty());
    }
}
