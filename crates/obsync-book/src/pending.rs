//! Diffs parked while a market's initial snapshot is being fetched.

use obsync_core::DiffEvent;
use std::collections::VecDeque;

pub const DEFAULT_PENDING_CAPACITY: usize = 1000;

/// FIFO of diffs received before a market's book exists.
///
/// Capped; when full the oldest diff is evicted and handed back to the
/// caller so it can be counted as rejected.
#[derive(Debug)]
pub struct PendingEventBuffer {
    events: VecDeque<DiffEvent>,
    capacity: usize,
}

impl Default for PendingEventBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_CAPACITY)
    }
}

impl PendingEventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a diff, returning the evicted oldest diff if the buffer was full.
    pub fn push(&mut self, diff: DiffEvent) -> Option<DiffEvent> {
        let evicted = if self.events.len() >= self.capacity {
            self.events.pop_front()
        } else {
            None
        };
        self.events.push_back(diff);
        evicted
    }

    pub fn pop_front(&mut self) -> Option<DiffEvent> {
        self.events.pop_front()
    }

    /// Take every buffered diff in arrival order, leaving the buffer empty.
    pub fn take(&mut self) -> VecDeque<DiffEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obsync_core::MarketId;

    fn diff(sequence: u64) -> DiffEvent {
        DiffEvent::new(MarketId::from("ETH-USD"), sequence, vec![], vec![])
    }

    #[test]
    fn test_push_keeps_arrival_order() {
        let mut buffer = PendingEventBuffer::new(10);
        assert!(buffer.push(diff(7)).is_none());
        assert!(buffer.push(diff(5)).is_none());

        let drained: Vec<u64> = buffer.take().into_iter().map(|d| d.sequence).collect();
        assert_eq!(drained, vec![7, 5]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut buffer = PendingEventBuffer::new(2);
        buffer.push(diff(1));
        buffer.push(diff(2));

        let evicted = buffer.push(diff(3));

        assert_eq!(evicted.map(|d| d.sequence), Some(1));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.pop_front().map(|d| d.sequence), Some(2));
    }

    #[test]
    fn test_default_capacity() {
        assert_eq!(PendingEventBuffer::default().capacity(), DEFAULT_PENDING_CAPACITY);
    }
}
