//! Materialized order book of one market.
//!
//! Bid/ask price levels keyed by price, a snapshot sequence watermark and
//! last-trade bookkeeping for the REST fallback refresh.
//!
//! Single-writer: bid/ask levels are only mutated by the market's own
//! processing task. Readers take a consistent copy with [`MarketBook::snapshot`].

use crate::error::{BookError, BookResult};
use chrono::{DateTime, Utc};
use obsync_core::{DiffEvent, MarketId, Price, PriceLevel, SequenceId, Size, SnapshotEvent, TradeEvent};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Book shared between its processing task (writer) and readers.
pub type SharedBook = Arc<RwLock<MarketBook>>;

/// Which diffs count as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalenessPolicy {
    /// Drop diffs with `sequence <= snapshot_sequence` only.
    #[default]
    SnapshotOnly,
    /// Additionally drop diffs not newer than the last applied diff.
    StrictlyIncreasing,
}

/// Per-market order book.
#[derive(Debug)]
pub struct MarketBook {
    market: MarketId,
    bids: BTreeMap<Price, Size>,
    asks: BTreeMap<Price, Size>,
    /// Sequence of the last full snapshot applied.
    snapshot_sequence: SequenceId,
    /// Highest sequence of any diff applied since the last snapshot.
    last_diff_sequence: Option<SequenceId>,
    last_trade_price: Option<Price>,
    last_trade_applied_at: Option<Instant>,
    last_trade_rest_refreshed_at: Option<Instant>,
    last_update: DateTime<Utc>,
}

impl MarketBook {
    /// Create an empty book.
    pub fn new(market: MarketId) -> Self {
        Self {
            market,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            snapshot_sequence: 0,
            last_diff_sequence: None,
            last_trade_price: None,
            last_trade_applied_at: None,
            last_trade_rest_refreshed_at: None,
            last_update: Utc::now(),
        }
    }

    /// Create a book initialized from a snapshot.
    pub fn from_snapshot(snapshot: &SnapshotEvent) -> BookResult<Self> {
        let mut book = Self::new(snapshot.market.clone());
        book.apply_snapshot(&snapshot.bids, &snapshot.asks, snapshot.sequence)?;
        Ok(book)
    }

    pub fn into_shared(self) -> SharedBook {
        Arc::new(RwLock::new(self))
    }

    pub fn market(&self) -> &MarketId {
        &self.market
    }

    pub fn snapshot_sequence(&self) -> SequenceId {
        self.snapshot_sequence
    }

    pub fn last_diff_sequence(&self) -> Option<SequenceId> {
        self.last_diff_sequence
    }

    pub fn last_trade_price(&self) -> Option<Price> {
        self.last_trade_price
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    /// Check whether a diff with this sequence must be dropped.
    pub fn is_stale(&self, sequence: SequenceId, policy: StalenessPolicy) -> bool {
        if sequence <= self.snapshot_sequence {
            return true;
        }
        match policy {
            StalenessPolicy::SnapshotOnly => false,
            StalenessPolicy::StrictlyIncreasing => self
                .last_diff_sequence
                .is_some_and(|last| sequence <= last),
        }
    }

    /// Merge price-level deltas into the book.
    ///
    /// A zero size deletes the level (a no-op when the level is absent),
    /// any other size upserts it. No ordering check is made here: callers
    /// filter stale diffs first. The diff is validated before any level is
    /// touched, so a rejected diff leaves the book unchanged.
    pub fn apply_diff(
        &mut self,
        bids: &[PriceLevel],
        asks: &[PriceLevel],
        sequence: SequenceId,
    ) -> BookResult<()> {
        self.validate_levels(bids, sequence)?;
        self.validate_levels(asks, sequence)?;

        merge_levels(&mut self.bids, bids);
        merge_levels(&mut self.asks, asks);

        self.last_diff_sequence = Some(self.last_diff_sequence.map_or(sequence, |s| s.max(sequence)));
        self.last_update = Utc::now();
        Ok(())
    }

    /// Replace the entire book content.
    pub fn apply_snapshot(
        &mut self,
        bids: &[PriceLevel],
        asks: &[PriceLevel],
        sequence: SequenceId,
    ) -> BookResult<()> {
        self.validate_levels(bids, sequence)?;
        self.validate_levels(asks, sequence)?;

        if sequence < self.snapshot_sequence {
            debug!(
                market = %self.market,
                current = self.snapshot_sequence,
                sequence,
                "Applying snapshot older than current watermark"
            );
        }

        self.bids = collect_levels(bids);
        self.asks = collect_levels(asks);
        self.snapshot_sequence = sequence;
        self.last_diff_sequence = None;
        self.last_update = Utc::now();
        Ok(())
    }

    /// Apply a snapshot, then replay the recent diffs newer than it.
    ///
    /// Diffs are replayed in the order given (arrival order); diffs with a
    /// sequence at or below the snapshot's are skipped. Returns the number
    /// of replayed diffs.
    pub fn restore_from_snapshot_and_diffs<'a, I>(
        &mut self,
        snapshot: &SnapshotEvent,
        recent_diffs: I,
    ) -> BookResult<usize>
    where
        I: IntoIterator<Item = &'a DiffEvent>,
    {
        if snapshot.market != self.market {
            return Err(BookError::MarketMismatch {
                expected: self.market.clone(),
                got: snapshot.market.clone(),
            });
        }

        // Validate the replay set up front so the restore is all-or-nothing.
        let replay: Vec<&DiffEvent> = recent_diffs
            .into_iter()
            .filter(|diff| diff.sequence > snapshot.sequence)
            .collect();
        for diff in &replay {
            self.validate_levels(&diff.bids, diff.sequence)?;
            self.validate_levels(&diff.asks, diff.sequence)?;
        }

        self.apply_snapshot(&snapshot.bids, &snapshot.asks, snapshot.sequence)?;
        for diff in &replay {
            self.apply_diff(&diff.bids, &diff.asks, diff.sequence)?;
        }

        if !replay.is_empty() {
            debug!(
                market = %self.market,
                snapshot_sequence = snapshot.sequence,
                replayed = replay.len(),
                "Replayed recent diffs over snapshot"
            );
        }
        Ok(replay.len())
    }

    /// Record a trade print. Trades never touch book levels.
    pub fn apply_trade(&mut self, trade: &TradeEvent) {
        self.last_trade_price = Some(trade.price);
        self.last_trade_applied_at = Some(Instant::now());
    }

    /// Record a last-trade price obtained from the REST fallback.
    pub fn apply_rest_trade_price(&mut self, price: Price) {
        self.last_trade_price = Some(price);
        self.last_trade_rest_refreshed_at = Some(Instant::now());
    }

    /// Mark a REST refresh attempt even if it yielded no price.
    pub fn touch_rest_refresh(&mut self) {
        self.last_trade_rest_refreshed_at = Some(Instant::now());
    }

    /// Whether the last-trade price should be refreshed over REST.
    ///
    /// True when no trade was applied within `stale_after` and no REST
    /// refresh happened within `min_interval`.
    pub fn needs_trade_refresh(&self, now: Instant, stale_after: Duration, min_interval: Duration) -> bool {
        let trade_stale = self
            .last_trade_applied_at
            .map_or(true, |t| now.saturating_duration_since(t) > stale_after);
        let rest_stale = self
            .last_trade_rest_refreshed_at
            .map_or(true, |t| now.saturating_duration_since(t) > min_interval);
        trade_stale && rest_stale
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(p, s)| PriceLevel::new(*p, *s))
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.iter().next().map(|(p, s)| PriceLevel::new(*p, *s))
    }

    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    /// Size resting at a bid price, if the level exists.
    pub fn bid_size(&self, price: Price) -> Option<Size> {
        self.bids.get(&price).copied()
    }

    /// Size resting at an ask price, if the level exists.
    pub fn ask_size(&self, price: Price) -> Option<Size> {
        self.asks.get(&price).copied()
    }

    /// Consistent read-only copy of the book, best prices first.
    pub fn snapshot(&self) -> BookSnapshot {
        BookSnapshot {
            market: self.market.clone(),
            snapshot_sequence: self.snapshot_sequence,
            last_diff_sequence: self.last_diff_sequence,
            bids: self
                .bids
                .iter()
                .rev()
                .map(|(p, s)| PriceLevel::new(*p, *s))
                .collect(),
            asks: self
                .asks
                .iter()
                .map(|(p, s)| PriceLevel::new(*p, *s))
                .collect(),
            last_trade_price: self.last_trade_price,
            updated_at: self.last_update,
        }
    }

    fn validate_levels(&self, levels: &[PriceLevel], sequence: SequenceId) -> BookResult<()> {
        for level in levels {
            if level.price.is_negative() {
                return Err(self.invalid(sequence, format!("negative price {}", level.price)));
            }
            if level.size.is_negative() {
                return Err(self.invalid(
                    sequence,
                    format!("negative size {} at {}", level.size, level.price),
                ));
            }
        }
        Ok(())
    }

    fn invalid(&self, sequence: SequenceId, reason: String) -> BookError {
        BookError::InvalidLevel {
            market: self.market.clone(),
            sequence,
            reason,
        }
    }
}

fn merge_levels(side: &mut BTreeMap<Price, Size>, deltas: &[PriceLevel]) {
    for level in deltas {
        if level.size.is_zero() {
            side.remove(&level.price);
        } else {
            side.insert(level.price, level.size);
        }
    }
}

fn collect_levels(levels: &[PriceLevel]) -> BTreeMap<Price, Size> {
    levels
        .iter()
        .filter(|l| !l.size.is_zero())
        .map(|l| (l.price, l.size))
        .collect()
}

/// Read-only view of a book handed to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookSnapshot {
    pub market: MarketId,
    pub snapshot_sequence: SequenceId,
    pub last_diff_sequence: Option<SequenceId>,
    /// Highest price first.
    pub bids: Vec<PriceLevel>,
    /// Lowest price first.
    pub asks: Vec<PriceLevel>,
    pub last_trade_price: Option<Price>,
    pub updated_at: DateTime<Utc>,
}

impl BookSnapshot {
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    pub fn mid(&self) -> Option<Price> {
        self.best_bid()?.price.mid(self.best_ask()?.price)
    }

    /// Spread in basis points of the mid price. `None` when a side is
    /// empty, the mid is zero, or the arithmetic overflows.
    pub fn spread_bps(&self) -> Option<Decimal> {
        let bid = self.best_bid()?.price.inner();
        let ask = self.best_ask()?.price.inner();
        let mid = self.mid()?.inner();
        if mid.is_zero() {
            return None;
        }
        ask.checked_sub(bid)?
            .checked_div(mid)?
            .checked_mul(Decimal::from(10_000))
    }

    /// First `depth` levels of each side.
    pub fn top(&self, depth: usize) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
        (
            self.bids.iter().take(depth).copied().collect(),
            self.asks.iter().take(depth).copied().collect(),
        )
    }
}
