//! Fee estimation
//!
//! One bid per lane. A refresh derives the bid from the network fee
//! percentiles (p95 for claims, p99 for transfers), an escalation bumps it
//! multiplicatively after a failed submission. Bids always stay within
//! `[base_fee, max_fee]`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::config::EngineConfig;
use crate::events::EventBus;
use crate::ledger::{FeeStats, LedgerClient};
use crate::OperationKind;

/// Bid derived from a network fee percentile
///
/// `max(percentile * multiplier, base)` rounded up to a multiple of 100,
/// then capped at `max_fee`.
pub fn percentile_bid(percentile: u64, base_fee: u64, max_fee: u64, multiplier: f64) -> u64 {
    let scaled = (percentile as f64 * multiplier).max(base_fee as f64);
    let rounded = (scaled / 100.0).ceil() * 100.0;
    (rounded as u64).min(max_fee)
}

/// Bid after one failed submission, never below `current`
pub fn escalated_bid(current: u64, base_fee: u64, max_fee: u64, multiplier: f64) -> u64 {
    let bumped = ((current as f64 * multiplier / 50.0).ceil() * 100.0) as u64;
    bumped.clamp(base_fee, max_fee).max(current)
}

/// Per-lane fee state
pub struct FeeEstimator {
    ledger: Arc<dyn LedgerClient>,
    events: EventBus,
    base_fee: u64,
    max_fee: u64,
    multiplier: f64,
    claim_bid: AtomicU64,
    transfer_bid: AtomicU64,
    refresh_failures: AtomicU64,
}

impl FeeEstimator {
    pub fn new(config: &EngineConfig, ledger: Arc<dyn LedgerClient>, events: EventBus) -> Self {
        Self {
            ledger,
            events,
            base_fee: config.base_fee,
            max_fee: config.max_fee,
            multiplier: config.fee_multiplier,
            claim_bid: AtomicU64::new(config.base_fee),
            transfer_bid: AtomicU64::new(config.base_fee),
            refresh_failures: AtomicU64::new(0),
        }
    }

    fn bid(&self, kind: OperationKind) -> &AtomicU64 {
        match kind {
            OperationKind::Claim => &self.claim_bid,
            OperationKind::Transfer => &self.transfer_bid,
        }
    }

    /// Current bid in stroops
    pub fn current(&self, kind: OperationKind) -> u64 {
        self.bid(kind).load(Ordering::Relaxed)
    }

    /// Re-derive the bid from network fee stats
    ///
    /// If the stats cannot be fetched the previous bid is kept.
    pub async fn refresh(&self, kind: OperationKind) -> u64 {
        match self.ledger.fee_stats().await {
            Ok(stats) => {
                let bid = percentile_bid(
                    Self::percentile(kind, &stats),
                    self.base_fee,
                    self.max_fee,
                    self.multiplier,
                );
                self.bid(kind).store(bid, Ordering::Relaxed);
                debug!("[FeeEstimator] {} bid refreshed to {}", kind, bid);
                bid
            }
            Err(e) => {
                self.refresh_failures.fetch_add(1, Ordering::Relaxed);
                let bid = self.current(kind);
                self.events
                    .log(format!("[FeeEstimator] Fee stats unavailable, keeping {} bid {}: {}", kind, bid, e));
                bid
            }
        }
    }

    /// Raise the bid after a failed submission
    pub fn escalate(&self, kind: OperationKind) -> u64 {
        let (base, max, multiplier) = (self.base_fee, self.max_fee, self.multiplier);
        let previous = self
            .bid(kind)
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bid| {
                Some(escalated_bid(bid, base, max, multiplier))
            })
            .unwrap_or_else(|bid| bid);
        let bid = escalated_bid(previous, base, max, multiplier);
        debug!("[FeeEstimator] {} bid escalated {} -> {}", kind, previous, bid);
        bid
    }

    pub fn refresh_failures(&self) -> u64 {
        self.refresh_failures.load(Ordering::Relaxed)
    }

    fn percentile(kind: OperationKind, stats: &FeeStats) -> u64 {
        match kind {
            OperationKind::Claim => stats.p95,
            OperationKind::Transfer => stats.p99,
        }
    }
}
