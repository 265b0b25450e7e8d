//! Shared state for the engine
//!
//! Everything the loops, attempts and the controller need lives in one
//! `SharedState` behind an `Arc`. Nothing in here is process-global, so
//! several engines can run side by side.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::account::AccountCache;
use crate::amount::TransferAmount;
use crate::config::EngineConfig;
use crate::events::EventBus;
use crate::fees::FeeEstimator;
use crate::ledger::LedgerClient;
use crate::submitter::TxSubmitter;
use crate::tracker::OperationTracker;
use crate::OperationKind;

/// Run flags of one lane
///
/// `enabled` is what callers toggle. `looping` is owned by the loop task and
/// guarantees a lane never has two polling loops alive at once.
#[derive(Debug, Default)]
pub struct LaneControl {
    enabled: AtomicBool,
    looping: AtomicBool,
}

impl LaneControl {
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Take the loop slot. False if a loop is already alive.
    pub fn claim_loop(&self) -> bool {
        !self.looping.swap(true, Ordering::SeqCst)
    }

    pub fn release_loop(&self) {
        self.looping.store(false, Ordering::SeqCst);
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::SeqCst)
    }
}

/// Engine counters for monitoring and logging
#[derive(Debug, Default)]
pub struct EngineStats {
    // Polling
    pub claim_cycles: AtomicU64,
    pub transfer_cycles: AtomicU64,

    // Claim outcomes
    pub claims_launched: AtomicU64,
    pub claims_succeeded: AtomicU64,
    pub claims_exhausted: AtomicU64,

    // Transfer outcomes
    pub transfers_launched: AtomicU64,
    pub transfers_succeeded: AtomicU64,
    pub transfers_exhausted: AtomicU64,

    // Submissions
    pub submissions_sent: AtomicU64,
    pub submissions_failed: AtomicU64,
    pub flood_duplicates_sent: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub claim_cycles: u64,
    pub transfer_cycles: u64,
    pub claims_launched: u64,
    pub claims_succeeded: u64,
    pub claims_exhausted: u64,
    pub transfers_launched: u64,
    pub transfers_succeeded: u64,
    pub transfers_exhausted: u64,
    pub submissions_sent: u64,
    pub submissions_failed: u64,
    pub flood_duplicates_sent: u64,
    pub fee_refresh_failures: u64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter
    pub fn increment(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a counter value
    pub fn get(&self, counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn launched(&self, kind: OperationKind) {
        match kind {
            OperationKind::Claim => self.increment(&self.claims_launched),
            OperationKind::Transfer => self.increment(&self.transfers_launched),
        }
    }

    pub fn succeeded(&self, kind: OperationKind) {
        match kind {
            OperationKind::Claim => self.increment(&self.claims_succeeded),
            OperationKind::Transfer => self.increment(&self.transfers_succeeded),
        }
    }

    pub fn exhausted(&self, kind: OperationKind) {
        match kind {
            OperationKind::Claim => self.increment(&self.claims_exhausted),
            OperationKind::Transfer => self.increment(&self.transfers_exhausted),
        }
    }

    pub fn snapshot(&self, fee_refresh_failures: u64) -> StatsSnapshot {
        StatsSnapshot {
            claim_cycles: self.get(&self.claim_cycles),
            transfer_cycles: self.get(&self.transfer_cycles),
            claims_launched: self.get(&self.claims_launched),
            claims_succeeded: self.get(&self.claims_succeeded),
            claims_exhausted: self.get(&self.claims_exhausted),
            transfers_launched: self.get(&self.transfers_launched),
            transfers_succeeded: self.get(&self.transfers_succeeded),
            transfers_exhausted: self.get(&self.transfers_exhausted),
            submissions_sent: self.get(&self.submissions_sent),
            submissions_failed: self.get(&self.submissions_failed),
            flood_duplicates_sent: self.get(&self.flood_duplicates_sent),
            fee_refresh_failures,
        }
    }

    /// Log a summary of stats
    pub fn log_summary(&self, fee_refresh_failures: u64) {
        let s = self.snapshot(fee_refresh_failures);

        info!(
            "[Stats] Polling: {} claim cycles, {} transfer cycles",
            s.claim_cycles, s.transfer_cycles
        );
        info!(
            "        Claims:    {} launched, {} succeeded, {} exhausted",
            s.claims_launched, s.claims_succeeded, s.claims_exhausted
        );
        info!(
            "        Transfers: {} launched, {} succeeded, {} exhausted",
            s.transfers_launched, s.transfers_succeeded, s.transfers_exhausted
        );
        info!(
            "        Txns:      {} sent, {} failed, {} flood duplicates ({} fee refresh failures)",
            s.submissions_sent, s.submissions_failed, s.flood_duplicates_sent, s.fee_refresh_failures
        );
    }
}

/// Session settings changed through the controller
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub destination: Option<String>,
    pub transfer_amount: TransferAmount,
}

/// State shared by the controller, both loops and every attempt task
pub struct SharedState {
    pub config: EngineConfig,
    pub ledger: Arc<dyn LedgerClient>,
    pub public_key: String,
    pub events: EventBus,
    pub fees: FeeEstimator,
    pub tracker: OperationTracker,
    pub account: AccountCache,
    pub submitter: TxSubmitter,
    pub stats: Arc<EngineStats>,
    pub claiming: LaneControl,
    pub transferring: LaneControl,
    pub settings: RwLock<Settings>,
    /// Detached work: loops, attempts, flood duplicates, refreshes
    pub tasks: TaskTracker,
    /// Cancelled once on shutdown
    pub cancel: CancellationToken,
}

impl SharedState {
    pub fn lane(&self, kind: OperationKind) -> &LaneControl {
        match kind {
            OperationKind::Claim => &self.claiming,
            OperationKind::Transfer => &self.transferring,
        }
    }

    /// Whether new work for `kind` may start
    pub fn is_running(&self, kind: OperationKind) -> bool {
        self.lane(kind).is_enabled() && !self.cancel.is_cancelled()
    }

    pub fn destination(&self) -> Option<String> {
        self.settings.read().destination.clone()
    }

    pub fn transfer_amount(&self) -> TransferAmount {
        self.settings.read().transfer_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_slot_is_exclusive() {
        let lane = LaneControl::default();
        assert!(lane.claim_loop());
        assert!(!lane.claim_loop());
        lane.release_loop();
        assert!(lane.claim_loop());
    }

    #[test]
    fn enabling_does_not_touch_the_loop_slot() {
        let lane = LaneControl::default();
        lane.enable();
        assert!(lane.is_enabled());
        assert!(!lane.is_looping());
        lane.disable();
        assert!(!lane.is_enabled());
    }

    #[test]
    fn counters_are_split_by_kind() {
        let stats = EngineStats::new();
        stats.launched(OperationKind::Claim);
        stats.launched(OperationKind::Claim);
        stats.succeeded(OperationKind::Transfer);
        stats.exhausted(OperationKind::Claim);

        let snapshot = stats.snapshot(3);
        assert_eq!(snapshot.claims_launched, 2);
        assert_eq!(snapshot.transfers_launched, 0);
        assert_eq!(snapshot.transfers_succeeded, 1);
        assert_eq!(snapshot.claims_exhausted, 1);
        assert_eq!(snapshot.fee_refresh_failures, 3);
    }
}
