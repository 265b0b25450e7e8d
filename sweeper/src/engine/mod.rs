//! Sweeper engine
//!
//! [`Engine`] owns the claim and transfer lanes. Each lane is a polling loop
//! task that launches detached submission attempts:
//!
//! ```text
//! ClaimLoop ───► tracker.try_acquire(id) ───► attempt ───► claimed event
//!                                              │
//! TransferLoop ─► spendable/amount rule ──────►┤ fees.refresh / submitter.submit
//!                                              │ fees.escalate on failure
//!                                              └──► flood duplicates, balance refresh
//! ```
//!
//! Stopping a lane only clears its flag; loops and attempts notice it at
//! their next check. `shutdown` additionally cancels pending flood
//! duplicates and waits for every detached task.

pub mod attempt;
pub mod claim_loop;
pub mod shared_state;
pub mod transfer_loop;

use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::account::{AccountCache, AccountSnapshot};
use crate::amount::{Amount, TransferAmount};
use crate::config::{ConfigError, EngineConfig};
use crate::events::{EventBus, EventSubscriber};
use crate::fees::FeeEstimator;
use crate::ledger::envelope::validate_destination;
use crate::ledger::{ClaimableBalance, Keypair, LedgerClient, LedgerError, NetworkId};
use crate::submitter::{FloodPolicy, TxSubmitter};
use crate::tracker::OperationTracker;
use crate::OperationKind;

use shared_state::{EngineStats, LaneControl, Settings, SharedState, StatsSnapshot};

/// Lifecycle controller of one swept account
pub struct Engine {
    shared: Arc<SharedState>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        ledger: Arc<dyn LedgerClient>,
        keypair: Keypair,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let events = EventBus::default();
        let stats = Arc::new(EngineStats::new());
        let tasks = TaskTracker::new();
        let cancel = CancellationToken::new();
        let public_key = keypair.public_key().to_string();

        let fees = FeeEstimator::new(&config, ledger.clone(), events.clone());
        let account = AccountCache::new(
            ledger.clone(),
            events.clone(),
            public_key.clone(),
            config.account_min_refresh,
            config.native_asset_label.clone(),
        );
        let submitter = TxSubmitter::new(
            ledger.clone(),
            Arc::new(keypair),
            NetworkId::from_passphrase(&config.network_passphrase),
            FloodPolicy::from_config(&config),
            config.tx_timeout_secs,
            stats.clone(),
            tasks.clone(),
            cancel.clone(),
        );

        let shared = Arc::new(SharedState {
            config,
            ledger,
            public_key,
            events,
            fees,
            tracker: OperationTracker::new(),
            account,
            submitter,
            stats,
            claiming: LaneControl::default(),
            transferring: LaneControl::default(),
            settings: RwLock::new(Settings::default()),
            tasks,
            cancel,
        });

        Ok(Self { shared })
    }

    pub fn public_key(&self) -> &str {
        &self.shared.public_key
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn subscribe(&self) -> EventSubscriber {
        self.shared.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Set the transfer destination after checking it is a valid account id
    pub fn set_destination(&self, address: &str) -> Result<(), ConfigError> {
        let address = match validate_destination(address) {
            Ok(address) => address,
            Err(e) => {
                self.shared.events.error(e.to_string());
                return Err(e);
            }
        };
        self.shared.settings.write().destination = Some(address.clone());
        self.shared
            .events
            .log(format!("[Engine] Destination wallet set to: {}", address));
        Ok(())
    }

    pub fn destination(&self) -> Option<String> {
        self.shared.destination()
    }

    pub fn set_transfer_amount(&self, amount: TransferAmount) {
        self.shared.settings.write().transfer_amount = amount;
        self.shared
            .events
            .log(format!("[Engine] Transfer amount set to: {}", amount));
    }

    pub fn transfer_amount(&self) -> TransferAmount {
        self.shared.transfer_amount()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start both lanes. Without a destination only claiming starts.
    pub fn start(&self) {
        self.shared
            .events
            .log("[Engine] Bot starting in concurrent mode...");
        self.start_lane(OperationKind::Claim);

        if self.destination().is_some() {
            self.start_lane(OperationKind::Transfer);
        } else {
            self.shared
                .events
                .log("[Engine] WARNING: Destination not set, transfer process not started");
        }
    }

    pub fn start_claiming_only(&self) {
        self.shared
            .events
            .log("[Engine] Starting claiming process only...");
        self.start_lane(OperationKind::Claim);
    }

    pub fn start_transfer_only(&self) -> Result<(), ConfigError> {
        if self.destination().is_none() {
            self.shared
                .events
                .error(ConfigError::MissingDestination.to_string());
            return Err(ConfigError::MissingDestination);
        }
        self.shared
            .events
            .log("[Engine] Starting transfer process only...");
        self.start_lane(OperationKind::Transfer);
        Ok(())
    }

    /// Clear both lane flags. Running attempts finish their current submission.
    pub fn stop(&self) {
        self.shared.claiming.disable();
        self.shared.transferring.disable();
        self.shared.events.log("[Engine] Bot stopped");
        self.shared
            .stats
            .log_summary(self.shared.fees.refresh_failures());
    }

    /// Stop, drop pending flood duplicates and wait for every detached task
    pub async fn shutdown(&self) {
        self.stop();
        self.shared.cancel.cancel();
        self.shared.tasks.close();
        self.shared.tasks.wait().await;
        info!("[Engine] Shut down");
    }

    pub fn is_claiming(&self) -> bool {
        self.shared.claiming.is_enabled()
    }

    pub fn is_transferring(&self) -> bool {
        self.shared.transferring.is_enabled()
    }

    fn start_lane(&self, kind: OperationKind) {
        if self.shared.cancel.is_cancelled() {
            warn!("[Engine] Ignoring start of {} lane after shutdown", kind);
            return;
        }
        let lane = self.shared.lane(kind);
        lane.enable();
        if lane.claim_loop() {
            spawn_lane_loop(self.shared.clone(), kind);
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn account_details(&self, force: bool) -> Result<Arc<AccountSnapshot>, LedgerError> {
        self.shared.account.details(force).await
    }

    /// Native balance above the reserve
    pub async fn available_native_balance(&self) -> Result<Amount, LedgerError> {
        self.shared
            .account
            .available_native(self.shared.config.reserve)
            .await
    }

    pub async fn claimable_balances(&self) -> Result<Vec<ClaimableBalance>, LedgerError> {
        self.shared
            .ledger
            .list_claimable_balances(&self.shared.public_key, self.shared.config.claimable_limit)
            .await
            .map_err(|e| {
                self.shared
                    .events
                    .log(format!("[Engine] Error fetching claimable balances: {}", e));
                self.shared
                    .events
                    .error(format!("Claimable balance error: {}", e));
                e
            })
    }

    /// Current fee bid of a lane, in stroops
    pub fn fee(&self, kind: OperationKind) -> u64 {
        self.shared.fees.current(kind)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared
            .stats
            .snapshot(self.shared.fees.refresh_failures())
    }

    /// Operations of `kind` with an attempt currently running
    pub fn in_flight(&self, kind: OperationKind) -> usize {
        self.shared.tracker.in_flight(kind)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Detached tasks hold the shared state; make sure they wind down
        self.shared.claiming.disable();
        self.shared.transferring.disable();
        self.shared.cancel.cancel();
    }
}

/// Spawn the polling loop of a lane whose loop slot was just taken
fn spawn_lane_loop(shared: Arc<SharedState>, kind: OperationKind) {
    let tasks = shared.tasks.clone();
    tasks.spawn(async move {
        loop {
            match kind {
                OperationKind::Claim => claim_loop::run(shared.clone()).await,
                OperationKind::Transfer => transfer_loop::run(shared.clone()).await,
            }

            let lane = shared.lane(kind);
            lane.release_loop();
            // A start that raced with this exit found the slot taken and only
            // re-enabled the lane, so keep going on its behalf
            if shared.is_running(kind) && lane.claim_loop() {
                continue;
            }
            break;
        }
    });
}
