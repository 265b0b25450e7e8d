//! Claim Loop
//!
//! Every poll interval: list claimable balances, keep the unlocked ones and
//! launch one detached attempt per balance that is not already in flight.
//! The loop never waits for the attempts it launches.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::sleep;
use tracing::info;

use super::attempt::{self, AttemptOutcome};
use super::shared_state::SharedState;
use crate::events::BotEvent;
use crate::ledger::{ClaimableBalance, TxIntent};
use crate::OperationKind;

const KIND: OperationKind = OperationKind::Claim;

/// Run the claim loop until the claim lane is disabled or the engine shuts down
pub async fn run(shared: Arc<SharedState>) {
    info!("[ClaimLoop] Starting...");

    while shared.is_running(KIND) {
        shared.stats.increment(&shared.stats.claim_cycles);
        run_cycle(&shared).await;

        // Checked again after the cycle to honor a stop issued mid-cycle
        if !shared.is_running(KIND) {
            break;
        }
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = sleep(shared.config.poll_interval) => {}
        }
    }

    info!("[ClaimLoop] Stopped");
}

async fn run_cycle(shared: &Arc<SharedState>) {
    let balances = match shared
        .ledger
        .list_claimable_balances(&shared.public_key, shared.config.claimable_limit)
        .await
    {
        Ok(balances) => balances,
        Err(e) => {
            shared
                .events
                .log(format!("[ClaimLoop] Error in claiming loop: {}", e));
            shared.events.error(format!("Claimable balance error: {}", e));
            return;
        }
    };

    if balances.is_empty() {
        shared.events.log("[ClaimLoop] No claimable balances found");
        return;
    }
    shared
        .events
        .log(format!("[ClaimLoop] Found {} claimable balances", balances.len()));

    let unlocked = eligible(balances);
    if unlocked.is_empty() {
        shared
            .events
            .log("[ClaimLoop] No unlocked balances available for claiming");
        return;
    }
    shared
        .events
        .log(format!("[ClaimLoop] Processing {} unlocked balances", unlocked.len()));

    for balance in unlocked {
        launch(shared, balance);
    }
}

/// Balances whose unlock time has passed, or that have none
pub fn eligible(balances: Vec<ClaimableBalance>) -> Vec<ClaimableBalance> {
    let now = Utc::now();
    balances.into_iter().filter(|b| b.is_eligible(now)).collect()
}

/// Start a detached claim attempt unless one is already running for this balance
pub fn launch(shared: &Arc<SharedState>, balance: ClaimableBalance) -> bool {
    // Acquired before spawning so no two tasks can both see the id as free
    if !shared.tracker.try_acquire(KIND, &balance.id) {
        return false;
    }
    shared.stats.launched(KIND);

    let shared_clone = shared.clone();
    shared.tasks.spawn(async move {
        process_claim(&shared_clone, balance).await;
    });
    true
}

async fn process_claim(shared: &Arc<SharedState>, balance: ClaimableBalance) {
    let asset = if balance.asset.is_native() {
        shared.config.native_asset_label.clone()
    } else {
        balance.asset.to_string()
    };
    shared.events.log(format!(
        "[ClaimLoop] Starting claim process for balance {} ({} {})",
        balance.id, balance.amount, asset
    ));

    let intent = TxIntent::Claim {
        balance_id: balance.id.clone(),
    };

    match attempt::run(shared, KIND, &intent).await {
        AttemptOutcome::Succeeded { hash, .. } => {
            shared.stats.succeeded(KIND);
            shared.tracker.release(KIND, &balance.id);
            shared.events.emit(BotEvent::Claimed {
                id: balance.id,
                amount: balance.amount,
                hash,
            });
            attempt::spawn_balance_refresh(shared);
        }
        AttemptOutcome::Exhausted { attempts } => {
            shared.stats.exhausted(KIND);
            shared.events.log(format!(
                "[ClaimLoop] Failed to claim balance {} after {} attempts",
                balance.id, attempts
            ));
            shared.tracker.release(KIND, &balance.id);
        }
        AttemptOutcome::Stopped { attempts } => {
            shared.events.log(format!(
                "[ClaimLoop] Claim of balance {} stopped after {} attempts",
                balance.id, attempts
            ));
            shared.tracker.release(KIND, &balance.id);
        }
    }
}
