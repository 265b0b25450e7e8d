//! Transfer Loop
//!
//! Every transfer poll interval: work out the spendable native balance,
//! apply the configured transfer amount and launch a detached payment
//! attempt to the destination.

use std::sync::Arc;

use tokio::time::sleep;
use tracing::info;
use uuid::Uuid;

use super::attempt::{self, AttemptOutcome};
use super::shared_state::SharedState;
use crate::amount::Amount;
use crate::events::BotEvent;
use crate::ledger::TxIntent;
use crate::OperationKind;

const KIND: OperationKind = OperationKind::Transfer;

/// Run the transfer loop until the lane is disabled, the destination is
/// missing or the engine shuts down
pub async fn run(shared: Arc<SharedState>) {
    info!("[TransferLoop] Starting...");

    while shared.is_running(KIND) {
        let Some(destination) = shared.destination() else {
            // Nothing to sweep to; the lane stays off until started again
            shared.transferring.disable();
            break;
        };

        shared.stats.increment(&shared.stats.transfer_cycles);
        run_cycle(&shared, destination).await;

        if !shared.is_running(KIND) {
            break;
        }
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = sleep(shared.config.transfer_poll_interval) => {}
        }
    }

    info!("[TransferLoop] Stopped");
}

async fn run_cycle(shared: &Arc<SharedState>, destination: String) {
    let spendable = match shared.account.available_native(shared.config.reserve).await {
        Ok(spendable) => spendable,
        Err(e) => {
            shared
                .events
                .log(format!("[TransferLoop] Error in transfer loop: {}", e));
            return;
        }
    };

    if !spendable.is_positive() {
        shared
            .events
            .log("[TransferLoop] Insufficient balance for transfer");
        return;
    }

    let amount = shared.transfer_amount().resolve(spendable);
    if amount.is_positive() {
        shared.events.log(format!(
            "[TransferLoop] Available for transfer: {} {}",
            amount, shared.config.native_asset_label
        ));
        launch(shared, destination, amount);
    }
}

/// Start a detached payment attempt under a fresh per-launch key
pub fn launch(shared: &Arc<SharedState>, destination: String, amount: Amount) -> String {
    let key = format!("transfer-{}", Uuid::new_v4());
    // Fresh per-launch key, never already held
    let acquired = shared.tracker.try_acquire(KIND, &key);
    debug_assert!(acquired, "transfer key {} already in flight", key);
    shared.stats.launched(KIND);

    let shared_clone = shared.clone();
    let task_key = key.clone();
    shared.tasks.spawn(async move {
        process_transfer(&shared_clone, task_key, destination, amount).await;
    });
    key
}

async fn process_transfer(shared: &Arc<SharedState>, key: String, destination: String, amount: Amount) {
    shared.events.log(format!(
        "[TransferLoop] Starting transfer process for {} {} to {}",
        amount, shared.config.native_asset_label, destination
    ));

    let intent = TxIntent::Payment {
        destination: destination.clone(),
        amount,
    };

    match attempt::run(shared, KIND, &intent).await {
        AttemptOutcome::Succeeded { hash, .. } => {
            shared.stats.succeeded(KIND);
            shared.events.emit(BotEvent::Transferred {
                amount,
                destination,
                hash,
            });
            shared.tracker.release(KIND, &key);
            attempt::spawn_balance_refresh(shared);
        }
        AttemptOutcome::Exhausted { attempts } => {
            shared.stats.exhausted(KIND);
            shared.events.log(format!(
                "[TransferLoop] Failed to transfer {} {} after {} attempts",
                amount, shared.config.native_asset_label, attempts
            ));
            shared.tracker.release(KIND, &key);
        }
        AttemptOutcome::Stopped { attempts } => {
            shared.events.log(format!(
                "[TransferLoop] Transfer of {} {} stopped after {} attempts",
                amount, shared.config.native_asset_label, attempts
            ));
            shared.tracker.release(KIND, &key);
        }
    }
}
