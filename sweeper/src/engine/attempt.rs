//! Submission attempt state machine
//!
//! `Idle -> Attempting(n) -> Succeeded | Exhausted`, shared by both lanes.
//! Each attempt refreshes the lane's fee bid, submits, and on failure
//! escalates the bid and backs off briefly. A cleared lane flag ends the
//! loop before the next attempt, never in the middle of one.

use std::sync::Arc;

use tokio::time::sleep;

use super::shared_state::SharedState;
use crate::ledger::TxIntent;
use crate::OperationKind;

/// How a submission attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The network accepted the transaction
    Succeeded { hash: String, attempts: u32 },
    /// Every allowed attempt failed
    Exhausted { attempts: u32 },
    /// The lane was stopped before the attempts ran out
    Stopped { attempts: u32 },
}

pub(crate) fn log_prefix(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Claim => "[ClaimLoop]",
        OperationKind::Transfer => "[TransferLoop]",
    }
}

fn title(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Claim => "Claim",
        OperationKind::Transfer => "Transfer",
    }
}

/// Drive `intent` until it is accepted, attempts run out or the lane stops
pub async fn run(shared: &SharedState, kind: OperationKind, intent: &TxIntent) -> AttemptOutcome {
    let prefix = log_prefix(kind);
    let max_attempts = shared.config.max_attempts;
    let mut attempts = 0u32;

    while attempts < max_attempts {
        if !shared.is_running(kind) {
            return AttemptOutcome::Stopped { attempts };
        }

        let fee = shared.fees.refresh(kind).await;
        match shared.submitter.submit(intent, fee).await {
            Ok(hash) => {
                attempts += 1;
                shared
                    .events
                    .log(format!("{} {} success (hash={})", prefix, title(kind), hash));
                return AttemptOutcome::Succeeded { hash, attempts };
            }
            Err(e) => {
                attempts += 1;
                shared.events.log(format!(
                    "{} {} attempt {} failed: {}",
                    prefix,
                    title(kind),
                    attempts,
                    e
                ));
                let bumped = shared.fees.escalate(kind);
                shared
                    .events
                    .log(format!("{} Bumping {} fee to {}", prefix, kind, bumped));

                if attempts < max_attempts {
                    sleep(shared.config.retry_backoff).await;
                }
            }
        }
    }

    AttemptOutcome::Exhausted { attempts }
}

/// Refresh balances in the background after a successful operation
pub(crate) fn spawn_balance_refresh(shared: &Arc<SharedState>) {
    let shared_clone = shared.clone();
    shared.tasks.spawn(async move {
        if shared_clone.cancel.is_cancelled() {
            return;
        }
        // Failures are already published on the error channel
        let _ = shared_clone.account.details(true).await;
    });
}
