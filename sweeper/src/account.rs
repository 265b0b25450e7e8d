//! Account snapshot cache
//!
//! Both lanes read balances from here. A snapshot younger than the minimum
//! refresh interval is reused unless the caller forces a refetch; every
//! refetch replaces the whole snapshot and publishes a `balance` event.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::time::Instant;

use crate::amount::{compute_spendable, Amount};
use crate::events::{BalanceView, BotEvent, EventBus};
use crate::ledger::{AccountState, Asset, LedgerClient, LedgerError};

/// Account state with the time it was fetched
#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub state: AccountState,
    pub fetched_at: Instant,
}

impl AccountSnapshot {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

pub struct AccountCache {
    ledger: Arc<dyn LedgerClient>,
    events: EventBus,
    public_key: String,
    min_refresh: Duration,
    native_label: String,
    snapshot: ArcSwapOption<AccountSnapshot>,
}

impl AccountCache {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        events: EventBus,
        public_key: String,
        min_refresh: Duration,
        native_label: String,
    ) -> Self {
        Self {
            ledger,
            events,
            public_key,
            min_refresh,
            native_label,
            snapshot: ArcSwapOption::empty(),
        }
    }

    /// Latest snapshot without touching the network
    pub fn cached(&self) -> Option<Arc<AccountSnapshot>> {
        self.snapshot.load_full()
    }

    /// Current account details, refetched if stale or `force` is set
    pub async fn details(&self, force: bool) -> Result<Arc<AccountSnapshot>, LedgerError> {
        if !force {
            if let Some(snapshot) = self.snapshot.load_full() {
                if snapshot.age() < self.min_refresh {
                    return Ok(snapshot);
                }
            }
        }

        let state = match self.ledger.load_account(&self.public_key).await {
            Ok(state) => state,
            Err(e) => {
                self.events.error(format!("Account error: {}", e));
                return Err(e);
            }
        };

        let snapshot = Arc::new(AccountSnapshot {
            state,
            fetched_at: Instant::now(),
        });
        self.snapshot.store(Some(snapshot.clone()));
        self.events.emit(BotEvent::Balance(self.balance_views(&snapshot.state)));

        Ok(snapshot)
    }

    /// Native balance above `reserve`
    pub async fn available_native(&self, reserve: Amount) -> Result<Amount, LedgerError> {
        let snapshot = self.details(false).await?;
        Ok(compute_spendable(snapshot.state.native_balance(), reserve))
    }

    fn balance_views(&self, state: &AccountState) -> Vec<BalanceView> {
        state
            .balances
            .iter()
            .map(|b| BalanceView {
                asset: match &b.asset {
                    Asset::Native => self.native_label.clone(),
                    Asset::Credit { .. } => b.asset.to_string(),
                },
                balance: b.amount,
                asset_type: b.asset_type.clone(),
            })
            .collect()
    }
}
