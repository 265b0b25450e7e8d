//! Transaction submitter
//!
//! Builds, signs and submits one transaction per call. Once the network
//! accepts it, the same signed envelope is resubmitted `count` more times
//! to improve the odds of timely inclusion. Those duplicates are detached
//! tasks on the engine's task tracker; their errors are expected (the
//! first submission was already accepted) and never surface.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::config::{EngineConfig, FLOOD_IMMEDIATE};
use crate::engine::shared_state::EngineStats;
use crate::ledger::envelope::{build_transaction, sign};
use crate::ledger::{Keypair, LedgerClient, LedgerError, NetworkId, SignedTransaction, TxIntent};

/// How accepted transactions are flooded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloodPolicy {
    /// Number of duplicates
    pub count: u32,
    /// Spacing unit of delayed duplicates
    pub interval: Duration,
    /// Leading duplicates fired without delay
    pub immediate: u32,
}

impl FloodPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            count: config.flood_count,
            interval: config.flood_interval,
            immediate: FLOOD_IMMEDIATE,
        }
    }

    /// Delay before duplicate `index` (0-based)
    pub fn delay(&self, index: u32) -> Duration {
        if index < self.immediate {
            Duration::ZERO
        } else {
            self.interval * index
        }
    }
}

pub struct TxSubmitter {
    ledger: Arc<dyn LedgerClient>,
    keypair: Arc<Keypair>,
    network: NetworkId,
    flood: FloodPolicy,
    tx_timeout_secs: u64,
    stats: Arc<EngineStats>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl TxSubmitter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        keypair: Arc<Keypair>,
        network: NetworkId,
        flood: FloodPolicy,
        tx_timeout_secs: u64,
        stats: Arc<EngineStats>,
        tasks: TaskTracker,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ledger,
            keypair,
            network,
            flood,
            tx_timeout_secs,
            stats,
            tasks,
            cancel,
        }
    }

    pub fn public_key(&self) -> &str {
        self.keypair.public_key()
    }

    /// Submit `intent` bidding `fee` stroops, returning the accepted hash
    pub async fn submit(&self, intent: &TxIntent, fee: u64) -> Result<String, LedgerError> {
        let account = self.ledger.load_account(self.keypair.public_key()).await?;
        let fee = u32::try_from(fee)
            .map_err(|_| LedgerError::Encode(format!("fee {} does not fit the fee field", fee)))?;

        let unsigned = build_transaction(&account, fee, intent, self.tx_timeout_secs, Utc::now())?;
        let signed = sign(unsigned, &self.keypair, &self.network)?;

        self.stats.increment(&self.stats.submissions_sent);
        let hash = match self.ledger.submit_transaction(&signed).await {
            Ok(hash) => hash,
            Err(e) => {
                self.stats.increment(&self.stats.submissions_failed);
                return Err(e);
            }
        };

        info!("[Submitter] Accepted {} ({}), fee {}", hash, intent, fee);
        self.flood(&signed);
        Ok(hash)
    }

    /// Fire duplicates of an accepted transaction
    pub fn flood(&self, signed: &SignedTransaction) {
        for index in 0..self.flood.count {
            let delay = self.flood.delay(index);
            let ledger = self.ledger.clone();
            let stats = self.stats.clone();
            let cancel = self.cancel.clone();
            let tx = signed.clone();

            self.tasks.spawn(async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = sleep(delay) => {}
                }

                stats.increment(&stats.flood_duplicates_sent);
                if let Err(e) = ledger.submit_transaction(&tx).await {
                    debug!("[Submitter] Flood duplicate {} of {} ignored: {}", index, tx.hash, e);
                }
            });
        }
    }
}
