#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};

use sweeper::config::EngineConfig;
use sweeper::ledger::{
    AccountState, Asset, Balance, ClaimableBalance, FeeStats, Keypair, LedgerClient, LedgerError,
    SignedTransaction, SubmitFailure, TxIntent,
};
use sweeper::{Amount, BotEvent, Engine, EventChannel, EventSubscriber};

// ============================================================================
// Keys and ids
// ============================================================================

pub fn account_keypair() -> Keypair {
    Keypair::from_seed_bytes([7u8; 32])
}

pub fn destination_address() -> String {
    Keypair::from_seed_bytes([9u8; 32]).public_key().to_string()
}

/// Horizon style hex id of a V0 claimable balance
pub fn balance_id(n: u64) -> String {
    format!("00000000{:064x}", n)
}

pub fn unlocked_balance(n: u64, units: i64) -> ClaimableBalance {
    ClaimableBalance {
        id: balance_id(n),
        asset: Asset::Native,
        amount: Amount::from_units(units),
        unlock_time: None,
    }
}

pub fn locked_balance(n: u64, units: i64, unlock_time: DateTime<Utc>) -> ClaimableBalance {
    ClaimableBalance {
        unlock_time: Some(unlock_time),
        ..unlocked_balance(n, units)
    }
}

// ============================================================================
// Fake ledger
// ============================================================================

/// In-memory ledger
///
/// Accepted claims remove the balance, accepted payments debit the native
/// balance. Resubmitting an accepted envelope is rejected like a real
/// network would, and counted separately from first submissions.
pub struct FakeLedger {
    account: Mutex<AccountState>,
    claimables: Mutex<Vec<ClaimableBalance>>,
    fee_stats: Mutex<Option<FeeStats>>,
    account_error: Mutex<Option<String>>,
    claimable_error: Mutex<Option<String>>,
    claimable_listings: Mutex<usize>,
    /// Outcomes of the next first-time submissions, front first
    script: Mutex<VecDeque<Result<(), SubmitFailure>>>,
    /// Outcome once the script is empty; `None` accepts
    default_failure: Mutex<Option<SubmitFailure>>,
    submit_delay: Mutex<Duration>,

    submissions: Mutex<Vec<SignedTransaction>>,
    accepted: Mutex<HashSet<String>>,
    duplicates: Mutex<HashMap<String, usize>>,
    active: Mutex<HashMap<String, usize>>,
    max_active: Mutex<HashMap<String, usize>>,
}

fn intent_key(intent: &TxIntent) -> String {
    match intent {
        TxIntent::Claim { balance_id } => balance_id.clone(),
        TxIntent::Payment { destination, .. } => format!("payment:{}", destination),
    }
}

impl FakeLedger {
    pub fn new(native_balance: Amount) -> Arc<Self> {
        let account_id = account_keypair().public_key().to_string();
        Arc::new(Self {
            account: Mutex::new(AccountState {
                account_id,
                sequence: 1_000,
                balances: vec![Balance {
                    asset: Asset::Native,
                    asset_type: "native".to_string(),
                    amount: native_balance,
                }],
            }),
            claimables: Mutex::new(Vec::new()),
            fee_stats: Mutex::new(Some(FeeStats { p95: 100, p99: 100 })),
            account_error: Mutex::new(None),
            claimable_error: Mutex::new(None),
            claimable_listings: Mutex::new(0),
            script: Mutex::new(VecDeque::new()),
            default_failure: Mutex::new(None),
            submit_delay: Mutex::new(Duration::ZERO),
            submissions: Mutex::new(Vec::new()),
            accepted: Mutex::new(HashSet::new()),
            duplicates: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            max_active: Mutex::new(HashMap::new()),
        })
    }

    pub fn add_claimable(&self, balance: ClaimableBalance) {
        self.claimables.lock().push(balance);
    }

    pub fn set_native_balance(&self, amount: Amount) {
        let mut account = self.account.lock();
        for balance in account.balances.iter_mut().filter(|b| b.asset.is_native()) {
            balance.amount = amount;
        }
    }

    pub fn native_balance(&self) -> Amount {
        self.account.lock().native_balance()
    }

    pub fn add_credit_balance(&self, code: &str, issuer: &str, amount: Amount) {
        self.account.lock().balances.push(Balance {
            asset: Asset::Credit {
                code: code.to_string(),
                issuer: issuer.to_string(),
            },
            asset_type: "credit_alphanum4".to_string(),
            amount,
        });
    }

    pub fn fail_account_loads(&self, message: &str) {
        *self.account_error.lock() = Some(message.to_string());
    }

    pub fn fail_claimable_listing(&self, message: &str) {
        *self.claimable_error.lock() = Some(message.to_string());
    }

    /// Lift account and claimable listing failures
    pub fn clear_failures(&self) {
        *self.account_error.lock() = None;
        *self.claimable_error.lock() = None;
    }

    pub fn claimable_listings(&self) -> usize {
        *self.claimable_listings.lock()
    }

    pub fn set_fee_stats(&self, stats: Option<FeeStats>) {
        *self.fee_stats.lock() = stats;
    }

    pub fn script_submissions(&self, outcomes: Vec<Result<(), SubmitFailure>>) {
        self.script.lock().extend(outcomes);
    }

    pub fn reject_all_submissions(&self, failure: SubmitFailure) {
        *self.default_failure.lock() = Some(failure);
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock() = delay;
    }

    /// First-time submissions, in order
    pub fn submissions(&self) -> Vec<SignedTransaction> {
        self.submissions.lock().clone()
    }

    pub fn submissions_for(&self, intent_key_prefix: &str) -> usize {
        self.submissions
            .lock()
            .iter()
            .filter(|tx| intent_key(&tx.intent).starts_with(intent_key_prefix))
            .count()
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.lock().len()
    }

    /// Resubmissions of an already accepted envelope
    pub fn duplicates_of(&self, hash: &str) -> usize {
        self.duplicates.lock().get(hash).copied().unwrap_or(0)
    }

    /// Highest number of overlapping first-time submissions seen for `key`
    pub fn max_concurrent(&self, key: &str) -> usize {
        self.max_active.lock().get(key).copied().unwrap_or(0)
    }

    fn next_outcome(&self) -> Result<(), SubmitFailure> {
        if let Some(outcome) = self.script.lock().pop_front() {
            return outcome;
        }
        match self.default_failure.lock().clone() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn apply(&self, intent: &TxIntent) {
        let mut account = self.account.lock();
        account.sequence += 1;
        match intent {
            TxIntent::Claim { balance_id } => {
                let mut claimables = self.claimables.lock();
                if let Some(pos) = claimables.iter().position(|b| &b.id == balance_id) {
                    let claimed = claimables.remove(pos);
                    if claimed.asset.is_native() {
                        for b in account.balances.iter_mut().filter(|b| b.asset.is_native()) {
                            b.amount = Amount::from_stroops(b.amount.stroops() + claimed.amount.stroops());
                        }
                    }
                }
            }
            TxIntent::Payment { amount, .. } => {
                for b in account.balances.iter_mut().filter(|b| b.asset.is_native()) {
                    b.amount = b.amount.saturating_sub(*amount);
                }
            }
        }
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn load_account(&self, public_key: &str) -> Result<AccountState, LedgerError> {
        if let Some(message) = self.account_error.lock().clone() {
            return Err(LedgerError::Network(message));
        }
        let account = self.account.lock().clone();
        if account.account_id != public_key {
            return Err(LedgerError::NotFound(public_key.to_string()));
        }
        Ok(account)
    }

    async fn list_claimable_balances(
        &self,
        _claimant: &str,
        limit: u32,
    ) -> Result<Vec<ClaimableBalance>, LedgerError> {
        *self.claimable_listings.lock() += 1;
        if let Some(message) = self.claimable_error.lock().clone() {
            return Err(LedgerError::Network(message));
        }
        Ok(self
            .claimables
            .lock()
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn fee_stats(&self) -> Result<FeeStats, LedgerError> {
        (*self.fee_stats.lock()).ok_or_else(|| LedgerError::Network("fee stats unavailable".into()))
    }

    async fn submit_transaction(&self, tx: &SignedTransaction) -> Result<String, LedgerError> {
        if self.accepted.lock().contains(&tx.hash) {
            *self.duplicates.lock().entry(tx.hash.clone()).or_default() += 1;
            return Err(LedgerError::Submission {
                failure: SubmitFailure::BadSequence,
                message: "Transaction Failed".into(),
            });
        }

        let key = intent_key(&tx.intent);
        self.submissions.lock().push(tx.clone());
        {
            let mut active = self.active.lock();
            let now_active = active.entry(key.clone()).or_default();
            *now_active += 1;
            let mut max_active = self.max_active.lock();
            let max = max_active.entry(key.clone()).or_default();
            *max = (*max).max(*now_active);
        }

        let delay = *self.submit_delay.lock();
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let outcome = self.next_outcome();
        if let Some(n) = self.active.lock().get_mut(&key) {
            *n -= 1;
        }

        match outcome {
            Ok(()) => {
                self.accepted.lock().insert(tx.hash.clone());
                self.apply(&tx.intent);
                Ok(tx.hash.clone())
            }
            Err(failure) => Err(LedgerError::Submission {
                failure,
                message: "Transaction Failed".into(),
            }),
        }
    }
}

// ============================================================================
// Engine helpers
// ============================================================================

/// Fast cadence so tests see several cycles quickly
pub fn test_config() -> EngineConfig {
    EngineConfig {
        poll_interval: Duration::from_millis(100),
        transfer_poll_interval: Duration::from_millis(100),
        ..EngineConfig::default()
    }
}

pub fn engine(ledger: &Arc<FakeLedger>, config: EngineConfig) -> Engine {
    Engine::new(config, ledger.clone(), account_keypair()).unwrap()
}

/// Poll `condition` every 10ms until it holds or `limit` passes
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Next event of `channel`, or `None` after `limit`
pub async fn next_on(
    subscriber: &mut EventSubscriber,
    channel: EventChannel,
    limit: Duration,
) -> Option<BotEvent> {
    let deadline = Instant::now() + limit;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, subscriber.recv()).await {
            Ok(Some(event)) if event.channel() == channel => return Some(event),
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return None,
        }
    }
}

/// Every event already published, without waiting
pub fn drain(subscriber: &mut EventSubscriber) -> Vec<BotEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscriber.try_recv() {
        events.push(event);
    }
    events
}

pub fn log_lines(events: &[BotEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            BotEvent::Log(line) => Some(line.clone()),
            _ => None,
        })
        .collect()
}
