//! Ledger network access
//!
//! The engine talks to the network only through [`LedgerClient`]. Building
//! and signing transactions is pure and lives in [`envelope`]; the Horizon
//! REST implementation of the client lives in [`horizon`].

pub mod envelope;
pub mod horizon;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::amount::Amount;

pub use envelope::{Keypair, NetworkId, SignedTransaction};
pub use horizon::{HorizonClient, OperationSummary, TransactionSummary};

/// Network primitives the engine needs
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Load sequence number and balances of an account
    async fn load_account(&self, public_key: &str) -> Result<AccountState, LedgerError>;

    /// Claimable balances that name `claimant` as a claimant
    async fn list_claimable_balances(
        &self,
        claimant: &str,
        limit: u32,
    ) -> Result<Vec<ClaimableBalance>, LedgerError>;

    /// Percentiles of recently charged fees
    async fn fee_stats(&self) -> Result<FeeStats, LedgerError>;

    /// Submit a signed transaction, returning its hash once accepted
    async fn submit_transaction(&self, tx: &SignedTransaction) -> Result<String, LedgerError>;
}

/// An asset held or claimable by the account
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Asset {
    Native,
    Credit { code: String, issuer: String },
}

impl Asset {
    /// Parse the Horizon canonical form ("native" or "CODE:ISSUER")
    pub fn parse_canonical(s: &str) -> Result<Self, LedgerError> {
        if s == "native" {
            return Ok(Asset::Native);
        }
        match s.split_once(':') {
            Some((code, issuer)) if !code.is_empty() && !issuer.is_empty() => Ok(Asset::Credit {
                code: code.to_string(),
                issuer: issuer.to_string(),
            }),
            _ => Err(LedgerError::Parse(format!("unrecognized asset '{}'", s))),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Asset::Native)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Native => write!(f, "native"),
            Asset::Credit { code, issuer } => write!(f, "{}:{}", code, issuer),
        }
    }
}

/// One balance line of an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    pub asset: Asset,
    /// Horizon asset type ("native", "credit_alphanum4", ...)
    pub asset_type: String,
    pub amount: Amount,
}

/// Account state as returned by the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountState {
    pub account_id: String,
    pub sequence: i64,
    pub balances: Vec<Balance>,
}

impl AccountState {
    /// Native balance, zero if the account holds none
    pub fn native_balance(&self) -> Amount {
        self.balances
            .iter()
            .find(|b| b.asset.is_native())
            .map(|b| b.amount)
            .unwrap_or(Amount::ZERO)
    }
}

/// A claimable balance naming the account as claimant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimableBalance {
    pub id: String,
    pub asset: Asset,
    pub amount: Amount,
    /// Earliest time the balance can be claimed, if time-locked
    pub unlock_time: Option<DateTime<Utc>>,
}

impl ClaimableBalance {
    /// Whether the balance can be claimed at `now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.unlock_time {
            Some(unlock) => now >= unlock,
            None => true,
        }
    }
}

/// Network fee-charged percentiles, in stroops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeStats {
    pub p95: u64,
    pub p99: u64,
}

/// What a transaction is meant to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TxIntent {
    /// Claim the claimable balance with this id
    Claim { balance_id: String },
    /// Pay native asset to a destination
    Payment { destination: String, amount: Amount },
}

impl fmt::Display for TxIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxIntent::Claim { balance_id } => write!(f, "claim {}", balance_id),
            TxIntent::Payment { destination, amount } => {
                write!(f, "payment of {} to {}", amount, destination)
            }
        }
    }
}

/// Why the network refused a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitFailure {
    InsufficientFee,
    BadSequence,
    InsufficientBalance,
    Expired,
    Rejected(String),
}

impl fmt::Display for SubmitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitFailure::InsufficientFee => write!(f, "insufficient fee"),
            SubmitFailure::BadSequence => write!(f, "bad sequence"),
            SubmitFailure::InsufficientBalance => write!(f, "insufficient balance"),
            SubmitFailure::Expired => write!(f, "expired"),
            SubmitFailure::Rejected(code) => write!(f, "rejected ({})", code),
        }
    }
}

impl SubmitFailure {
    /// Classify Horizon transaction / operation result codes
    pub fn from_result_codes(transaction: Option<&str>, operations: &[String]) -> Self {
        let op_codes = || operations.iter().map(String::as_str);
        match transaction {
            Some("tx_insufficient_fee") => SubmitFailure::InsufficientFee,
            Some("tx_bad_seq") => SubmitFailure::BadSequence,
            Some("tx_insufficient_balance") => SubmitFailure::InsufficientBalance,
            Some("tx_too_late") => SubmitFailure::Expired,
            _ if op_codes().any(|c| c == "op_underfunded" || c == "op_low_reserve") => {
                SubmitFailure::InsufficientBalance
            }
            Some(code) => match op_codes().find(|c| *c != "op_success") {
                Some(op) => SubmitFailure::Rejected(format!("{}/{}", code, op)),
                None => SubmitFailure::Rejected(code.to_string()),
            },
            None => SubmitFailure::Rejected("unknown".to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Account not found: {0}")]
    NotFound(String),
    #[error("Submission failed ({failure}): {message}")]
    Submission { failure: SubmitFailure, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Encode error: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn eligibility_follows_unlock_time() {
        let now = Utc::now();
        let mut balance = ClaimableBalance {
            id: "00000000ab".into(),
            asset: Asset::Native,
            amount: Amount::from_units(1),
            unlock_time: None,
        };
        assert!(balance.is_eligible(now));

        balance.unlock_time = Some(now + Duration::seconds(30));
        assert!(!balance.is_eligible(now));
        assert!(balance.is_eligible(now + Duration::seconds(30)));
        assert!(balance.is_eligible(now + Duration::seconds(31)));
    }

    #[test]
    fn parses_canonical_assets() {
        assert_eq!(Asset::parse_canonical("native").unwrap(), Asset::Native);
        assert_eq!(
            Asset::parse_canonical("USD:GISSUER").unwrap(),
            Asset::Credit { code: "USD".into(), issuer: "GISSUER".into() }
        );
        assert!(Asset::parse_canonical("garbage").is_err());
    }

    #[test]
    fn classifies_result_codes() {
        assert_eq!(
            SubmitFailure::from_result_codes(Some("tx_insufficient_fee"), &[]),
            SubmitFailure::InsufficientFee
        );
        assert_eq!(
            SubmitFailure::from_result_codes(Some("tx_failed"), &["op_underfunded".into()]),
            SubmitFailure::InsufficientBalance
        );
        assert_eq!(
            SubmitFailure::from_result_codes(Some("tx_failed"), &["op_does_not_exist".into()]),
            SubmitFailure::Rejected("tx_failed/op_does_not_exist".into())
        );
        assert_eq!(
            SubmitFailure::from_result_codes(None, &[]),
            SubmitFailure::Rejected("unknown".into())
        );
    }
}
