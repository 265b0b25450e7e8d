//! Pi Network claim and transfer sweeper
//!
//! Two independent polling lanes watch an account: the claim lane claims
//! every unlocked claimable balance, the transfer lane sweeps spendable
//! native balance to a destination. Every submission bids an adaptive fee,
//! retries with escalation and floods the accepted envelope.

use std::fmt;

use serde::Serialize;

pub mod account;
pub mod amount;
pub mod config;
pub mod engine;
pub mod events;
pub mod fees;
pub mod ledger;
pub mod submitter;
pub mod tracker;

pub use amount::{Amount, TransferAmount};
pub use config::{ConfigError, EngineConfig};
pub use engine::Engine;
pub use events::{BotEvent, EventBus, EventChannel, EventSubscriber};
pub use ledger::{LedgerClient, LedgerError};

/// The two operation lanes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Claim,
    Transfer,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Claim => write!(f, "claim"),
            OperationKind::Transfer => write!(f, "transfer"),
        }
    }
}
