//! Configuration for the sweeper
//!
//! CLI flags and environment variables (loaded from `.env` by `main`) are
//! parsed with clap. The engine itself only sees [`EngineConfig`].

use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::amount::{Amount, TransferAmount};
use crate::ledger::envelope::Keypair;

/// Delay between failed submission attempts
pub const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Validity window of every built transaction, in seconds
pub const TX_TIMEOUT_SECS: u64 = 180;

/// Page size used when listing claimable balances
pub const CLAIMABLE_PAGE_LIMIT: u32 = 100;

/// Cached account balances younger than this are reused
pub const ACCOUNT_MIN_REFRESH: Duration = Duration::from_secs(1);

/// Flood duplicates sent without any delay
pub const FLOOD_IMMEDIATE: u32 = 3;

/// Label used for the native asset in balance events
pub const NATIVE_ASSET_LABEL: &str = "PI";

/// Passphrase of the Pi mainnet
pub const PI_MAINNET_PASSPHRASE: &str = "Pi Network";

/// Pi Network claim and transfer sweeper
#[derive(Parser, Debug, Clone)]
#[command(name = "pi-sweeper")]
#[command(about = "Claims unlocked balances and sweeps funds to a destination", long_about = None)]
pub struct Config {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Horizon API URL
    #[arg(long, env = "HORIZON_URL", default_value = "https://api.mainnet.minepi.com")]
    pub horizon_url: String,

    /// Network passphrase used for transaction signatures
    #[arg(long, env = "NETWORK_PASSPHRASE", default_value = PI_MAINNET_PASSPHRASE)]
    pub network_passphrase: String,

    /// Secret seed (S...) of the swept account
    #[arg(long, env = "SWEEPER_SECRET_KEY", hide_env_values = true)]
    pub secret_key: String,

    /// Destination account (G...) for transfers
    #[arg(long, env = "DESTINATION")]
    pub destination: Option<String>,

    /// Amount to transfer each cycle, or "max" for everything spendable
    #[arg(long, env = "TRANSFER_AMOUNT", default_value = "max")]
    pub amount: TransferAmount,

    /// Minimum fee bid in stroops
    #[arg(long, env = "BASE_FEE", default_value = "150000")]
    pub base_fee: u64,

    /// Maximum fee bid in stroops
    #[arg(long, env = "MAX_FEE", default_value = "2000000")]
    pub max_fee: u64,

    /// Multiplier applied to network fee percentiles and on escalation
    #[arg(long, env = "FEE_MULTIPLIER", default_value = "3.0")]
    pub fee_multiplier: f64,

    /// Submission attempts per operation before giving up
    #[arg(long, env = "MAX_ATTEMPTS", default_value = "10")]
    pub max_attempts: u32,

    /// Duplicate submissions fired after an accepted transaction
    #[arg(long, env = "FLOOD_COUNT", default_value = "10")]
    pub flood_count: u32,

    /// Spacing between delayed flood duplicates in milliseconds
    #[arg(long, env = "FLOOD_INTERVAL_MS", default_value = "50")]
    pub flood_interval_ms: u64,

    /// Claim loop poll interval in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "1000")]
    pub poll_interval_ms: u64,

    /// Transfer loop poll interval in milliseconds
    #[arg(long, env = "TRANSFER_POLL_INTERVAL_MS", default_value = "1000")]
    pub transfer_poll_interval_ms: u64,

    /// Native balance held back from transfers
    #[arg(long, env = "RESERVE", default_value = "2.0")]
    pub reserve: Amount,

    /// HTTP request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run claiming and transferring together (default)
    Run,
    /// Run the claim loop only
    Claim,
    /// Run the transfer loop only (requires a destination)
    Transfer,
    /// Show account balances
    Balances,
    /// List claimable balances and whether they are unlocked
    Claimable,
    /// Show recent transactions of the account
    History {
        /// Number of transactions to show
        #[arg(long, default_value = "5")]
        limit: u32,
    },
}

impl Config {
    /// Decode the configured secret seed
    pub fn load_keypair(&self) -> Result<Keypair, ConfigError> {
        Keypair::from_secret_seed(&self.secret_key)
    }

    /// Engine tunables from the parsed flags
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let config = EngineConfig {
            base_fee: self.base_fee,
            max_fee: self.max_fee,
            fee_multiplier: self.fee_multiplier,
            max_attempts: self.max_attempts,
            flood_count: self.flood_count,
            flood_interval: Duration::from_millis(self.flood_interval_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            transfer_poll_interval: Duration::from_millis(self.transfer_poll_interval_ms),
            reserve: self.reserve,
            network_passphrase: self.network_passphrase.clone(),
            ..EngineConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Tunables of the submission engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum fee bid in stroops
    pub base_fee: u64,
    /// Maximum fee bid in stroops
    pub max_fee: u64,
    /// Percentile and escalation multiplier
    pub fee_multiplier: f64,
    /// Attempts per operation before it is abandoned
    pub max_attempts: u32,
    /// Duplicates flooded after acceptance
    pub flood_count: u32,
    /// Spacing of delayed flood duplicates
    pub flood_interval: Duration,
    /// Claim loop cadence
    pub poll_interval: Duration,
    /// Transfer loop cadence
    pub transfer_poll_interval: Duration,
    /// Native balance never transferred
    pub reserve: Amount,
    /// Wait between failed attempts
    pub retry_backoff: Duration,
    /// Transaction validity window in seconds
    pub tx_timeout_secs: u64,
    /// Minimum age before the account snapshot is refetched
    pub account_min_refresh: Duration,
    /// Claimable balance page size
    pub claimable_limit: u32,
    /// Label of the native asset in balance events
    pub native_asset_label: String,
    /// Passphrase the signatures commit to
    pub network_passphrase: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_fee: 150_000,
            max_fee: 2_000_000,
            fee_multiplier: 3.0,
            max_attempts: 10,
            flood_count: 10,
            flood_interval: Duration::from_millis(50),
            poll_interval: Duration::from_millis(1000),
            transfer_poll_interval: Duration::from_millis(1000),
            reserve: Amount::from_units(2),
            retry_backoff: RETRY_BACKOFF,
            tx_timeout_secs: TX_TIMEOUT_SECS,
            account_min_refresh: ACCOUNT_MIN_REFRESH,
            claimable_limit: CLAIMABLE_PAGE_LIMIT,
            native_asset_label: NATIVE_ASSET_LABEL.to_string(),
            network_passphrase: PI_MAINNET_PASSPHRASE.to_string(),
        }
    }
}

impl EngineConfig {
    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_fee < self.base_fee {
            return Err(ConfigError::InvalidFeeBounds {
                base_fee: self.base_fee,
                max_fee: self.max_fee,
            });
        }
        if self.max_fee > u32::MAX as u64 {
            return Err(ConfigError::InvalidSetting(format!(
                "max fee {} exceeds the ledger fee field",
                self.max_fee
            )));
        }
        if !(self.fee_multiplier.is_finite() && self.fee_multiplier > 0.0) {
            return Err(ConfigError::InvalidSetting(format!(
                "fee multiplier must be positive, got {}",
                self.fee_multiplier
            )));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidSetting("max attempts must be at least 1".into()));
        }
        if self.poll_interval.is_zero() || self.transfer_poll_interval.is_zero() {
            return Err(ConfigError::InvalidSetting("polling intervals must be non-zero".into()));
        }
        if self.reserve < Amount::ZERO {
            return Err(ConfigError::InvalidSetting("reserve cannot be negative".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid destination address: {0}")]
    InvalidDestination(String),
    #[error("Destination address not set")]
    MissingDestination,
    #[error("Invalid transfer amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid secret key: {0}")]
    InvalidSecretKey(String),
    #[error("Invalid fee bounds: base fee {base_fee} exceeds max fee {max_fee}")]
    InvalidFeeBounds { base_fee: u64, max_fee: u64 },
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}
