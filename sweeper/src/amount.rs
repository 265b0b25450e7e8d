//! Fixed-point ledger amounts
//!
//! Ledger balances carry exactly 7 decimal places. Amounts are held as
//! integer stroops so that reserve arithmetic and the min-rule never suffer
//! from float rounding.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::config::ConfigError;

/// Stroops per whole unit (10^7)
pub const STROOPS_PER_UNIT: i64 = 10_000_000;

/// Number of fractional digits the ledger uses
pub const DECIMALS: usize = 7;

/// An amount of an asset in stroops
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_stroops(stroops: i64) -> Self {
        Self(stroops)
    }

    pub const fn from_units(units: i64) -> Self {
        Self(units * STROOPS_PER_UNIT)
    }

    pub const fn stroops(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let unit = STROOPS_PER_UNIT as u64;
        write!(f, "{}{}.{:07}", sign, abs / unit, abs % unit)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Error parsing a decimal amount string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid amount '{0}'")]
pub struct ParseAmountError(pub String);

impl FromStr for Amount {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseAmountError(s.to_string());
        let trimmed = s.trim();

        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };

        if whole.is_empty() && frac.is_empty() {
            return Err(err());
        }
        if frac.len() > DECIMALS {
            return Err(err());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(err());
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| err())?
        };
        let frac_stroops: i64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<7}", frac).parse().map_err(|_| err())?
        };

        let stroops = whole
            .checked_mul(STROOPS_PER_UNIT)
            .and_then(|w| w.checked_add(frac_stroops))
            .ok_or_else(err)?;

        Ok(Amount(if negative { -stroops } else { stroops }))
    }
}

/// Spendable native balance after holding back the reserve
pub fn compute_spendable(native_balance: Amount, reserve: Amount) -> Amount {
    native_balance.saturating_sub(reserve).max(Amount::ZERO)
}

/// How much the transfer lane should move each cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferAmount {
    /// Move everything above the reserve
    #[default]
    Max,
    /// Move at most this much
    Fixed(Amount),
}

impl TransferAmount {
    /// Resolve the amount to send given the current spendable balance
    pub fn resolve(&self, spendable: Amount) -> Amount {
        match self {
            TransferAmount::Max => spendable,
            TransferAmount::Fixed(amount) => (*amount).min(spendable),
        }
    }
}

impl fmt::Display for TransferAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferAmount::Max => write!(f, "MAX AVAILABLE"),
            TransferAmount::Fixed(amount) => write!(f, "{}", amount),
        }
    }
}

impl FromStr for TransferAmount {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("max") {
            return Ok(TransferAmount::Max);
        }
        let amount: Amount = s
            .parse()
            .map_err(|e: ParseAmountError| ConfigError::InvalidAmount(e.0))?;
        if !amount.is_positive() {
            return Err(ConfigError::InvalidAmount(s.to_string()));
        }
        Ok(TransferAmount::Fixed(amount))
    }
}
