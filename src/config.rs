use crate::error::{MarketError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// A fraction in `[0, 1]`, checked once at configuration load so transaction
/// paths never re-validate it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Rate(Decimal);

impl Rate {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Result<Self> {
        if value >= Decimal::ZERO && value <= Decimal::ONE {
            Ok(Self(value))
        } else {
            Err(MarketError::Config(format!(
                "rate must be within [0, 1], got {value}"
            )))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Rate {
    type Error = MarketError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Rate> for Decimal {
    fn from(rate: Rate) -> Self {
        rate.0
    }
}

/// Recognized marketplace options. Loaded from a JSON file; decimals are
/// encoded as strings (`"0.05"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarketConfig {
    /// Non-refundable charge taken from the poster at creation, separate from
    /// the escrowed payment.
    pub posting_fee: Decimal,
    /// Fraction of the payment retained on a successful approval.
    pub commission_rate: Rate,
    /// Fraction of the escrow forfeited when cancelling a claimed task.
    pub cancellation_penalty: Rate,
    pub sweep_interval_secs: u64,
    pub pending_approval_deadline_secs: u64,
    pub pool_max_size: usize,
    pub pool_min_warm: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            posting_fee: dec!(50),
            commission_rate: Rate(dec!(0.05)),
            cancellation_penalty: Rate(dec!(0.25)),
            sweep_interval_secs: 300,
            pending_approval_deadline_secs: 86_400,
            pool_max_size: 10,
            pool_min_warm: 2,
        }
    }
}

impl MarketConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| MarketError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.posting_fee < Decimal::ZERO {
            return Err(MarketError::Config(format!(
                "posting_fee must not be negative, got {}",
                self.posting_fee
            )));
        }
        if self.pool_max_size == 0 {
            return Err(MarketError::Config("pool_max_size must be at least 1".into()));
        }
        if self.pool_min_warm > self.pool_max_size {
            return Err(MarketError::Config(format!(
                "pool_min_warm ({}) exceeds pool_max_size ({})",
                self.pool_min_warm, self.pool_max_size
            )));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn pending_approval_deadline(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pending_approval_deadline_secs as i64)
    }
}
