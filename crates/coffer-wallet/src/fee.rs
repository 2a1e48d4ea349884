//! Fee estimation: linear size model, fee rates and dust thresholds.
//!
//! Sizes are estimated from input and output counts before the transaction
//! exists. Every fee computation rounds up so the wallet never underpays,
//! and the selector and builder share [`dust_threshold`] so they always
//! agree on whether a change output is worth creating.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// Fixed bytes per transaction: version, lock time and two counts.
pub const TX_OVERHEAD_BYTES: usize = 12;

/// Bytes per input: outpoint (36), signature (64), sequence (4).
pub const INPUT_BYTES: usize = 104;

/// Bytes per output: value (8), lock tag (1), lock hash (32), length (1).
pub const OUTPUT_BYTES: usize = 42;

/// Assumed size of creating and later spending one output.
pub const DUST_SPEND_BYTES: usize = INPUT_BYTES + OUTPUT_BYTES;

/// Fee rate in minor units per 1000 bytes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct FeeRate(u64);

impl FeeRate {
    pub const ZERO: Self = Self(0);

    pub const fn from_per_kb(units: u64) -> Self {
        Self(units)
    }

    pub const fn from_per_byte(units: u64) -> Self {
        Self(units.saturating_mul(1000))
    }

    pub const fn per_kb(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} units/kB", self.0)
    }
}

/// Estimated serialized size of a transaction with the given shape.
pub fn estimate_size(input_count: usize, output_count: usize) -> usize {
    TX_OVERHEAD_BYTES
        .saturating_add(input_count.saturating_mul(INPUT_BYTES))
        .saturating_add(output_count.saturating_mul(OUTPUT_BYTES))
}

/// Fee for `bytes` at `rate`, rounded up. Saturates at `u64::MAX`.
pub fn compute_fee(bytes: usize, rate: FeeRate) -> u64 {
    let product = (bytes as u128) * (rate.per_kb() as u128);
    let fee = product.div_ceil(1000);
    u64::try_from(fee).unwrap_or(u64::MAX)
}

/// Value at or below which an output costs more to spend than it holds.
pub fn dust_threshold(rate: FeeRate) -> u64 {
    compute_fee(DUST_SPEND_BYTES, rate)
}

pub fn is_dust(value: u64, rate: FeeRate) -> bool {
    value <= dust_threshold(rate)
}

/// Relay floor and absurd-fee ceiling applied to every build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeePolicy {
    pub min_fee_rate: FeeRate,
    pub max_tx_fee: u64,
}

impl FeePolicy {
    /// Clamp a requested rate up to the relay floor.
    pub fn effective_rate(&self, requested: FeeRate) -> FeeRate {
        requested.max(self.min_fee_rate)
    }

    /// Check an absolute fee for a transaction of `bytes` against both bounds.
    pub fn check_fee(&self, fee: u64, bytes: usize) -> Result<(), ValidationError> {
        if fee > self.max_tx_fee {
            return Err(ValidationError::AbsurdFee {
                fee,
                max: self.max_tx_fee,
            });
        }
        let min = compute_fee(bytes, self.min_fee_rate);
        if fee < min {
            return Err(ValidationError::FeeBelowMinimum { fee, min });
        }
        Ok(())
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            min_fee_rate: FeeRate::from_per_kb(1_000),
            max_tx_fee: coffer_core::constants::COIN / 10,
        }
    }
}
