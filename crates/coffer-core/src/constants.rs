//! Protocol constants. All monetary values are in minor units (1 COIN = 10^8 units).

pub const COIN: u64 = 100_000_000;

/// Upper bound on any single amount or sum of amounts.
pub const MAX_MONEY: u64 = 21_000_000 * COIN;

/// Transaction version produced by the wallet.
pub const CURRENT_TX_VERSION: u32 = 2;

/// Input sequence number marking the input as final.
pub const SEQUENCE_FINAL: u32 = u32::MAX;

/// Maximum number of keys in a multisig policy.
pub const MAX_POLICY_KEYS: usize = 15;

pub const MAX_INPUTS: usize = 1000;
pub const MAX_OUTPUTS: usize = 1000;

/// Upper bound on an encoded transaction, witnesses included. Decoding
/// refuses length prefixes that would exceed it.
pub const MAX_TX_BYTES: usize = 4 * 1024 * 1024;

/// Ed25519 signature length in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// Ed25519 public key length in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Check that an amount is within the representable money range.
pub fn money_range(value: u64) -> bool {
    value <= MAX_MONEY
}
