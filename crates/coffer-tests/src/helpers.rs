//! Shared fixtures for the integration tests.

use std::path::Path;

use coffer_core::address::{Address, Network};
use coffer_core::types::{Hash256, OutPoint};
use coffer_wallet::{KdfParams, Seed, UnspentOutput, Wallet, WalletConfig};

/// Test config: small keypool, cheap KDF, change always last.
pub fn test_config(dir: &Path) -> WalletConfig {
    WalletConfig {
        data_dir: dir.to_path_buf(),
        keypool_size: 5,
        randomize_change_position: false,
        kdf: KdfParams::light(),
        ..WalletConfig::default()
    }
}

/// Deterministic wallet from a one-byte seed pattern.
pub fn wallet(seed: u8, dir: &Path) -> Wallet {
    Wallet::from_seed(Seed::from_bytes([seed; 32]), test_config(dir))
}

/// Outpoint with a txid made of `tag` bytes.
pub fn outpoint(tag: u8, index: u32) -> OutPoint {
    OutPoint::new(Hash256([tag; 32]), index)
}

/// Address nobody in the tests holds a key for.
pub fn external_address(tag: u8) -> Address {
    Address::from_pubkey_hash(Hash256([tag; 32]), Network::Testnet)
}

/// Credit `value` to a fresh address of `wallet`, with six confirmations.
pub fn fund(wallet: &Wallet, tag: u8, value: u64) -> OutPoint {
    let op = outpoint(tag, 0);
    let address = wallet.next_address().unwrap();
    wallet
        .ledger()
        .apply_update(vec![UnspentOutput::new(op, value, address, 6)], &[])
        .unwrap();
    op
}

/// Unspent output with a distinct outpoint per `n`.
pub fn numbered_utxo(n: u32, value: u64, address: Address, confirmations: u32) -> UnspentOutput {
    let mut txid = [0u8; 32];
    txid[..4].copy_from_slice(&n.to_le_bytes());
    UnspentOutput::new(OutPoint::new(Hash256(txid), 0), value, address, confirmations)
}
