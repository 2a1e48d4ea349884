//! # coffer-core
//! Foundation types for the Coffer wallet: transactions, spending locks,
//! multisig policies, Bech32m addresses and Ed25519 input signing.

pub mod address;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod policy;
pub mod types;
