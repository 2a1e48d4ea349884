//! Integration test suite for Coffer wallets.
//!
//! Payment flows across cooperating wallets, custody under concurrent
//! signing, ledger snapshot isolation, and coin selection properties.

pub mod helpers;
