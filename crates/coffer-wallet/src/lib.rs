//! # coffer-wallet: transaction construction and key custody.
//!
//! Tracks the wallet's unspent outputs, selects coins, estimates fees,
//! builds draft transactions, moves them between signers as PSBTs, and
//! guards the signing keys behind an encrypt/lock state machine.
//!
//! # Modules
//!
//! - [`ledger`]: UTXO ledger with snapshot reads
//! - [`fee`]: Size model, fee rates, dust threshold
//! - [`coin_selection`]: Automatic and manual (coin control) selection
//! - [`builder`]: Draft transaction assembly and validation
//! - [`psbt`]: Partially-signed transactions: sign, combine, finalize
//! - [`custody`]: Key custody state machine and keypool
//! - [`keys`]: Seed, KeyChain, BLAKE3-based key derivation
//! - [`encryption`]: Argon2id + AES-256-GCM vault
//! - [`config`]: Layered wallet configuration
//! - [`wallet`]: High-level wallet composition and persistence
//! - [`error`]: `WalletError` and `ValidationError`

pub mod builder;
pub mod coin_selection;
pub mod config;
pub mod custody;
pub mod encryption;
pub mod error;
pub mod fee;
pub mod keys;
pub mod ledger;
pub mod psbt;
pub mod wallet;

// Re-exports for convenient access
pub use builder::{
    AddressOwnership, ChangeDestination, ChangePosition, DraftStage, DraftTransaction, Recipient,
    TransactionBuilder,
};
pub use coin_selection::{CoinSelector, SelectionMode, SelectionPolicy, SelectionRequest, SelectionResult};
pub use config::WalletConfig;
pub use custody::{CustodyStatus, KeyCustody};
pub use encryption::{KdfParams, Vault};
pub use error::{ValidationError, WalletError};
pub use fee::{FeePolicy, FeeRate};
pub use keys::{KeyChain, KeyChainData, Seed};
pub use ledger::{Balance, LedgerSnapshot, UnspentOutput, UtxoFilter, UtxoLedger};
pub use psbt::{ExternalSigner, Psbt, Signer};
pub use wallet::{PaymentRequest, Wallet};
