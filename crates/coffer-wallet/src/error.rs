//! Wallet error types.

use coffer_core::error::{AddressError, CryptoError, PolicyError, TransactionError};
use thiserror::Error;

/// A payment request or draft transaction failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no recipients")]
    NoRecipients,
    #[error("recipient {index}: amount must be positive")]
    ZeroAmount { index: usize },
    #[error("recipient {index}: amount {amount} is dust")]
    DustAmount { index: usize, amount: u64 },
    #[error("duplicate recipient address: {0}")]
    DuplicateRecipient(String),
    #[error("recipient {index}: address is for {found}, wallet is on {expected}")]
    WrongNetwork { index: usize, expected: String, found: String },
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("amount overflow")]
    AmountOverflow,
    #[error("selection targets {selected}, recipients total {recipients}")]
    SelectionMismatch { selected: u64, recipients: u64 },
    #[error("no inputs selected")]
    NoInputs,
    #[error("duplicate coin in selection: {0}")]
    DuplicateCoin(String),
    #[error("inputs {inputs} do not cover outputs {outputs} plus fee {fee}")]
    ValueNotConserved { inputs: u64, outputs: u64, fee: u64 },
    #[error("change output required but no change address given")]
    MissingChangeAddress,
    #[error("change address is for {found}, wallet is on {expected}")]
    ChangeWrongNetwork { expected: String, found: String },
    #[error("change address does not belong to this wallet: {0}")]
    ChangeNotOwned(String),
    #[error("custom change address has not been confirmed")]
    UnconfirmedCustomChange,
    #[error("change amount {0} is dust")]
    DustChange(u64),
    #[error("fee {fee} exceeds maximum {max}")]
    AbsurdFee { fee: u64, max: u64 },
    #[error("fee {fee} is below the relay minimum {min}")]
    FeeBelowMinimum { fee: u64, min: u64 },
}

/// Errors that can occur in wallet operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Selection cannot cover the target plus fee.
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },

    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    /// Signing attempted while key material is locked.
    #[error("wallet is locked")]
    WalletLocked,

    #[error("wrong passphrase")]
    WrongPassphrase,

    #[error("passphrase must not be empty")]
    EmptyPassphrase,

    #[error("wallet is already encrypted")]
    AlreadyEncrypted,

    #[error("wallet is not encrypted")]
    NotEncrypted,

    /// Two PSBTs do not describe the same draft.
    #[error("PSBTs reference different transactions")]
    MismatchedTransaction,

    /// Finalize attempted while some inputs still lack signatures.
    #[error("incomplete signatures on inputs {inputs:?}")]
    IncompleteSignatures { inputs: Vec<usize> },

    #[error("PSBT is already finalized")]
    AlreadyFinalized,

    #[error("invalid PSBT: {0}")]
    InvalidPsbt(String),

    #[error("unknown output: {0}")]
    UnknownOutput(String),

    #[error("output is not spendable: {0}")]
    UnspendableOutput(String),

    #[error("duplicate output: {0}")]
    DuplicateOutput(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("encryption: {0}")]
    Encryption(String),

    #[error("decryption: {0}")]
    Decryption(String),

    #[error("corrupted file: {0}")]
    CorruptedFile(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization: {0}")]
    Serialization(String),

    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl From<std::io::Error> for WalletError {
    fn from(e: std::io::Error) -> Self {
        WalletError::Io(e.to_string())
    }
}

impl From<config::ConfigError> for WalletError {
    fn from(e: config::ConfigError) -> Self {
        WalletError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_insufficient_funds() {
        let e = WalletError::InsufficientFunds { have: 100, need: 200 };
        assert_eq!(e.to_string(), "insufficient funds: have 100, need 200");
    }

    #[test]
    fn display_incomplete_signatures() {
        let e = WalletError::IncompleteSignatures { inputs: vec![0, 2] };
        assert_eq!(e.to_string(), "incomplete signatures on inputs [0, 2]");
    }

    #[test]
    fn validation_converts() {
        let e: WalletError = ValidationError::NoRecipients.into();
        assert_eq!(e, WalletError::Validation(ValidationError::NoRecipients));
        assert_eq!(e.to_string(), "validation: no recipients");
    }

    #[test]
    fn from_crypto_error() {
        let wallet: WalletError = CryptoError::InvalidPublicKey.into();
        assert_eq!(wallet, WalletError::Crypto(CryptoError::InvalidPublicKey));
    }

    #[test]
    fn from_transaction_error() {
        let wallet: WalletError = TransactionError::EmptyInputsOrOutputs.into();
        assert_eq!(
            wallet,
            WalletError::Transaction(TransactionError::EmptyInputsOrOutputs)
        );
    }

    #[test]
    fn from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(WalletError::from(io), WalletError::Io(_)));
    }
}
