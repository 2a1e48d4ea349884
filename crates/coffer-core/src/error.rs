//! Error types for the Coffer core primitives.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("empty inputs or outputs")] EmptyInputsOrOutputs,
    #[error("value overflow")] ValueOverflow,
    #[error("zero-value output at index {0}")] ZeroValueOutput(usize),
    #[error("duplicate input: {0}")] DuplicateInput(String),
    #[error("too many inputs: {0}")] TooManyInputs(usize),
    #[error("too many outputs: {0}")] TooManyOutputs(usize),
    #[error("serialization: {0}")] Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
    #[error("pubkey hash does not match expected")] PubkeyHashMismatch,
    #[error("policy hash does not match expected")] PolicyHashMismatch,
    #[error("missing witness policy for policy-locked input")] MissingPolicy,
    #[error("key is not part of the spending policy")] KeyNotInPolicy,
    #[error("not enough signatures: have {have}, need {need}")] NotEnoughSignatures { have: usize, need: usize },
    #[error("input index out of bounds: {index} >= {len}")] InputIndexOutOfBounds { index: usize, len: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid HRP")] InvalidHrp,
    #[error("invalid length")] InvalidLength,
    #[error("invalid checksum")] InvalidChecksum,
    #[error("invalid character: {0}")] InvalidCharacter(char),
    #[error("invalid version: {0}")] InvalidVersion(u8),
    #[error("invalid padding bits")] InvalidPadding,
    #[error("unknown network: {0}")] UnknownNetwork(String),
    #[error("missing separator")] MissingSeparator,
    #[error("mixed case")] MixedCase,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("threshold must be between 1 and {keys}, got {threshold}")] InvalidThreshold { threshold: usize, keys: usize },
    #[error("too many keys: {0}")] TooManyKeys(usize),
    #[error("duplicate key in policy: {0}")] DuplicateKey(String),
    #[error(transparent)] Crypto(#[from] CryptoError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutPointParseError {
    #[error("missing ':' separator")] MissingSeparator,
    #[error("invalid txid: {0}")] InvalidTxid(String),
    #[error("invalid index: {0}")] InvalidIndex(String),
}
