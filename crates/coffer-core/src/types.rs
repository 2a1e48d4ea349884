//! Core protocol types: outpoints, locks, inputs, outputs, transactions.
//!
//! All monetary values are integer minor units (1 COIN = 10^8 units).
//! The transaction ID commits to everything except input witnesses, so it
//! stays stable while signatures are being collected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{MAX_INPUTS, MAX_OUTPUTS, MAX_TX_BYTES};
use crate::error::{OutPointParseError, TransactionError};
use crate::policy::MultisigPolicy;

/// A 32-byte hash value.
///
/// Used for transaction IDs, pubkey hashes, policy hashes and signing hashes
/// (all BLAKE3).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for Hash256 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Transaction ID containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within the transaction.
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, index: u32) -> Self {
        Self { txid, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

impl FromStr for OutPoint {
    type Err = OutPointParseError;

    /// Parse the `txid:index` form produced by [`Display`](fmt::Display).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, index) = s.rsplit_once(':').ok_or(OutPointParseError::MissingSeparator)?;
        let txid = txid
            .parse::<Hash256>()
            .map_err(|e| OutPointParseError::InvalidTxid(e.to_string()))?;
        let index = index
            .parse::<u32>()
            .map_err(|e| OutPointParseError::InvalidIndex(e.to_string()))?;
        Ok(Self { txid, index })
    }
}

/// The spending condition attached to an output.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub enum Lock {
    /// Spendable by one signature from the key whose BLAKE3 hash matches.
    PubkeyHash(Hash256),
    /// Spendable by satisfying the multisig policy whose hash matches.
    PolicyHash(Hash256),
}

impl Lock {
    /// Wire tag of this lock kind; doubles as the address version byte.
    pub fn tag(&self) -> u8 {
        match self {
            Lock::PubkeyHash(_) => 0,
            Lock::PolicyHash(_) => 1,
        }
    }

    /// The committed hash regardless of lock kind.
    pub fn hash(&self) -> &Hash256 {
        match self {
            Lock::PubkeyHash(h) | Lock::PolicyHash(h) => h,
        }
    }
}

/// A transaction output, creating a new UTXO.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Value in minor units.
    pub value: u64,
    /// Condition that must be satisfied to spend this output.
    pub lock: Lock,
}

/// One signature together with the public key that produced it.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct KeySignature {
    /// Ed25519 public key (32 bytes).
    pub public_key: [u8; 32],
    /// Ed25519 signature (64 bytes).
    pub signature: Vec<u8>,
}

/// Unlocking data for an input. Empty until the input is finalized.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Witness {
    /// Revealed policy when spending a [`Lock::PolicyHash`] output.
    pub policy: Option<MultisigPolicy>,
    /// Signatures, in policy key order for multisig inputs.
    pub signatures: Vec<KeySignature>,
}

impl Witness {
    pub fn is_empty(&self) -> bool {
        self.policy.is_none() && self.signatures.is_empty()
    }
}

/// A transaction input, spending a previous output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The outpoint being spent.
    pub previous_output: OutPoint,
    /// Sequence number.
    pub sequence: u32,
    /// Unlocking data, excluded from the txid and the signing hash.
    pub witness: Witness,
}

/// A transaction transferring value between locks.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Protocol version.
    pub version: u32,
    /// Inputs consuming previous outputs.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Block height or timestamp before which this tx is invalid.
    pub lock_time: u32,
}

impl Transaction {
    /// Canonical encoding without witnesses, little-endian fixed layout.
    pub fn base_encoding(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(16 + self.inputs.len() * 40 + self.outputs.len() * 41);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            data.extend_from_slice(input.previous_output.txid.as_bytes());
            data.extend_from_slice(&input.previous_output.index.to_le_bytes());
            data.extend_from_slice(&input.sequence.to_le_bytes());
        }
        data.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            data.extend_from_slice(&output.value.to_le_bytes());
            data.push(output.lock.tag());
            data.extend_from_slice(output.lock.hash().as_bytes());
        }
        data.extend_from_slice(&self.lock_time.to_le_bytes());
        data
    }

    /// Compute the transaction ID (BLAKE3 of the witness-stripped encoding).
    pub fn txid(&self) -> Hash256 {
        Hash256(blake3::hash(&self.base_encoding()).into())
    }

    /// Full encoding including witnesses, for broadcast.
    pub fn serialize(&self) -> Result<Vec<u8>, TransactionError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))
    }

    /// Decode a transaction produced by [`Transaction::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self, TransactionError> {
        if bytes.len() > MAX_TX_BYTES {
            return Err(TransactionError::Serialization(format!(
                "{} bytes exceeds limit of {MAX_TX_BYTES}",
                bytes.len()
            )));
        }
        let config = bincode::config::standard().with_limit::<MAX_TX_BYTES>();
        let (tx, _) = bincode::decode_from_slice(bytes, config)
            .map_err(|e| TransactionError::Serialization(e.to_string()))?;
        Ok(tx)
    }

    /// Sum of all output values. Returns None on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }

    /// Structural checks that do not need the spent outputs.
    pub fn check_structure(&self) -> Result<(), TransactionError> {
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(TransactionError::EmptyInputsOrOutputs);
        }
        if self.inputs.len() > MAX_INPUTS {
            return Err(TransactionError::TooManyInputs(self.inputs.len()));
        }
        if self.outputs.len() > MAX_OUTPUTS {
            return Err(TransactionError::TooManyOutputs(self.outputs.len()));
        }
        let mut seen = std::collections::HashSet::with_capacity(self.inputs.len());
        for input in &self.inputs {
            if !seen.insert(input.previous_output) {
                return Err(TransactionError::DuplicateInput(input.previous_output.to_string()));
            }
        }
        for (i, output) in self.outputs.iter().enumerate() {
            if output.value == 0 {
                return Err(TransactionError::ZeroValueOutput(i));
            }
        }
        self.total_output_value().ok_or(TransactionError::ValueOverflow)?;
        Ok(())
    }

    /// Copy of this transaction with every witness cleared.
    pub fn stripped(&self) -> Self {
        let mut tx = self.clone();
        for input in &mut tx.inputs {
            input.witness = Witness::default();
        }
        tx
    }
}
