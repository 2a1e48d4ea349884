//! Ed25519 cryptographic operations for Coffer transactions.
//!
//! # Signing scheme
//!
//! Each input is signed over a **signing hash** that commits to:
//! - Transaction version and lock_time
//! - All input outpoints and sequences
//! - All outputs (value + lock)
//! - The value and lock of the output being spent by this input
//! - The index of the input being signed
//!
//! Witnesses are excluded from the signing hash, so inputs can be signed
//! independently, in any order, by different signers. Committing to the
//! spent output lets an offline signer trust the amounts it is shown.

use ed25519_dalek::{Signer, Verifier};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;

use crate::error::CryptoError;
use crate::types::{Hash256, KeySignature, Lock, Transaction, TxOutput};

/// BLAKE3 KDF context for input signing hashes.
const SIGHASH_CONTEXT: &str = "coffer-input-sighash-v1";

/// Ed25519 keypair for signing transactions.
///
/// Wraps [`ed25519_dalek::SigningKey`], which zeroizes its secret on drop.
pub struct KeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl KeyPair {
    /// Generate a random keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    /// Create a keypair from 32-byte secret key material.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(&bytes),
        }
    }

    /// Derive the public key from this keypair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Sign a message, returning the raw 64-byte Ed25519 signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self::from_secret_bytes(self.signing_key.to_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Ed25519 public key for verifying signatures and deriving locks.
#[derive(Clone)]
pub struct PublicKey {
    verifying_key: ed25519_dalek::VerifyingKey,
}

impl PublicKey {
    /// Create a public key from raw bytes (32 bytes).
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let vk = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { verifying_key: vk })
    }

    /// Get the raw public key bytes (32 bytes).
    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// BLAKE3 pubkey hash used in [`Lock::PubkeyHash`].
    pub fn pubkey_hash(&self) -> Hash256 {
        pubkey_hash(&self.to_bytes())
    }

    /// The single-key lock paying to this key.
    pub fn lock(&self) -> Lock {
        Lock::PubkeyHash(self.pubkey_hash())
    }

    /// Verify an Ed25519 signature on a message.
    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> Result<(), CryptoError> {
        let sig = ed25519_dalek::Signature::from_bytes(signature);
        self.verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PublicKey {}

impl std::hash::Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Compute the BLAKE3 pubkey hash from raw public key bytes.
pub fn pubkey_hash(pubkey_bytes: &[u8; 32]) -> Hash256 {
    Hash256(blake3::hash(pubkey_bytes).into())
}

/// Compute the signing hash for a transaction input.
///
/// `spent` is the output consumed by input `input_index`.
pub fn signing_hash(
    tx: &Transaction,
    input_index: usize,
    spent: &TxOutput,
) -> Result<Hash256, CryptoError> {
    if input_index >= tx.inputs.len() {
        return Err(CryptoError::InputIndexOutOfBounds {
            index: input_index,
            len: tx.inputs.len(),
        });
    }

    let mut data = tx.base_encoding();
    data.extend_from_slice(&spent.value.to_le_bytes());
    data.push(spent.lock.tag());
    data.extend_from_slice(spent.lock.hash().as_bytes());
    data.extend_from_slice(&(input_index as u32).to_le_bytes());

    Ok(Hash256(blake3::derive_key(SIGHASH_CONTEXT, &data)))
}

/// Produce a signature for one input without modifying the transaction.
pub fn sign_input(
    tx: &Transaction,
    input_index: usize,
    spent: &TxOutput,
    keypair: &KeyPair,
) -> Result<KeySignature, CryptoError> {
    let sighash = signing_hash(tx, input_index, spent)?;
    Ok(KeySignature {
        public_key: keypair.public_key().to_bytes(),
        signature: keypair.sign(sighash.as_bytes()).to_vec(),
    })
}

/// Verify a single signature for an input against its signing hash.
pub fn verify_signature(
    tx: &Transaction,
    input_index: usize,
    spent: &TxOutput,
    sig: &KeySignature,
) -> Result<(), CryptoError> {
    let pk = PublicKey::from_bytes(&sig.public_key)?;
    let sig_bytes: [u8; 64] = sig
        .signature
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidSignature)?;
    let sighash = signing_hash(tx, input_index, spent)?;
    pk.verify(sighash.as_bytes(), &sig_bytes)
}

/// Verify that an input's witness satisfies the lock of the output it spends.
///
/// - [`Lock::PubkeyHash`]: exactly one signature whose key hashes to the lock.
/// - [`Lock::PolicyHash`]: the revealed policy hashes to the lock and at
///   least `threshold` distinct policy keys produced valid signatures.
pub fn verify_input(
    tx: &Transaction,
    input_index: usize,
    spent: &TxOutput,
) -> Result<(), CryptoError> {
    let input = tx.inputs.get(input_index).ok_or(CryptoError::InputIndexOutOfBounds {
        index: input_index,
        len: tx.inputs.len(),
    })?;
    let witness = &input.witness;

    match &spent.lock {
        Lock::PubkeyHash(expected) => {
            let [sig] = witness.signatures.as_slice() else {
                return Err(CryptoError::NotEnoughSignatures {
                    have: witness.signatures.len(),
                    need: 1,
                });
            };
            if pubkey_hash(&sig.public_key) != *expected {
                return Err(CryptoError::PubkeyHashMismatch);
            }
            verify_signature(tx, input_index, spent, sig)
        }
        Lock::PolicyHash(expected) => {
            let policy = witness.policy.as_ref().ok_or(CryptoError::MissingPolicy)?;
            if policy.hash() != *expected {
                return Err(CryptoError::PolicyHashMismatch);
            }
            let mut signers = HashSet::new();
            for sig in &witness.signatures {
                if policy.position(&sig.public_key).is_none() {
                    return Err(CryptoError::KeyNotInPolicy);
                }
                verify_signature(tx, input_index, spent, sig)?;
                signers.insert(sig.public_key);
            }
            if signers.len() < policy.threshold() {
                return Err(CryptoError::NotEnoughSignatures {
                    have: signers.len(),
                    need: policy.threshold(),
                });
            }
            Ok(())
        }
    }
}
