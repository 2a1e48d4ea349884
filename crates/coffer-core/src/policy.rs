//! M-of-N multisig spending policies.
//!
//! A policy is committed to on chain only by its hash ([`Lock::PolicyHash`]);
//! the full key list is revealed in the witness when the output is spent.
//! Key order is significant: it fixes the policy hash and the order in which
//! signatures appear in a finalized witness.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::constants::MAX_POLICY_KEYS;
use crate::crypto::PublicKey;
use crate::error::PolicyError;
use crate::types::{Hash256, Lock};

/// BLAKE3 KDF context for policy hashes.
const POLICY_HASH_CONTEXT: &str = "coffer-multisig-policy-v1";

/// An M-of-N multisig policy over Ed25519 keys.
///
/// Both decoders go through [`MultisigPolicy::from_raw`], so a decoded
/// policy satisfies the same rules as a constructed one.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, bincode::Encode)]
#[serde(try_from = "PolicyRepr")]
pub struct MultisigPolicy {
    threshold: u8,
    keys: Vec<[u8; 32]>,
}

/// Unchecked wire form of a policy.
#[derive(Deserialize, bincode::Decode)]
struct PolicyRepr {
    threshold: u8,
    keys: Vec<[u8; 32]>,
}

impl TryFrom<PolicyRepr> for MultisigPolicy {
    type Error = PolicyError;

    fn try_from(repr: PolicyRepr) -> Result<Self, Self::Error> {
        Self::from_raw(usize::from(repr.threshold), repr.keys)
    }
}

impl<Context> bincode::Decode<Context> for MultisigPolicy {
    fn decode<D: bincode::de::Decoder<Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, bincode::error::DecodeError> {
        let repr = <PolicyRepr as bincode::Decode<Context>>::decode(decoder)?;
        Self::try_from(repr).map_err(|e| bincode::error::DecodeError::OtherString(e.to_string()))
    }
}

bincode::impl_borrow_decode!(MultisigPolicy);

impl MultisigPolicy {
    /// Build a policy requiring `threshold` of `keys`.
    pub fn new(threshold: usize, keys: Vec<PublicKey>) -> Result<Self, PolicyError> {
        Self::from_raw(threshold, keys.iter().map(PublicKey::to_bytes).collect())
    }

    /// Build a policy from raw key bytes, validating every key.
    pub fn from_raw(threshold: usize, keys: Vec<[u8; 32]>) -> Result<Self, PolicyError> {
        if keys.len() > MAX_POLICY_KEYS {
            return Err(PolicyError::TooManyKeys(keys.len()));
        }
        if threshold == 0 || threshold > keys.len() {
            return Err(PolicyError::InvalidThreshold {
                threshold,
                keys: keys.len(),
            });
        }
        let mut seen = HashSet::with_capacity(keys.len());
        for key in &keys {
            PublicKey::from_bytes(key)?;
            if !seen.insert(*key) {
                return Err(PolicyError::DuplicateKey(hex::encode(key)));
            }
        }
        Ok(Self {
            threshold: threshold as u8,
            keys,
        })
    }

    /// Number of signatures required.
    pub fn threshold(&self) -> usize {
        self.threshold as usize
    }

    /// Raw public keys in policy order.
    pub fn keys(&self) -> &[[u8; 32]] {
        &self.keys
    }

    /// Position of a key within the policy.
    pub fn position(&self, key: &[u8; 32]) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }

    /// Canonical hash committed to by [`Lock::PolicyHash`].
    pub fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(2 + self.keys.len() * 32);
        data.push(self.threshold);
        data.push(self.keys.len() as u8);
        for key in &self.keys {
            data.extend_from_slice(key);
        }
        Hash256(blake3::derive_key(POLICY_HASH_CONTEXT, &data))
    }

    /// The lock that pays to this policy.
    pub fn lock(&self) -> Lock {
        Lock::PolicyHash(self.hash())
    }
}
