//! Partially-signed transactions.
//!
//! A [`Psbt`] carries a draft's unsigned transaction plus, per input, the
//! output being spent and the signatures collected so far. Offline signers
//! can check amounts from the embedded outputs, because the signing hash
//! commits to them.
//!
//! Signatures are append-only: neither [`Psbt::sign`] nor [`Psbt::combine`]
//! ever replaces one. Once [`Psbt::finalize`] succeeds the payload is frozen.
//!
//! # Wire format
//! ```text
//! magic "cpsbt\xff" || bincode(standard) payload
//! ```

use std::collections::BTreeMap;

use coffer_core::constants::MAX_TX_BYTES;
use coffer_core::crypto::{pubkey_hash, sign_input, verify_input, verify_signature, KeyPair};
use coffer_core::error::CryptoError;
use coffer_core::policy::MultisigPolicy;
use coffer_core::types::{Hash256, KeySignature, Lock, Transaction, TxOutput, Witness};

use crate::builder::{DraftStage, DraftTransaction};
use crate::error::WalletError;

/// Prefix of every serialized PSBT.
pub const PSBT_MAGIC: &[u8; 6] = b"cpsbt\xff";

/// Largest PSBT body accepted by [`Psbt::from_bytes`].
pub const MAX_PSBT_BYTES: usize = 2 * MAX_TX_BYTES;

/// Something that can produce input signatures.
///
/// Implemented by raw keypairs and by the wallet's key custody, which gates
/// each signature on its lock state.
pub trait Signer {
    /// Public key hashing to `hash`, if this signer holds its secret.
    fn key_for_pubkey_hash(&self, hash: &Hash256) -> Option<[u8; 32]>;

    fn holds_key(&self, public_key: &[u8; 32]) -> bool;

    /// Sign input `index` of `tx` with the key for `public_key`.
    fn sign_with(
        &self,
        public_key: &[u8; 32],
        tx: &Transaction,
        index: usize,
        spent: &TxOutput,
    ) -> Result<KeySignature, WalletError>;
}

impl Signer for KeyPair {
    fn key_for_pubkey_hash(&self, hash: &Hash256) -> Option<[u8; 32]> {
        let pk = self.public_key();
        (pk.pubkey_hash() == *hash).then(|| pk.to_bytes())
    }

    fn holds_key(&self, public_key: &[u8; 32]) -> bool {
        self.public_key().to_bytes() == *public_key
    }

    fn sign_with(
        &self,
        public_key: &[u8; 32],
        tx: &Transaction,
        index: usize,
        spent: &TxOutput,
    ) -> Result<KeySignature, WalletError> {
        if !self.holds_key(public_key) {
            return Err(WalletError::KeyNotFound(hex::encode(public_key)));
        }
        Ok(sign_input(tx, index, spent, self)?)
    }
}

/// A signing device outside this process, such as a hardware wallet.
///
/// The device receives the hex PSBT and answers with a hex PSBT of the same
/// draft carrying whatever signatures it could add.
pub trait ExternalSigner {
    fn sign_psbt(&self, payload: &str) -> Result<String, WalletError>;
}

impl Signer for [KeyPair] {
    fn key_for_pubkey_hash(&self, hash: &Hash256) -> Option<[u8; 32]> {
        self.iter().find_map(|kp| kp.key_for_pubkey_hash(hash))
    }

    fn holds_key(&self, public_key: &[u8; 32]) -> bool {
        self.iter().any(|kp| kp.holds_key(public_key))
    }

    fn sign_with(
        &self,
        public_key: &[u8; 32],
        tx: &Transaction,
        index: usize,
        spent: &TxOutput,
    ) -> Result<KeySignature, WalletError> {
        let kp = self
            .iter()
            .find(|kp| kp.holds_key(public_key))
            .ok_or_else(|| WalletError::KeyNotFound(hex::encode(public_key)))?;
        kp.sign_with(public_key, tx, index, spent)
    }
}

/// Signing context for one input.
#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct PsbtInput {
    /// The output this input spends.
    pub utxo: TxOutput,
    /// Spending policy, present exactly when `utxo` is policy-locked.
    pub policy: Option<MultisigPolicy>,
    /// Signatures collected so far, keyed by public key.
    pub partial_sigs: BTreeMap<[u8; 32], Vec<u8>>,
}

impl PsbtInput {
    /// Whether the collected signatures meet the spending condition.
    pub fn is_satisfied(&self) -> bool {
        match (&self.utxo.lock, &self.policy) {
            (Lock::PubkeyHash(hash), _) => self.partial_sigs.keys().any(|pk| pubkey_hash(pk) == *hash),
            (Lock::PolicyHash(_), Some(policy)) => {
                self.partial_sigs
                    .keys()
                    .filter(|pk| policy.position(pk).is_some())
                    .count()
                    >= policy.threshold()
            }
            (Lock::PolicyHash(_), None) => false,
        }
    }

    /// Whether `public_key` is allowed to sign for this input at all.
    fn accepts_key(&self, public_key: &[u8; 32]) -> bool {
        match (&self.utxo.lock, &self.policy) {
            (Lock::PubkeyHash(hash), _) => pubkey_hash(public_key) == *hash,
            (Lock::PolicyHash(_), Some(policy)) => policy.position(public_key).is_some(),
            (Lock::PolicyHash(_), None) => false,
        }
    }

    /// Keys of `signer` that could still contribute to this input.
    fn candidate_keys<S: Signer + ?Sized>(&self, signer: &S) -> Vec<[u8; 32]> {
        let keys: Vec<[u8; 32]> = match (&self.utxo.lock, &self.policy) {
            (Lock::PubkeyHash(hash), _) => signer.key_for_pubkey_hash(hash).into_iter().collect(),
            (Lock::PolicyHash(_), Some(policy)) => {
                policy.keys().iter().filter(|k| signer.holds_key(k)).copied().collect()
            }
            (Lock::PolicyHash(_), None) => Vec::new(),
        };
        keys.into_iter()
            .filter(|k| !self.partial_sigs.contains_key(k))
            .collect()
    }

    /// Witness built from the collected signatures, in policy key order.
    fn witness(&self) -> Witness {
        match &self.policy {
            Some(policy) => Witness {
                policy: Some(policy.clone()),
                signatures: policy
                    .keys()
                    .iter()
                    .filter_map(|pk| {
                        self.partial_sigs.get(pk).map(|sig| KeySignature {
                            public_key: *pk,
                            signature: sig.clone(),
                        })
                    })
                    .take(policy.threshold())
                    .collect(),
            },
            None => Witness {
                policy: None,
                signatures: self
                    .partial_sigs
                    .iter()
                    .find(|(pk, _)| self.accepts_key(pk))
                    .map(|(pk, sig)| KeySignature {
                        public_key: *pk,
                        signature: sig.clone(),
                    })
                    .into_iter()
                    .collect(),
            },
        }
    }
}

/// A draft transaction in transit between signers.
#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Psbt {
    tx: Transaction,
    inputs: Vec<PsbtInput>,
    fee: u64,
    change_index: Option<u32>,
    finalized: bool,
}

impl Psbt {
    /// Wrap a draft. `policies` must cover every policy-locked input.
    pub fn from_draft(draft: &DraftTransaction, policies: &[MultisigPolicy]) -> Result<Self, WalletError> {
        if draft.is_finalized() {
            return Err(WalletError::AlreadyFinalized);
        }
        let inputs = draft
            .spent_outputs()
            .iter()
            .map(|utxo| {
                let policy = match utxo.lock {
                    Lock::PubkeyHash(_) => None,
                    Lock::PolicyHash(hash) => Some(
                        policies
                            .iter()
                            .find(|p| p.hash() == hash)
                            .cloned()
                            .ok_or(CryptoError::MissingPolicy)?,
                    ),
                };
                Ok(PsbtInput {
                    utxo: utxo.clone(),
                    policy,
                    partial_sigs: BTreeMap::new(),
                })
            })
            .collect::<Result<Vec<_>, WalletError>>()?;

        let psbt = Self {
            tx: draft.tx().stripped(),
            inputs,
            fee: draft.fee(),
            change_index: draft.change_index().map(|i| i as u32),
            finalized: false,
        };
        psbt.validate()?;
        Ok(psbt)
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    pub fn inputs(&self) -> &[PsbtInput] {
        &self.inputs
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    pub fn change_index(&self) -> Option<usize> {
        self.change_index.map(|i| i as usize)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn input_satisfied(&self, index: usize) -> bool {
        self.inputs.get(index).is_some_and(PsbtInput::is_satisfied)
    }

    /// Indices of inputs still lacking signatures.
    pub fn unsatisfied_inputs(&self) -> Vec<usize> {
        self.inputs
            .iter()
            .enumerate()
            .filter(|(_, input)| !input.is_satisfied())
            .map(|(i, _)| i)
            .collect()
    }

    /// Total number of collected signatures.
    pub fn signature_count(&self) -> usize {
        self.inputs.iter().map(|i| i.partial_sigs.len()).sum()
    }

    /// Lifecycle stage implied by the collected signatures.
    pub fn stage(&self) -> DraftStage {
        if self.finalized {
            DraftStage::Finalized
        } else if self.inputs.iter().all(PsbtInput::is_satisfied) {
            DraftStage::FullySigned
        } else {
            DraftStage::PartiallySigned
        }
    }

    /// Attach every signature `signer` can contribute to unsatisfied inputs.
    ///
    /// Returns the number of signatures added; re-signing a satisfied
    /// payload adds none. On error, signatures added before the failure are
    /// kept and the payload stays consistent.
    pub fn sign<S: Signer + ?Sized>(&mut self, signer: &S) -> Result<usize, WalletError> {
        if self.finalized {
            return Err(WalletError::AlreadyFinalized);
        }
        let mut added = 0;
        for (index, input) in self.inputs.iter_mut().enumerate() {
            for public_key in input.candidate_keys(signer) {
                if input.is_satisfied() {
                    break;
                }
                let sig = signer.sign_with(&public_key, &self.tx, index, &input.utxo)?;
                input.partial_sigs.insert(sig.public_key, sig.signature);
                added += 1;
            }
        }
        tracing::debug!(
            txid = %self.tx.txid(),
            added,
            unsatisfied = self.unsatisfied_inputs().len(),
            "psbt signed"
        );
        Ok(added)
    }

    /// Round-trip through an external device and merge its signatures.
    ///
    /// The reply goes through [`Psbt::combine`], so a device that answers
    /// with a different draft or a bad signature changes nothing.
    pub fn sign_external(&mut self, device: &dyn ExternalSigner) -> Result<usize, WalletError> {
        if self.finalized {
            return Err(WalletError::AlreadyFinalized);
        }
        let reply = Psbt::from_hex(&device.sign_psbt(&self.to_hex()?)?)?;
        let added = self.combine(&reply)?;
        tracing::debug!(txid = %self.tx.txid(), added, "external signer returned");
        Ok(added)
    }

    /// Merge signatures from another copy of the same draft.
    ///
    /// Incoming signatures are verified before anything is merged; existing
    /// signatures are never replaced. Returns the number added.
    pub fn combine(&mut self, other: &Psbt) -> Result<usize, WalletError> {
        if self.finalized || other.finalized {
            return Err(WalletError::AlreadyFinalized);
        }
        if !self.same_draft(other) {
            return Err(WalletError::MismatchedTransaction);
        }

        let mut incoming = Vec::new();
        for (index, (ours, theirs)) in self.inputs.iter().zip(&other.inputs).enumerate() {
            for (pk, sig) in &theirs.partial_sigs {
                if ours.partial_sigs.contains_key(pk) {
                    continue;
                }
                if !ours.accepts_key(pk) {
                    return Err(WalletError::InvalidPsbt(format!(
                        "input {index}: signature from unrelated key {}",
                        hex::encode(pk)
                    )));
                }
                let key_sig = KeySignature {
                    public_key: *pk,
                    signature: sig.clone(),
                };
                verify_signature(&self.tx, index, &ours.utxo, &key_sig)?;
                incoming.push((index, key_sig));
            }
        }

        let added = incoming.len();
        for (index, sig) in incoming {
            self.inputs[index]
                .partial_sigs
                .entry(sig.public_key)
                .or_insert(sig.signature);
        }
        tracing::debug!(txid = %self.tx.txid(), added, "psbt combined");
        Ok(added)
    }

    /// Produce the broadcastable transaction. One-way.
    pub fn finalize(&mut self) -> Result<DraftTransaction, WalletError> {
        if self.finalized {
            return Err(WalletError::AlreadyFinalized);
        }
        let missing = self.unsatisfied_inputs();
        if !missing.is_empty() {
            return Err(WalletError::IncompleteSignatures { inputs: missing });
        }

        let mut tx = self.tx.clone();
        for (input, ctx) in tx.inputs.iter_mut().zip(&self.inputs) {
            input.witness = ctx.witness();
        }
        for (index, ctx) in self.inputs.iter().enumerate() {
            verify_input(&tx, index, &ctx.utxo)?;
        }

        self.finalized = true;
        let spent = self.inputs.iter().map(|i| i.utxo.clone()).collect();
        let draft = DraftTransaction::from_parts(
            tx,
            spent,
            self.fee,
            self.change_index(),
            DraftStage::Finalized,
        );
        tracing::info!(txid = %draft.txid(), fee = draft.fee(), "transaction finalized");
        Ok(draft)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WalletError> {
        let body = bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| WalletError::Serialization(e.to_string()))?;
        let mut out = Vec::with_capacity(PSBT_MAGIC.len() + body.len());
        out.extend_from_slice(PSBT_MAGIC);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode and validate a payload from [`Psbt::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        let body = bytes
            .strip_prefix(PSBT_MAGIC.as_slice())
            .ok_or_else(|| WalletError::InvalidPsbt("bad magic".into()))?;
        if body.len() > MAX_PSBT_BYTES {
            return Err(WalletError::InvalidPsbt(format!(
                "{} bytes exceeds limit of {MAX_PSBT_BYTES}",
                body.len()
            )));
        }
        let config = bincode::config::standard().with_limit::<MAX_PSBT_BYTES>();
        let (psbt, read): (Psbt, usize) = bincode::decode_from_slice(body, config)
            .map_err(|e| WalletError::InvalidPsbt(e.to_string()))?;
        if read != body.len() {
            return Err(WalletError::InvalidPsbt(format!(
                "{} trailing bytes",
                body.len() - read
            )));
        }
        psbt.validate()?;
        Ok(psbt)
    }

    pub fn to_hex(&self) -> Result<String, WalletError> {
        Ok(hex::encode(self.to_bytes()?))
    }

    pub fn from_hex(s: &str) -> Result<Self, WalletError> {
        let bytes = hex::decode(s.trim()).map_err(|e| WalletError::InvalidPsbt(format!("hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Same unsigned transaction, fee, change slot and signing contexts.
    fn same_draft(&self, other: &Psbt) -> bool {
        self.tx == other.tx
            && self.fee == other.fee
            && self.change_index == other.change_index
            && self.inputs.len() == other.inputs.len()
            && self
                .inputs
                .iter()
                .zip(&other.inputs)
                .all(|(a, b)| a.utxo == b.utxo && a.policy == b.policy)
    }

    fn validate(&self) -> Result<(), WalletError> {
        let invalid = |msg: String| Err(WalletError::InvalidPsbt(msg));

        self.tx.check_structure()?;
        if self.tx != self.tx.stripped() {
            return invalid("unsigned transaction carries witnesses".into());
        }
        if self.inputs.len() != self.tx.inputs.len() {
            return invalid(format!(
                "{} signing contexts for {} inputs",
                self.inputs.len(),
                self.tx.inputs.len()
            ));
        }
        for (index, input) in self.inputs.iter().enumerate() {
            match (&input.utxo.lock, &input.policy) {
                (Lock::PubkeyHash(_), None) => {}
                (Lock::PolicyHash(hash), Some(policy)) if policy.hash() == *hash => {}
                _ => return invalid(format!("input {index}: policy does not match lock")),
            }
            if let Some(pk) = input.partial_sigs.keys().find(|pk| !input.accepts_key(pk)) {
                return invalid(format!("input {index}: signature from unrelated key {}", hex::encode(pk)));
            }
        }
        if let Some(ci) = self.change_index() {
            if ci >= self.tx.outputs.len() {
                return invalid(format!("change index {ci} out of range"));
            }
        }

        let inputs_total = self
            .inputs
            .iter()
            .try_fold(0u64, |acc, i| acc.checked_add(i.utxo.value));
        let outputs_total = self.tx.total_output_value();
        match (inputs_total, outputs_total) {
            (Some(i), Some(o)) if i.checked_sub(o) == Some(self.fee) => Ok(()),
            _ => invalid("fee does not equal inputs minus outputs".into()),
        }
    }
}
