//! Key custody: who may sign, and when.
//!
//! The custody is exactly one of three states, so "unencrypted but locked"
//! cannot be represented. Every signature is produced under a read guard on
//! the state, and every transition takes the write guard, so [`KeyCustody::lock`]
//! waits for in-flight signatures and none can start after it returns.
//!
//! Lock order is always `state` then `pool`.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use coffer_core::crypto::{pubkey_hash, sign_input};
use coffer_core::types::{Hash256, KeySignature, Transaction, TxOutput};

use crate::encryption::{KdfParams, Vault};
use crate::error::WalletError;
use crate::keys::{KeyChain, KeyChainData};
use crate::psbt::Signer;

enum CustodyState {
    Unencrypted {
        keychain: KeyChain,
    },
    Locked {
        vault: Vault,
    },
    Unlocked {
        vault: Vault,
        keychain: KeyChain,
        expires_at: Option<Instant>,
    },
}

impl CustodyState {
    /// Key material usable for signing at `now`, if any.
    fn usable_keychain(&self, now: Instant) -> Option<&KeyChain> {
        match self {
            CustodyState::Unencrypted { keychain } => Some(keychain),
            CustodyState::Unlocked {
                keychain,
                expires_at,
                ..
            } if !is_expired(*expires_at, now) => Some(keychain),
            _ => None,
        }
    }

    fn vault(&self) -> Option<&Vault> {
        match self {
            CustodyState::Unencrypted { .. } => None,
            CustodyState::Locked { vault } | CustodyState::Unlocked { vault, .. } => Some(vault),
        }
    }
}

fn is_expired(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.is_some_and(|at| now >= at)
}

/// Externally visible custody state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustodyStatus {
    Unencrypted,
    Locked,
    /// `None` means unlocked until an explicit [`KeyCustody::lock`].
    Unlocked { unlocked_until: Option<Instant> },
}

impl CustodyStatus {
    pub fn can_sign(&self) -> bool {
        !matches!(self, CustodyStatus::Locked)
    }
}

impl fmt::Display for CustodyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustodyStatus::Unencrypted => write!(f, "unencrypted"),
            CustodyStatus::Locked => write!(f, "locked"),
            CustodyStatus::Unlocked { unlocked_until: None } => write!(f, "unlocked"),
            CustodyStatus::Unlocked {
                unlocked_until: Some(at),
            } => write!(
                f,
                "unlocked for {}s",
                at.saturating_duration_since(Instant::now()).as_secs()
            ),
        }
    }
}

/// Persisted custody: plaintext key material, or the vault holding it.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CustodyRecord {
    Plain { keychain: KeyChainData },
    Encrypted { vault: Vault },
}

/// A pre-derived public key and its derivation index.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolKey {
    pub index: u32,
    #[serde(with = "hex")]
    pub public_key: [u8; 32],
}

/// Persisted keypool.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct KeypoolRecord {
    pub next_index: u32,
    pub reserve: Vec<PoolKey>,
    pub issued: Vec<PoolKey>,
}

/// Public keys derived ahead of time, so addresses can be issued while locked.
#[derive(Debug)]
struct Keypool {
    next_index: u32,
    reserve: VecDeque<PoolKey>,
    issued: Vec<PoolKey>,
    by_key: HashMap<[u8; 32], u32>,
    by_hash: HashMap<Hash256, [u8; 32]>,
    target: usize,
}

impl Keypool {
    fn new(target: usize) -> Self {
        Self {
            next_index: 0,
            reserve: VecDeque::new(),
            issued: Vec::new(),
            by_key: HashMap::new(),
            by_hash: HashMap::new(),
            target: target.max(1),
        }
    }

    fn from_record(record: KeypoolRecord, target: usize) -> Self {
        let mut pool = Self::new(target);
        pool.next_index = record.next_index;
        for key in record.issued {
            pool.index(key);
            pool.issued.push(key);
        }
        for key in record.reserve {
            pool.index(key);
            pool.reserve.push_back(key);
        }
        pool
    }

    fn to_record(&self) -> KeypoolRecord {
        KeypoolRecord {
            next_index: self.next_index,
            reserve: self.reserve.iter().copied().collect(),
            issued: self.issued.clone(),
        }
    }

    fn index(&mut self, key: PoolKey) {
        self.by_key.insert(key.public_key, key.index);
        self.by_hash.insert(pubkey_hash(&key.public_key), key.public_key);
    }

    /// Derive keys until the reserve holds `target` entries.
    fn top_up(&mut self, keychain: &KeyChain) -> usize {
        let mut added = 0;
        while self.reserve.len() < self.target {
            let key = PoolKey {
                index: self.next_index,
                public_key: keychain.public_key_at(self.next_index).to_bytes(),
            };
            self.index(key);
            self.reserve.push_back(key);
            self.next_index += 1;
            added += 1;
        }
        if added > 0 {
            tracing::debug!(added, next_index = self.next_index, "keypool topped up");
        }
        added
    }

    fn pop(&mut self) -> Option<PoolKey> {
        let key = self.reserve.pop_front()?;
        self.issued.push(key);
        Some(key)
    }
}

/// Guards the wallet's signing keys.
pub struct KeyCustody {
    state: RwLock<CustodyState>,
    pool: Mutex<Keypool>,
    kdf: KdfParams,
}

impl KeyCustody {
    /// Unencrypted custody over `keychain`, with a filled keypool.
    pub fn new(keychain: KeyChain, keypool_size: usize, kdf: KdfParams) -> Self {
        let mut pool = Keypool::new(keypool_size);
        pool.top_up(&keychain);
        Self {
            state: RwLock::new(CustodyState::Unencrypted { keychain }),
            pool: Mutex::new(pool),
            kdf,
        }
    }

    /// Restore from persisted records. Encrypted custody comes back locked.
    pub fn from_record(
        record: CustodyRecord,
        keypool: KeypoolRecord,
        keypool_size: usize,
        kdf: KdfParams,
    ) -> Self {
        let mut pool = Keypool::from_record(keypool, keypool_size);
        let state = match record {
            CustodyRecord::Plain { keychain } => {
                let keychain = keychain.to_keychain();
                pool.top_up(&keychain);
                CustodyState::Unencrypted { keychain }
            }
            CustodyRecord::Encrypted { vault } => CustodyState::Locked { vault },
        };
        Self {
            state: RwLock::new(state),
            pool: Mutex::new(pool),
            kdf,
        }
    }

    pub fn to_record(&self) -> (CustodyRecord, KeypoolRecord) {
        let state = self.state.read();
        let record = match &*state {
            CustodyState::Unencrypted { keychain } => CustodyRecord::Plain {
                keychain: KeyChainData::from_keychain(keychain),
            },
            CustodyState::Locked { vault } | CustodyState::Unlocked { vault, .. } => {
                CustodyRecord::Encrypted { vault: vault.clone() }
            }
        };
        let pool = self.pool.lock().to_record();
        (record, pool)
    }

    /// Unencrypted → Locked.
    pub fn encrypt(&self, passphrase: &[u8]) -> Result<(), WalletError> {
        let mut state = self.state.write();
        let CustodyState::Unencrypted { keychain } = &*state else {
            return Err(WalletError::AlreadyEncrypted);
        };
        let material = KeyChainData::from_keychain(keychain).to_json()?;
        let vault = Vault::seal(&material, passphrase, self.kdf)?;
        *state = CustodyState::Locked { vault };
        tracing::info!("wallet encrypted and locked");
        Ok(())
    }

    /// Locked → Unlocked, optionally until `timeout` elapses.
    ///
    /// Unlocking an already unlocked wallet re-checks the passphrase and
    /// replaces the expiry.
    pub fn unlock(&self, passphrase: &[u8], timeout: Option<Duration>) -> Result<(), WalletError> {
        let mut state = self.state.write();
        let vault = state.vault().cloned().ok_or(WalletError::NotEncrypted)?;
        let material = match vault.open(passphrase) {
            Ok(material) => material,
            Err(WalletError::WrongPassphrase) => {
                tracing::warn!("unlock refused: wrong passphrase");
                return Err(WalletError::WrongPassphrase);
            }
            Err(e) => return Err(e),
        };
        let keychain = KeyChainData::from_json(&material)?.to_keychain();
        let expires_at = timeout.and_then(|d| Instant::now().checked_add(d));

        self.pool.lock().top_up(&keychain);
        *state = CustodyState::Unlocked {
            vault,
            keychain,
            expires_at,
        };
        tracing::info!(timeout_secs = ?timeout.map(|d| d.as_secs()), "wallet unlocked");
        Ok(())
    }

    /// Unlocked → Locked. Waits for in-flight signatures to finish.
    pub fn lock(&self) -> Result<(), WalletError> {
        let mut state = self.state.write();
        let vault = match &*state {
            CustodyState::Unencrypted { .. } => return Err(WalletError::NotEncrypted),
            CustodyState::Locked { .. } => return Ok(()),
            CustodyState::Unlocked { vault, .. } => vault.clone(),
        };
        *state = CustodyState::Locked { vault };
        tracing::info!("wallet locked");
        Ok(())
    }

    /// Re-wrap the key material under `new`. The lock state is kept.
    pub fn change_passphrase(&self, old: &[u8], new: &[u8]) -> Result<(), WalletError> {
        let mut state = self.state.write();
        let current = state.vault().ok_or(WalletError::NotEncrypted)?;
        let rewrapped = match current.rewrap(old, new) {
            Ok(vault) => vault,
            Err(WalletError::WrongPassphrase) => {
                tracing::warn!("passphrase change refused: wrong passphrase");
                return Err(WalletError::WrongPassphrase);
            }
            Err(e) => return Err(e),
        };
        match &mut *state {
            CustodyState::Locked { vault } | CustodyState::Unlocked { vault, .. } => *vault = rewrapped,
            CustodyState::Unencrypted { .. } => return Err(WalletError::NotEncrypted),
        }
        tracing::info!("wallet passphrase changed");
        Ok(())
    }

    /// Lock if a timed unlock has run out. Returns whether it did.
    pub fn relock_if_expired(&self) -> bool {
        let now = Instant::now();
        let expired = |state: &CustodyState| {
            matches!(state, CustodyState::Unlocked { expires_at, .. } if is_expired(*expires_at, now))
        };
        if !expired(&*self.state.read()) {
            return false;
        }
        let mut state = self.state.write();
        if !expired(&*state) {
            return false;
        }
        let CustodyState::Unlocked { vault, .. } = &*state else {
            return false;
        };
        *state = CustodyState::Locked { vault: vault.clone() };
        tracing::info!("unlock timeout elapsed, wallet locked");
        true
    }

    /// Current state, after enforcing any elapsed unlock timeout.
    pub fn status(&self) -> CustodyStatus {
        self.relock_if_expired();
        match &*self.state.read() {
            CustodyState::Unencrypted { .. } => CustodyStatus::Unencrypted,
            CustodyState::Locked { .. } => CustodyStatus::Locked,
            CustodyState::Unlocked { expires_at, .. } => CustodyStatus::Unlocked {
                unlocked_until: *expires_at,
            },
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.state.read().vault().is_some()
    }

    /// Issue the next public key from the keypool.
    ///
    /// Works while locked as long as the pool has reserve keys left.
    pub fn next_public_key(&self) -> Result<PoolKey, WalletError> {
        let state = self.state.read();
        let keychain = state.usable_keychain(Instant::now());
        let mut pool = self.pool.lock();
        if let Some(keychain) = keychain {
            pool.top_up(keychain);
        }
        let key = pool.pop().ok_or_else(|| {
            tracing::warn!("keypool exhausted while locked");
            WalletError::WalletLocked
        })?;
        if let Some(keychain) = keychain {
            pool.top_up(keychain);
        }
        Ok(key)
    }

    /// Whether `hash` belongs to a key this custody has derived.
    pub fn owns_pubkey_hash(&self, hash: &Hash256) -> bool {
        self.pool.lock().by_hash.contains_key(hash)
    }

    /// Keys handed out so far, in issue order.
    pub fn issued_keys(&self) -> Vec<PoolKey> {
        self.pool.lock().issued.clone()
    }

    pub fn keypool_reserve(&self) -> usize {
        self.pool.lock().reserve.len()
    }
}

impl Signer for KeyCustody {
    fn key_for_pubkey_hash(&self, hash: &Hash256) -> Option<[u8; 32]> {
        self.pool.lock().by_hash.get(hash).copied()
    }

    fn holds_key(&self, public_key: &[u8; 32]) -> bool {
        self.pool.lock().by_key.contains_key(public_key)
    }

    /// Checks the custody state and signs under one read guard, so a
    /// concurrent [`KeyCustody::lock`] either waits for this signature or
    /// causes it to be refused.
    fn sign_with(
        &self,
        public_key: &[u8; 32],
        tx: &Transaction,
        index: usize,
        spent: &TxOutput,
    ) -> Result<KeySignature, WalletError> {
        let state = self.state.read();
        let Some(keychain) = state.usable_keychain(Instant::now()) else {
            tracing::warn!(input = index, "signing refused: wallet locked");
            return Err(WalletError::WalletLocked);
        };
        let derivation = self
            .pool
            .lock()
            .by_key
            .get(public_key)
            .copied()
            .ok_or_else(|| WalletError::KeyNotFound(hex::encode(public_key)))?;
        let keypair = keychain.keypair_at(derivation);
        Ok(sign_input(tx, index, spent, &keypair)?)
    }
}

impl fmt::Debug for KeyCustody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCustody")
            .field("status", &self.status())
            .field("keypool_reserve", &self.keypool_reserve())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Seed;
    use coffer_core::address::Network;
    use coffer_core::constants::{CURRENT_TX_VERSION, SEQUENCE_FINAL};
    use coffer_core::crypto::verify_signature;
    use coffer_core::types::{Lock, OutPoint, TxInput, Witness};

    fn custody(pool: usize) -> KeyCustody {
        let kc = KeyChain::new(Seed::from_bytes([3u8; 32]), Network::Testnet);
        KeyCustody::new(kc, pool, KdfParams::light())
    }

    fn spend_of(key: &PoolKey) -> (Transaction, TxOutput) {
        let spent = TxOutput {
            value: 50_000,
            lock: Lock::PubkeyHash(pubkey_hash(&key.public_key)),
        };
        let tx = Transaction {
            version: CURRENT_TX_VERSION,
            inputs: vec![TxInput {
                previous_output: OutPoint::new(Hash256([9u8; 32]), 1),
                sequence: SEQUENCE_FINAL,
                witness: Witness::default(),
            }],
            outputs: vec![TxOutput {
                value: 48_000,
                lock: Lock::PubkeyHash(Hash256([0xEE; 32])),
            }],
            lock_time: 0,
        };
        (tx, spent)
    }

    #[test]
    fn unencrypted_signs() {
        let c = custody(3);
        assert_eq!(c.status(), CustodyStatus::Unencrypted);
        let key = c.next_public_key().unwrap();
        let (tx, spent) = spend_of(&key);
        let sig = c.sign_with(&key.public_key, &tx, 0, &spent).unwrap();
        verify_signature(&tx, 0, &spent, &sig).unwrap();
    }

    #[test]
    fn encrypt_locks_and_refuses_signing() {
        let c = custody(3);
        let key = c.next_public_key().unwrap();
        c.encrypt(b"pw").unwrap();
        assert_eq!(c.status(), CustodyStatus::Locked);
        let (tx, spent) = spend_of(&key);
        assert_eq!(
            c.sign_with(&key.public_key, &tx, 0, &spent).unwrap_err(),
            WalletError::WalletLocked
        );
        assert_eq!(c.encrypt(b"pw").unwrap_err(), WalletError::AlreadyEncrypted);
    }

    #[test]
    fn empty_passphrase_keeps_unencrypted() {
        let c = custody(1);
        assert_eq!(c.encrypt(b"").unwrap_err(), WalletError::EmptyPassphrase);
        assert_eq!(c.status(), CustodyStatus::Unencrypted);
    }

    #[test]
    fn wrong_passphrase_three_times_stays_locked() {
        let c = custody(1);
        c.encrypt(b"right").unwrap();
        for _ in 0..3 {
            assert_eq!(c.unlock(b"wrong", None).unwrap_err(), WalletError::WrongPassphrase);
            assert_eq!(c.status(), CustodyStatus::Locked);
        }
    }

    #[test]
    fn unlock_sign_lock_cycle() {
        let c = custody(2);
        let key = c.next_public_key().unwrap();
        c.encrypt(b"pw").unwrap();
        c.unlock(b"pw", None).unwrap();
        assert_eq!(c.status(), CustodyStatus::Unlocked { unlocked_until: None });

        let (tx, spent) = spend_of(&key);
        assert!(c.sign_with(&key.public_key, &tx, 0, &spent).is_ok());

        c.lock().unwrap();
        c.lock().unwrap();
        assert_eq!(c.status(), CustodyStatus::Locked);
        assert_eq!(
            c.sign_with(&key.public_key, &tx, 0, &spent).unwrap_err(),
            WalletError::WalletLocked
        );
    }

    #[test]
    fn transitions_require_encryption() {
        let c = custody(1);
        assert_eq!(c.unlock(b"pw", None).unwrap_err(), WalletError::NotEncrypted);
        assert_eq!(c.lock().unwrap_err(), WalletError::NotEncrypted);
        assert_eq!(c.change_passphrase(b"a", b"b").unwrap_err(), WalletError::NotEncrypted);
    }

    #[test]
    fn zero_timeout_expires_immediately() {
        let c = custody(1);
        let key = c.next_public_key().unwrap();
        c.encrypt(b"pw").unwrap();
        c.unlock(b"pw", Some(Duration::ZERO)).unwrap();

        let (tx, spent) = spend_of(&key);
        assert_eq!(
            c.sign_with(&key.public_key, &tx, 0, &spent).unwrap_err(),
            WalletError::WalletLocked
        );
        assert!(c.relock_if_expired());
        assert!(!c.relock_if_expired());
        assert_eq!(c.status(), CustodyStatus::Locked);
    }

    #[test]
    fn long_timeout_reports_deadline() {
        let c = custody(1);
        c.encrypt(b"pw").unwrap();
        c.unlock(b"pw", Some(Duration::from_secs(3600))).unwrap();
        match c.status() {
            CustodyStatus::Unlocked { unlocked_until: Some(at) } => assert!(at > Instant::now()),
            other => panic!("unexpected status {other:?}"),
        }
        assert!(!c.relock_if_expired());
    }

    #[test]
    fn change_passphrase_preserves_state() {
        let c = custody(1);
        c.encrypt(b"old").unwrap();
        assert_eq!(c.change_passphrase(b"bad", b"new").unwrap_err(), WalletError::WrongPassphrase);

        c.unlock(b"old", None).unwrap();
        c.change_passphrase(b"old", b"new").unwrap();
        assert!(c.status().can_sign());

        c.lock().unwrap();
        assert_eq!(c.unlock(b"old", None).unwrap_err(), WalletError::WrongPassphrase);
        c.unlock(b"new", None).unwrap();
    }

    #[test]
    fn keypool_serves_locked_wallet_until_exhausted() {
        let c = custody(2);
        c.encrypt(b"pw").unwrap();
        let a = c.next_public_key().unwrap();
        let b = c.next_public_key().unwrap();
        assert_ne!(a.public_key, b.public_key);
        assert_eq!(c.next_public_key().unwrap_err(), WalletError::WalletLocked);

        c.unlock(b"pw", None).unwrap();
        assert_eq!(c.keypool_reserve(), 2);
        let d = c.next_public_key().unwrap();
        assert_eq!(d.index, 2);
        assert!(c.owns_pubkey_hash(&pubkey_hash(&d.public_key)));
    }

    #[test]
    fn issued_keys_match_derivation() {
        let c = custody(2);
        let kc = KeyChain::new(Seed::from_bytes([3u8; 32]), Network::Testnet);
        for i in 0..5u32 {
            let key = c.next_public_key().unwrap();
            assert_eq!(key.index, i);
            assert_eq!(key.public_key, kc.public_key_at(i).to_bytes());
        }
        assert_eq!(c.issued_keys().len(), 5);
    }

    #[test]
    fn encrypted_record_restores_locked() {
        let c = custody(2);
        let key = c.next_public_key().unwrap();
        c.encrypt(b"pw").unwrap();
        let (record, pool) = c.to_record();
        assert!(matches!(record, CustodyRecord::Encrypted { .. }));

        let json = serde_json::to_string(&record).unwrap();
        let record: CustodyRecord = serde_json::from_str(&json).unwrap();
        let restored = KeyCustody::from_record(record, pool, 2, KdfParams::light());
        assert_eq!(restored.status(), CustodyStatus::Locked);
        assert!(restored.holds_key(&key.public_key));

        restored.unlock(b"pw", None).unwrap();
        let (tx, spent) = spend_of(&key);
        assert!(restored.sign_with(&key.public_key, &tx, 0, &spent).is_ok());
    }

    #[test]
    fn plain_record_restores_unencrypted() {
        let c = custody(2);
        c.next_public_key().unwrap();
        let (record, pool) = c.to_record();
        let restored = KeyCustody::from_record(record, pool.clone(), 2, KdfParams::light());
        assert_eq!(restored.status(), CustodyStatus::Unencrypted);
        assert_eq!(restored.to_record().1, pool);
    }

    #[test]
    fn debug_does_not_leak() {
        let c = custody(1);
        let text = format!("{c:?}");
        assert!(text.contains("Unencrypted"));
        assert!(!text.contains(&hex::encode([3u8; 32])));
    }
}
