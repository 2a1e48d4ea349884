//! Passphrase-protected vault for wallet key material.
//!
//! Two-level scheme:
//! - A random 256-bit master key encrypts the key material (AES-256-GCM).
//! - The master key is wrapped by a key-encryption key (KEK) derived from
//!   the passphrase with Argon2id.
//!
//! Changing the passphrase only re-wraps the master key. A BLAKE3 check
//! value of the KEK is compared in constant time, so a wrong passphrase is
//! reported without attempting decryption.
//!
//! # Sealed blob format
//! ```text
//! nonce (12 bytes) || ciphertext + auth_tag
//! ```

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::WalletError;

/// BLAKE3 KDF context for the KEK check value.
const KEK_CHECK_CONTEXT: &str = "coffer-wallet-kek-check-v1";

/// Salt length in bytes.
const SALT_LEN: usize = 16;

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
const TAG_LEN: usize = 16;

/// Argon2id cost parameters, persisted alongside the vault.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub m_cost: u32,
    /// Iterations.
    pub t_cost: u32,
    /// Parallelism.
    pub p_cost: u32,
}

impl KdfParams {
    /// Minimal cost, for tests and throwaway wallets only.
    pub const fn light() -> Self {
        Self {
            m_cost: 8,
            t_cost: 1,
            p_cost: 1,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: Params::DEFAULT_M_COST,
            t_cost: Params::DEFAULT_T_COST,
            p_cost: Params::DEFAULT_P_COST,
        }
    }
}

/// Encrypted key material plus everything needed to re-derive its key.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Vault {
    #[serde(with = "hex")]
    salt: [u8; SALT_LEN],
    kdf: KdfParams,
    #[serde(with = "hex")]
    kek_check: [u8; 32],
    /// Master key sealed under the KEK.
    #[serde(with = "hex")]
    wrapped_key: Vec<u8>,
    /// Key material sealed under the master key.
    #[serde(with = "hex")]
    ciphertext: Vec<u8>,
}

impl Vault {
    /// Encrypt `plaintext` under a fresh master key wrapped by `passphrase`.
    pub fn seal(plaintext: &[u8], passphrase: &[u8], kdf: KdfParams) -> Result<Self, WalletError> {
        if passphrase.is_empty() {
            return Err(WalletError::EmptyPassphrase);
        }
        let mut master = Zeroizing::new([0u8; 32]);
        rand::rngs::OsRng.fill_bytes(master.as_mut_slice());

        let ciphertext = seal_with_key(&master, plaintext)?;
        let (salt, kek_check, wrapped_key) = wrap_master_key(&master, passphrase, kdf)?;
        Ok(Self {
            salt,
            kdf,
            kek_check,
            wrapped_key,
            ciphertext,
        })
    }

    /// Decrypt the key material. Fails with [`WalletError::WrongPassphrase`]
    /// on a passphrase mismatch.
    pub fn open(&self, passphrase: &[u8]) -> Result<Zeroizing<Vec<u8>>, WalletError> {
        let master = self.unwrap_master_key(passphrase)?;
        open_with_key(&master, &self.ciphertext)
    }

    /// Re-wrap the master key under `new`, with a fresh salt.
    pub fn rewrap(&self, old: &[u8], new: &[u8]) -> Result<Self, WalletError> {
        if new.is_empty() {
            return Err(WalletError::EmptyPassphrase);
        }
        let master = self.unwrap_master_key(old)?;
        let (salt, kek_check, wrapped_key) = wrap_master_key(&master, new, self.kdf)?;
        Ok(Self {
            salt,
            kdf: self.kdf,
            kek_check,
            wrapped_key,
            ciphertext: self.ciphertext.clone(),
        })
    }

    pub fn kdf_params(&self) -> KdfParams {
        self.kdf
    }

    fn unwrap_master_key(&self, passphrase: &[u8]) -> Result<Zeroizing<[u8; 32]>, WalletError> {
        let kek = derive_kek(passphrase, &self.salt, self.kdf)?;
        let check = kek_check(&kek);
        if !bool::from(check.ct_eq(&self.kek_check)) {
            return Err(WalletError::WrongPassphrase);
        }
        let bytes = open_with_key(&kek, &self.wrapped_key)?;
        let master: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| WalletError::CorruptedFile("wrapped key has wrong length".into()))?;
        Ok(Zeroizing::new(master))
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("kdf", &self.kdf)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

/// Derive a 256-bit KEK from a passphrase with Argon2id.
pub fn derive_kek(
    passphrase: &[u8],
    salt: &[u8],
    kdf: KdfParams,
) -> Result<Zeroizing<[u8; 32]>, WalletError> {
    let params = Params::new(kdf.m_cost, kdf.t_cost, kdf.p_cost, Some(32))
        .map_err(|e| WalletError::Encryption(format!("argon2 params: {e}")))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; 32]);
    argon
        .hash_password_into(passphrase, salt, key.as_mut_slice())
        .map_err(|e| WalletError::Encryption(format!("argon2: {e}")))?;
    Ok(key)
}

fn kek_check(kek: &[u8; 32]) -> [u8; 32] {
    blake3::derive_key(KEK_CHECK_CONTEXT, kek)
}

fn wrap_master_key(
    master: &[u8; 32],
    passphrase: &[u8],
    kdf: KdfParams,
) -> Result<([u8; SALT_LEN], [u8; 32], Vec<u8>), WalletError> {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let kek = derive_kek(passphrase, &salt, kdf)?;
    let wrapped = seal_with_key(&kek, master)?;
    Ok((salt, kek_check(&kek), wrapped))
}

/// Encrypt with AES-256-GCM under a random nonce: `nonce || ciphertext+tag`.
pub fn seal_with_key(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, WalletError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| WalletError::Encryption(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| WalletError::Encryption(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt a blob produced by [`seal_with_key`].
pub fn open_with_key(key: &[u8; 32], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, WalletError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(WalletError::CorruptedFile(format!(
            "sealed data too short: {} < {}",
            sealed.len(),
            NONCE_LEN + TAG_LEN
        )));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| WalletError::Decryption(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| WalletError::Decryption("authentication failed".into()))
}
