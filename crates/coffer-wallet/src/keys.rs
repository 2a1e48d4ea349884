//! Seed management and deterministic key derivation.
//!
//! Uses BLAKE3 keyed derivation to produce Ed25519 keypairs from a 32-byte
//! master seed. Child keys are pure functions of `(seed, index)`, so a
//! keychain needs no mutable cache and can be shared behind a read lock.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use coffer_core::address::{Address, Network};
use coffer_core::crypto::{KeyPair, PublicKey};

use crate::error::WalletError;

/// BLAKE3 KDF context for child key derivation.
const KDF_CONTEXT: &str = "coffer-wallet-key-derivation-v1";

/// A 32-byte master seed for deterministic key derivation.
///
/// Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Seed {
    bytes: [u8; 32],
}

impl Seed {
    /// Generate a random seed from the OS cryptographic RNG.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Get the raw seed bytes. Handle with care.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl Clone for Seed {
    fn clone(&self) -> Self {
        Self { bytes: self.bytes }
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seed").field("bytes", &"[REDACTED]").finish()
    }
}

/// Deterministic key derivation chain from a master seed.
#[derive(Clone)]
pub struct KeyChain {
    seed: Seed,
    network: Network,
}

impl KeyChain {
    pub fn new(seed: Seed, network: Network) -> Self {
        Self { seed, network }
    }

    /// Derive the keypair for a child index.
    pub fn keypair_at(&self, index: u32) -> KeyPair {
        let mut ikm = [0u8; 36];
        ikm[..32].copy_from_slice(self.seed.as_bytes());
        ikm[32..].copy_from_slice(&index.to_le_bytes());
        let mut derived = blake3::derive_key(KDF_CONTEXT, &ikm);
        ikm.zeroize();
        let kp = KeyPair::from_secret_bytes(derived);
        derived.zeroize();
        kp
    }

    pub fn public_key_at(&self, index: u32) -> PublicKey {
        self.keypair_at(index).public_key()
    }

    pub fn address_at(&self, index: u32) -> Address {
        Address::from_public_key(&self.public_key_at(index), self.network)
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub(crate) fn seed(&self) -> &Seed {
        &self.seed
    }
}

impl fmt::Debug for KeyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyChain")
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

/// Serializable form of the keychain's secret material.
#[derive(Serialize, Deserialize, Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyChainData {
    #[serde(with = "hex")]
    seed: [u8; 32],
    #[zeroize(skip)]
    network: Network,
}

impl KeyChainData {
    pub fn from_keychain(keychain: &KeyChain) -> Self {
        Self {
            seed: *keychain.seed().as_bytes(),
            network: keychain.network(),
        }
    }

    pub fn to_keychain(&self) -> KeyChain {
        KeyChain::new(Seed::from_bytes(self.seed), self.network)
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn to_json(&self) -> Result<zeroize::Zeroizing<Vec<u8>>, WalletError> {
        serde_json::to_vec(self)
            .map(zeroize::Zeroizing::new)
            .map_err(|e| WalletError::Serialization(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, WalletError> {
        serde_json::from_slice(bytes).map_err(|e| WalletError::CorruptedFile(format!("key material: {e}")))
    }
}

impl fmt::Debug for KeyChainData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyChainData")
            .field("seed", &"[REDACTED]")
            .field("network", &self.network)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_generate_unique() {
        assert_ne!(Seed::generate().as_bytes(), Seed::generate().as_bytes());
    }

    #[test]
    fn seed_debug_hides_bytes() {
        let seed = Seed::from_bytes([0xAB; 32]);
        let debug = format!("{seed:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("ab"));
    }

    #[test]
    fn derive_deterministic() {
        let kc = KeyChain::new(Seed::from_bytes([1u8; 32]), Network::Testnet);
        assert_eq!(kc.public_key_at(0), kc.keypair_at(0).public_key());
        assert_eq!(kc.public_key_at(7), kc.clone().public_key_at(7));
    }

    #[test]
    fn derive_unique_per_index_and_seed() {
        let a = KeyChain::new(Seed::from_bytes([1u8; 32]), Network::Testnet);
        let b = KeyChain::new(Seed::from_bytes([2u8; 32]), Network::Testnet);
        assert_ne!(a.public_key_at(0), a.public_key_at(1));
        assert_ne!(a.public_key_at(0), b.public_key_at(0));
    }

    #[test]
    fn address_matches_network() {
        let kc = KeyChain::new(Seed::from_bytes([4u8; 32]), Network::Mainnet);
        let addr = kc.address_at(5);
        assert_eq!(addr.network(), Network::Mainnet);
        assert_eq!(addr.lock(), kc.public_key_at(5).lock());
    }

    #[test]
    fn keychain_data_json_round_trip() {
        let kc = KeyChain::new(Seed::from_bytes([8u8; 32]), Network::Testnet);
        let json = KeyChainData::from_keychain(&kc).to_json().unwrap();
        let text = std::str::from_utf8(&json).unwrap();
        assert!(text.contains(&hex::encode([8u8; 32])));
        let restored = KeyChainData::from_json(&json).unwrap().to_keychain();
        assert_eq!(restored.public_key_at(3), kc.public_key_at(3));
        assert_eq!(restored.network(), Network::Testnet);
    }

    #[test]
    fn keychain_data_rejects_garbage() {
        assert!(matches!(
            KeyChainData::from_json(b"{not json").unwrap_err(),
            WalletError::CorruptedFile(_)
        ));
    }

    #[test]
    fn debug_formats_redact() {
        let kc = KeyChain::new(Seed::from_bytes([10u8; 32]), Network::Mainnet);
        assert!(format!("{kc:?}").contains("Mainnet"));
        let data = KeyChainData::from_keychain(&kc);
        assert!(!format!("{data:?}").contains(&hex::encode([10u8; 32])));
    }
}
