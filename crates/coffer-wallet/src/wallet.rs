//! Wallet composition: ledger, custody, selection, building and PSBTs.
//!
//! The [`Wallet`] is the entry point for front ends. Chain sync feeds the
//! shared [`UtxoLedger`] through [`Wallet::ledger`]; payments are drafted
//! against a ledger snapshot and leave the wallet as hex-encoded PSBTs.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use coffer_core::address::{Address, Network};
use coffer_core::crypto::pubkey_hash;
use coffer_core::policy::MultisigPolicy;
use coffer_core::types::{Lock, OutPoint, Transaction};
use zeroize::Zeroizing;

use crate::builder::{AddressOwnership, ChangeDestination, DraftTransaction, Recipient, TransactionBuilder};
use crate::coin_selection::{CoinSelector, SelectionMode, SelectionRequest};
use crate::config::WalletConfig;
use crate::custody::{CustodyRecord, CustodyStatus, KeyCustody, KeypoolRecord};
use crate::error::WalletError;
use crate::fee::FeeRate;
use crate::keys::{KeyChain, Seed};
use crate::ledger::{Balance, UnspentOutput, UtxoLedger};
use crate::psbt::{ExternalSigner, Psbt};

/// Magic identifying a Coffer wallet file.
pub const WALLET_MAGIC: &str = "COFW";

/// Current wallet file format version.
pub const WALLET_VERSION: u32 = 1;

/// Wallet file header serialized as JSON.
#[derive(Serialize, Deserialize)]
struct WalletFileHeader {
    magic: String,
    version: u32,
}

/// Wallet file body serialized as JSON.
#[derive(Serialize, Deserialize)]
struct WalletFileBody {
    network: Network,
    custody: CustodyRecord,
    keypool: KeypoolRecord,
    policies: Vec<MultisigPolicy>,
    utxos: Vec<UnspentOutput>,
}

/// A payment the user wants to make.
#[derive(Debug, Clone, Default)]
pub struct PaymentRequest {
    pub recipients: Vec<Recipient>,
    /// Requested fee rate; the configured default when `None`.
    pub fee_rate: Option<FeeRate>,
    pub mode: SelectionMode,
    /// Change destination; a fresh keypool address when `None`.
    pub change: Option<ChangeDestination>,
}

impl PaymentRequest {
    pub fn new(recipients: Vec<Recipient>) -> Self {
        Self {
            recipients,
            ..Self::default()
        }
    }

    pub fn with_fee_rate(mut self, rate: FeeRate) -> Self {
        self.fee_rate = Some(rate);
        self
    }

    /// Spend exactly these outputs (coin control).
    pub fn with_coins(mut self, coins: Vec<OutPoint>) -> Self {
        self.mode = SelectionMode::Manual(coins);
        self
    }

    pub fn with_change(mut self, change: ChangeDestination) -> Self {
        self.change = Some(change);
        self
    }
}

/// A wallet: configuration, UTXO ledger, key custody and known policies.
pub struct Wallet {
    config: WalletConfig,
    ledger: Arc<UtxoLedger>,
    custody: KeyCustody,
    policies: RwLock<Vec<MultisigPolicy>>,
}

impl Wallet {
    /// Create a new wallet with a random seed.
    pub fn create(config: WalletConfig) -> Self {
        Self::from_seed(Seed::generate(), config)
    }

    /// Create a wallet from an existing seed (deterministic recovery).
    pub fn from_seed(seed: Seed, config: WalletConfig) -> Self {
        let keychain = KeyChain::new(seed, config.network);
        let custody = KeyCustody::new(keychain, config.keypool_size, config.kdf);
        tracing::info!(network = %config.network, "wallet created");
        Self {
            config,
            ledger: Arc::new(UtxoLedger::new()),
            custody,
            policies: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn network(&self) -> Network {
        self.config.network
    }

    /// The ledger, shared with the chain-sync collaborator.
    pub fn ledger(&self) -> &Arc<UtxoLedger> {
        &self.ledger
    }

    pub fn custody(&self) -> &KeyCustody {
        &self.custody
    }

    /// Balance at the configured confirmation depth.
    pub fn balance(&self) -> Balance {
        self.ledger.balance(self.config.min_confirmations)
    }

    /// Issue a fresh receive address from the keypool.
    pub fn next_address(&self) -> Result<Address, WalletError> {
        let key = self.custody.next_public_key()?;
        Ok(Address::from_pubkey_hash(pubkey_hash(&key.public_key), self.network()))
    }

    /// Track a multisig policy this wallet participates in.
    pub fn register_policy(&self, policy: MultisigPolicy) -> Address {
        let address = Address::from_policy(&policy, self.network());
        let mut policies = self.policies.write();
        if !policies.contains(&policy) {
            tracing::info!(%address, threshold = policy.threshold(), keys = policy.keys().len(), "policy registered");
            policies.push(policy);
        }
        address
    }

    pub fn policies(&self) -> Vec<MultisigPolicy> {
        self.policies.read().clone()
    }

    /// Select coins and build a draft paying `request.recipients`.
    ///
    /// Nothing is signed and the ledger is not touched. A change address is
    /// drawn from the keypool only once the draft has passed every check
    /// that does not involve the change destination.
    pub fn request_payment(&self, request: &PaymentRequest) -> Result<DraftTransaction, WalletError> {
        let fee_policy = self.config.fee_policy();
        let rate = fee_policy.effective_rate(request.fee_rate.unwrap_or(self.config.default_fee_rate));
        let mut builder = TransactionBuilder::new(self.network())
            .fee_policy(fee_policy)
            .change_position(self.config.change_position());
        let target = builder.validate_recipients(&request.recipients, rate)?;

        let snapshot = self.ledger.snapshot();
        let available: Vec<UnspentOutput> = snapshot.iter().cloned().collect();
        let selection = CoinSelector::new(self.config.selection_policy()).select(
            &SelectionRequest {
                target,
                fee_rate: rate,
                recipient_count: request.recipients.len(),
                mode: request.mode.clone(),
            },
            &available,
        )?;

        builder.check_selection(&selection, &request.recipients)?;
        if selection.has_change() {
            let destination = match &request.change {
                Some(destination) => destination.clone(),
                None => ChangeDestination::Wallet(self.next_address()?),
            };
            builder = builder.change_destination(destination);
        }
        let draft = builder.build(&selection, &request.recipients, self)?;
        tracing::info!(
            txid = %draft.txid(),
            fee = draft.fee(),
            rate = %rate,
            inputs = draft.tx().inputs.len(),
            "payment drafted"
        );
        Ok(draft)
    }

    /// Serialize a draft for signing.
    pub fn export_psbt(&self, draft: &DraftTransaction) -> Result<String, WalletError> {
        Psbt::from_draft(draft, &self.policies.read())?.to_hex()
    }

    /// Add this wallet's signatures to a PSBT.
    pub fn import_and_sign_psbt(&self, payload: &str) -> Result<String, WalletError> {
        let mut psbt = Psbt::from_hex(payload)?;
        self.custody.relock_if_expired();
        let added = psbt.sign(&self.custody)?;
        tracing::info!(txid = %psbt.tx().txid(), added, stage = ?psbt.stage(), "psbt signed");
        psbt.to_hex()
    }

    /// Have an external device sign a PSBT and merge what it returns.
    pub fn sign_with_external(&self, payload: &str, device: &dyn ExternalSigner) -> Result<String, WalletError> {
        let mut psbt = Psbt::from_hex(payload)?;
        let added = psbt.sign_external(device)?;
        tracing::info!(txid = %psbt.tx().txid(), added, stage = ?psbt.stage(), "psbt signed externally");
        psbt.to_hex()
    }

    pub fn combine_psbt(&self, a: &str, b: &str) -> Result<String, WalletError> {
        let mut psbt = Psbt::from_hex(a)?;
        psbt.combine(&Psbt::from_hex(b)?)?;
        psbt.to_hex()
    }

    /// Finalize a fully signed PSBT into a broadcastable transaction.
    pub fn finalize_psbt(&self, payload: &str) -> Result<Transaction, WalletError> {
        let mut psbt = Psbt::from_hex(payload)?;
        Ok(psbt.finalize()?.into_transaction())
    }

    pub fn encrypt(&self, passphrase: &[u8]) -> Result<(), WalletError> {
        self.custody.encrypt(passphrase)
    }

    pub fn unlock(&self, passphrase: &[u8], timeout: Option<Duration>) -> Result<(), WalletError> {
        self.custody.unlock(passphrase, timeout)
    }

    pub fn lock(&self) -> Result<(), WalletError> {
        self.custody.lock()
    }

    pub fn change_passphrase(&self, old: &[u8], new: &[u8]) -> Result<(), WalletError> {
        self.custody.change_passphrase(old, new)
    }

    pub fn custody_status(&self) -> CustodyStatus {
        self.custody.status()
    }

    /// Save to `path`.
    ///
    /// # File format
    /// ```text
    /// header_len (4 bytes LE) || header_json || body_json
    /// ```
    /// The body holds the custody record, keypool, policies and UTXO
    /// snapshot. Written to a temporary file, then renamed over `path`.
    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        let header = WalletFileHeader {
            magic: WALLET_MAGIC.to_string(),
            version: WALLET_VERSION,
        };
        let header_json =
            serde_json::to_vec(&header).map_err(|e| WalletError::Serialization(e.to_string()))?;

        let (custody, keypool) = self.custody.to_record();
        let body = WalletFileBody {
            network: self.network(),
            custody,
            keypool,
            policies: self.policies(),
            utxos: self.ledger.snapshot().iter().cloned().collect(),
        };
        let body_json = Zeroizing::new(
            serde_json::to_vec(&body).map_err(|e| WalletError::Serialization(e.to_string()))?,
        );

        let header_len = header_json.len() as u32;
        let mut file_data = Zeroizing::new(Vec::with_capacity(4 + header_json.len() + body_json.len()));
        file_data.extend_from_slice(&header_len.to_le_bytes());
        file_data.extend_from_slice(&header_json);
        file_data.extend_from_slice(&body_json);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = temp_path(path);
        std::fs::write(&tmp, file_data.as_slice())?;
        std::fs::rename(&tmp, path)?;
        tracing::debug!(path = %path.display(), utxos = body.utxos.len(), "wallet saved");
        Ok(())
    }

    /// Load from `path`. Encrypted wallets come back locked.
    pub fn load(path: &Path, config: WalletConfig) -> Result<Self, WalletError> {
        let file_data = Zeroizing::new(std::fs::read(path)?);

        let len_bytes: [u8; 4] = file_data
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| WalletError::CorruptedFile("file too short".into()))?;
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        let header_json = file_data
            .get(4..4 + header_len)
            .ok_or_else(|| WalletError::CorruptedFile("header truncated".into()))?;
        let header: WalletFileHeader = serde_json::from_slice(header_json)
            .map_err(|e| WalletError::CorruptedFile(format!("invalid header: {e}")))?;

        if header.magic != WALLET_MAGIC {
            return Err(WalletError::CorruptedFile("invalid magic bytes".into()));
        }
        if header.version != WALLET_VERSION {
            return Err(WalletError::CorruptedFile(format!(
                "unsupported version: {}",
                header.version
            )));
        }

        let body: WalletFileBody = serde_json::from_slice(&file_data[4 + header_len..])
            .map_err(|e| WalletError::CorruptedFile(format!("invalid body: {e}")))?;
        if body.network != config.network {
            return Err(WalletError::Config(format!(
                "wallet file is for {}, configured network is {}",
                body.network, config.network
            )));
        }
        if let CustodyRecord::Plain { keychain } = &body.custody {
            if keychain.network() != body.network {
                return Err(WalletError::CorruptedFile("key material network mismatch".into()));
            }
        }

        let ledger = UtxoLedger::from_outputs(body.utxos)?;
        let custody = KeyCustody::from_record(body.custody, body.keypool, config.keypool_size, config.kdf);
        tracing::info!(
            path = %path.display(),
            utxos = ledger.len(),
            encrypted = custody.is_encrypted(),
            "wallet loaded"
        );
        Ok(Self {
            config,
            ledger: Arc::new(ledger),
            custody,
            policies: RwLock::new(body.policies),
        })
    }
}

impl AddressOwnership for Wallet {
    fn is_mine(&self, address: &Address) -> bool {
        if address.network() != self.network() {
            return false;
        }
        match address.lock() {
            Lock::PubkeyHash(hash) => self.custody.owns_pubkey_hash(&hash),
            Lock::PolicyHash(hash) => self.policies.read().iter().any(|p| p.hash() == hash),
        }
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("network", &self.network())
            .field("custody", &self.custody_status())
            .field("utxos", &self.ledger.len())
            .field("policies", &self.policies.read().len())
            .finish()
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DraftStage;
    use crate::encryption::KdfParams;
    use crate::error::ValidationError;
    use coffer_core::crypto::verify_input;
    use coffer_core::types::Hash256;

    fn config(dir: &Path) -> WalletConfig {
        WalletConfig {
            data_dir: dir.to_path_buf(),
            keypool_size: 3,
            randomize_change_position: false,
            kdf: KdfParams::light(),
            ..WalletConfig::default()
        }
    }

    fn wallet(dir: &Path) -> Wallet {
        Wallet::from_seed(Seed::from_bytes([5u8; 32]), config(dir))
    }

    fn external() -> Address {
        Address::from_pubkey_hash(Hash256([0xAA; 32]), Network::Testnet)
    }

    fn fund(w: &Wallet, value: u64, tag: u8) -> OutPoint {
        let outpoint = OutPoint::new(Hash256([tag; 32]), 0);
        let address = w.next_address().unwrap();
        w.ledger()
            .apply_update(vec![UnspentOutput::new(outpoint, value, address, 6)], &[])
            .unwrap();
        outpoint
    }

    fn pay(amount: u64) -> PaymentRequest {
        PaymentRequest::new(vec![Recipient::new(external(), amount)]).with_fee_rate(FeeRate::from_per_byte(10))
    }

    #[test]
    fn payment_with_change() {
        let dir = tempfile::tempdir().unwrap();
        let w = wallet(dir.path());
        fund(&w, 60_000, 1);

        let draft = w.request_payment(&pay(50_000)).unwrap();
        assert_eq!(draft.fee(), 2_000);
        assert_eq!(draft.stage(), DraftStage::Drafted);
        let outputs = &draft.tx().outputs;
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].value, 50_000);
        assert_eq!(outputs[0].lock, external().lock());
        assert_eq!(draft.change_index(), Some(1));
        assert_eq!(draft.change_amount(), 8_000);
        assert!(w.is_mine(&Address::from_lock(outputs[1].lock, Network::Testnet)));
    }

    #[test]
    fn payment_short_by_fee_is_insufficient() {
        let dir = tempfile::tempdir().unwrap();
        let w = wallet(dir.path());
        fund(&w, 51_500, 1);
        let err = w.request_payment(&pay(50_000)).unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { have: 51_500, .. }));
    }

    #[test]
    fn invalid_recipients_rejected_before_selection() {
        let dir = tempfile::tempdir().unwrap();
        let w = wallet(dir.path());
        let dup = PaymentRequest::new(vec![
            Recipient::new(external(), 10_000),
            Recipient::new(external(), 20_000),
        ]);
        assert!(matches!(
            w.request_payment(&dup).unwrap_err(),
            WalletError::Validation(ValidationError::DuplicateRecipient(_))
        ));
        let zero = PaymentRequest::new(vec![Recipient::new(external(), 0)]);
        assert_eq!(
            w.request_payment(&zero).unwrap_err(),
            WalletError::Validation(ValidationError::ZeroAmount { index: 0 })
        );
    }

    #[test]
    fn rejected_payment_issues_no_change_key() {
        let dir = tempfile::tempdir().unwrap();
        let strict = WalletConfig {
            max_tx_fee: 1_000,
            ..config(dir.path())
        };
        let w = Wallet::from_seed(Seed::from_bytes([5u8; 32]), strict);
        fund(&w, 60_000, 1);
        let issued = w.custody().issued_keys();

        assert_eq!(
            w.request_payment(&pay(50_000)).unwrap_err(),
            WalletError::Validation(ValidationError::AbsurdFee { fee: 2_000, max: 1_000 })
        );
        assert_eq!(w.custody().issued_keys(), issued);
    }

    #[test]
    fn low_fee_rate_raised_to_floor() {
        let dir = tempfile::tempdir().unwrap();
        let w = wallet(dir.path());
        fund(&w, 60_000, 1);
        let request = pay(50_000).with_fee_rate(FeeRate::ZERO);
        let draft = w.request_payment(&request).unwrap();
        // 200 bytes at the 1000/kB floor
        assert_eq!(draft.fee(), 200);
    }

    #[test]
    fn sign_and_finalize_single_key() {
        let dir = tempfile::tempdir().unwrap();
        let w = wallet(dir.path());
        fund(&w, 60_000, 1);
        fund(&w, 30_000, 2);

        let draft = w.request_payment(&pay(80_000)).unwrap();
        let psbt = w.export_psbt(&draft).unwrap();
        let signed = w.import_and_sign_psbt(&psbt).unwrap();
        assert_eq!(w.import_and_sign_psbt(&signed).unwrap(), signed);

        let tx = w.finalize_psbt(&signed).unwrap();
        assert_eq!(tx.txid(), draft.txid());
        for (i, spent) in draft.spent_outputs().iter().enumerate() {
            verify_input(&tx, i, spent).unwrap();
        }
    }

    struct Hardware<'a>(&'a Wallet);

    impl ExternalSigner for Hardware<'_> {
        fn sign_psbt(&self, payload: &str) -> Result<String, WalletError> {
            self.0.import_and_sign_psbt(payload)
        }
    }

    #[test]
    fn external_device_signs_for_wallet() {
        let dir = tempfile::tempdir().unwrap();
        let w = wallet(dir.path());
        fund(&w, 60_000, 1);

        let draft = w.request_payment(&pay(50_000)).unwrap();
        let psbt = w.export_psbt(&draft).unwrap();
        let signed = w.sign_with_external(&psbt, &Hardware(&w)).unwrap();
        assert_eq!(w.finalize_psbt(&signed).unwrap().txid(), draft.txid());
    }

    #[test]
    fn locked_wallet_drafts_but_cannot_sign() {
        let dir = tempfile::tempdir().unwrap();
        let w = wallet(dir.path());
        fund(&w, 60_000, 1);
        w.encrypt(b"pw").unwrap();

        let draft = w.request_payment(&pay(50_000)).unwrap();
        let psbt = w.export_psbt(&draft).unwrap();
        assert_eq!(w.import_and_sign_psbt(&psbt).unwrap_err(), WalletError::WalletLocked);

        w.unlock(b"pw", None).unwrap();
        let signed = w.import_and_sign_psbt(&psbt).unwrap();
        w.lock().unwrap();
        assert!(w.finalize_psbt(&signed).is_ok());
    }

    #[test]
    fn finalize_unsigned_reports_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let w = wallet(dir.path());
        fund(&w, 60_000, 1);
        let psbt = w.export_psbt(&w.request_payment(&pay(50_000)).unwrap()).unwrap();
        assert_eq!(
            w.finalize_psbt(&psbt).unwrap_err(),
            WalletError::IncompleteSignatures { inputs: vec![0] }
        );
    }

    #[test]
    fn custom_change_requires_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let w = wallet(dir.path());
        fund(&w, 60_000, 1);
        let elsewhere = Address::from_pubkey_hash(Hash256([0xBB; 32]), Network::Testnet);
        let unconfirmed = pay(50_000).with_change(ChangeDestination::Custom {
            address: elsewhere,
            confirmed: false,
        });
        assert_eq!(
            w.request_payment(&unconfirmed).unwrap_err(),
            WalletError::Validation(ValidationError::UnconfirmedCustomChange)
        );
        let confirmed = pay(50_000).with_change(ChangeDestination::Custom {
            address: elsewhere,
            confirmed: true,
        });
        let draft = w.request_payment(&confirmed).unwrap();
        assert_eq!(draft.tx().outputs[1].lock, elsewhere.lock());
    }

    #[test]
    fn ownership_covers_keys_and_policies() {
        let dir = tempfile::tempdir().unwrap();
        let w = wallet(dir.path());
        let mine = w.next_address().unwrap();
        assert!(w.is_mine(&mine));
        assert!(!w.is_mine(&external()));

        let own_key = w.custody().issued_keys()[0].public_key;
        let policy = MultisigPolicy::from_raw(1, vec![own_key]).unwrap();
        let policy_addr = w.register_policy(policy.clone());
        w.register_policy(policy);
        assert_eq!(w.policies().len(), 1);
        assert!(w.is_mine(&policy_addr));

        let mainnet_twin = Address::from_lock(mine.lock(), Network::Mainnet);
        assert!(!w.is_mine(&mainnet_twin));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.wallet");
        let w = wallet(dir.path());
        let outpoint = fund(&w, 60_000, 1);
        let addr = w.next_address().unwrap();
        w.save(&path).unwrap();
        assert!(!temp_path(&path).exists());

        let loaded = Wallet::load(&path, config(dir.path())).unwrap();
        assert_eq!(loaded.custody_status(), CustodyStatus::Unencrypted);
        assert_eq!(loaded.ledger().get(&outpoint).unwrap().value, 60_000);
        assert!(loaded.is_mine(&addr));

        let fresh = wallet(dir.path());
        fresh.next_address().unwrap();
        fresh.next_address().unwrap();
        assert_eq!(loaded.next_address().unwrap(), fresh.next_address().unwrap());
    }

    #[test]
    fn encrypted_file_hides_seed_and_loads_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("enc.wallet");
        let w = wallet(dir.path());
        fund(&w, 60_000, 1);
        w.encrypt(b"secret").unwrap();
        w.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap_or_default();
        assert!(!raw.contains(&hex::encode([5u8; 32])));

        let loaded = Wallet::load(&path, config(dir.path())).unwrap();
        assert_eq!(loaded.custody_status(), CustodyStatus::Locked);
        assert_eq!(loaded.unlock(b"wrong", None).unwrap_err(), WalletError::WrongPassphrase);
        loaded.unlock(b"secret", None).unwrap();

        let draft = loaded.request_payment(&pay(50_000)).unwrap();
        let signed = loaded.import_and_sign_psbt(&loaded.export_psbt(&draft).unwrap()).unwrap();
        assert!(loaded.finalize_psbt(&signed).is_ok());
    }

    #[test]
    fn load_rejects_network_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.wallet");
        wallet(dir.path()).save(&path).unwrap();
        let mainnet = WalletConfig {
            network: Network::Mainnet,
            ..config(dir.path())
        };
        assert!(matches!(Wallet::load(&path, mainnet), Err(WalletError::Config(_))));
    }

    #[test]
    fn load_corrupted_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.wallet");
        std::fs::write(&path, b"garbage").unwrap();
        let err = Wallet::load(&path, config(dir.path())).unwrap_err();
        assert!(matches!(err, WalletError::CorruptedFile(_)));
    }

    #[test]
    fn load_truncated_header_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.wallet");
        std::fs::write(&path, [0u8; 2]).unwrap();
        let err = Wallet::load(&path, config(dir.path())).unwrap_err();
        assert!(matches!(err, WalletError::CorruptedFile(_)));
    }

    #[test]
    fn load_wrong_magic_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.wallet");
        let header = br#"{"magic":"NOPE","version":1}"#;
        let mut data = (header.len() as u32).to_le_bytes().to_vec();
        data.extend_from_slice(header);
        data.extend_from_slice(b"{}");
        std::fs::write(&path, data).unwrap();
        let err = Wallet::load(&path, config(dir.path())).unwrap_err();
        assert_eq!(err, WalletError::CorruptedFile("invalid magic bytes".into()));
    }

    #[test]
    fn load_nonexistent_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Wallet::load(&dir.path().join("missing"), config(dir.path())).unwrap_err();
        assert!(matches!(err, WalletError::Io(_)));
    }

    #[test]
    fn wallet_debug_format() {
        let dir = tempfile::tempdir().unwrap();
        let debug = format!("{:?}", wallet(dir.path()));
        assert!(debug.contains("Wallet"));
        assert!(debug.contains("Testnet"));
    }
}
