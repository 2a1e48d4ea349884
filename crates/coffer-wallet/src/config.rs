//! Wallet configuration.
//!
//! [`WalletConfig`] has usable defaults for every field. [`WalletConfig::load`]
//! layers an optional TOML file and `COFFER_*` environment variables on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use coffer_core::address::Network;

use crate::builder::ChangePosition;
use crate::coin_selection::SelectionPolicy;
use crate::encryption::KdfParams;
use crate::error::WalletError;
use crate::fee::{FeePolicy, FeeRate};

/// Environment variable prefix for overrides, e.g. `COFFER_NETWORK=mainnet`.
pub const ENV_PREFIX: &str = "COFFER";

/// Default wallet file name inside `data_dir`.
pub const DEFAULT_WALLET_FILE: &str = "wallet.dat";

/// Configuration for a wallet instance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct WalletConfig {
    /// Root directory for wallet files.
    pub data_dir: PathBuf,
    /// Wallet file name, relative to `data_dir`.
    pub wallet_file: String,
    pub network: Network,
    /// Fee rate used when a payment request names none.
    pub default_fee_rate: FeeRate,
    /// Relay floor; lower requested rates are raised to it.
    pub min_fee_rate: FeeRate,
    /// Absolute fee ceiling for any single transaction.
    pub max_tx_fee: u64,
    pub spend_unconfirmed_change: bool,
    pub min_confirmations: u32,
    /// Public keys kept pre-derived for issuing while locked.
    pub keypool_size: usize,
    /// Default unlock duration for interactive front ends.
    pub unlock_timeout_secs: u64,
    pub randomize_change_position: bool,
    pub kdf: KdfParams,
    /// Log filter string (e.g. "info", "coffer_wallet=debug").
    pub log_level: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("coffer");
        let fees = FeePolicy::default();

        Self {
            data_dir,
            wallet_file: DEFAULT_WALLET_FILE.to_string(),
            network: Network::Testnet,
            default_fee_rate: FeeRate::from_per_byte(10),
            min_fee_rate: fees.min_fee_rate,
            max_tx_fee: fees.max_tx_fee,
            spend_unconfirmed_change: false,
            min_confirmations: 1,
            keypool_size: 20,
            unlock_timeout_secs: 300,
            randomize_change_position: true,
            kdf: KdfParams::default(),
            log_level: "info".to_string(),
        }
    }
}

impl WalletConfig {
    /// Defaults, then the TOML file at `path` if it exists, then environment.
    pub fn load(path: Option<&Path>) -> Result<Self, WalletError> {
        let defaults = config::Config::try_from(&Self::default())?;
        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }
        let cfg = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(cfg)
    }

    /// Full path of the wallet file.
    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join(&self.wallet_file)
    }

    pub fn fee_policy(&self) -> FeePolicy {
        FeePolicy {
            min_fee_rate: self.min_fee_rate,
            max_tx_fee: self.max_tx_fee,
        }
    }

    pub fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            min_confirmations: self.min_confirmations,
            spend_unconfirmed_change: self.spend_unconfirmed_change,
        }
    }

    pub fn change_position(&self) -> ChangePosition {
        if self.randomize_change_position {
            ChangePosition::Random
        } else {
            ChangePosition::Last
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let cfg = WalletConfig::default();
        assert_eq!(cfg.network, Network::Testnet);
        assert_eq!(cfg.min_confirmations, 1);
        assert_eq!(cfg.keypool_size, 20);
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.randomize_change_position);
        assert!(!cfg.spend_unconfirmed_change);
        assert_eq!(cfg.default_fee_rate, FeeRate::from_per_kb(10_000));
    }

    #[test]
    fn default_data_dir_ends_with_coffer() {
        let cfg = WalletConfig::default();
        assert!(
            cfg.data_dir.ends_with("coffer"),
            "data_dir should end with 'coffer': {:?}",
            cfg.data_dir
        );
    }

    #[test]
    fn wallet_path_joins_file() {
        let cfg = WalletConfig {
            data_dir: PathBuf::from("/tmp/coffer-test"),
            ..WalletConfig::default()
        };
        assert_eq!(cfg.wallet_path(), PathBuf::from("/tmp/coffer-test/wallet.dat"));
    }

    #[test]
    fn policies_follow_fields() {
        let cfg = WalletConfig {
            min_fee_rate: FeeRate::from_per_kb(2_000),
            max_tx_fee: 5_000,
            min_confirmations: 3,
            spend_unconfirmed_change: true,
            randomize_change_position: false,
            ..WalletConfig::default()
        };
        assert_eq!(cfg.fee_policy().min_fee_rate, FeeRate::from_per_kb(2_000));
        assert_eq!(cfg.fee_policy().max_tx_fee, 5_000);
        assert_eq!(cfg.selection_policy().min_confirmations, 3);
        assert!(cfg.selection_policy().spend_unconfirmed_change);
        assert_eq!(cfg.change_position(), ChangePosition::Last);
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = WalletConfig::load(Some(dir.path().join("absent.toml").as_path())).unwrap();
        assert_eq!(cfg.keypool_size, WalletConfig::default().keypool_size);
        assert_eq!(cfg.network, Network::Testnet);
    }

    #[test]
    fn load_toml_overrides_some_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coffer.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "network = \"mainnet\"\nkeypool_size = 5\nmin_fee_rate = 3000\n\n[kdf]\nm_cost = 8\nt_cost = 1\np_cost = 1"
        )
        .unwrap();
        drop(file);

        let cfg = WalletConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(cfg.network, Network::Mainnet);
        assert_eq!(cfg.keypool_size, 5);
        assert_eq!(cfg.min_fee_rate, FeeRate::from_per_kb(3_000));
        assert_eq!(cfg.kdf, KdfParams::light());
        assert_eq!(cfg.min_confirmations, 1);
    }

    #[test]
    fn load_rejects_bad_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "keypool_size = \"lots\"\n").unwrap();
        assert!(matches!(WalletConfig::load(Some(path.as_path())), Err(WalletError::Config(_))));
    }

    #[test]
    fn serde_round_trip() {
        let cfg = WalletConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: WalletConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
